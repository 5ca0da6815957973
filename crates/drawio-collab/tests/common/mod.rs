#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use drawio_collab::{DrawioModel, GraphDelta, StateChange};
use tracing_subscriber::EnvFilter;

pub const SAMPLE: &str = r#"<mxGraphModel dx="800"><root><mxCell id="0"/><mxCell id="1" parent="0"/><mxCell id="2" parent="1" vertex="1" value="A"><mxGeometry x="10" y="10" width="40" height="20" as="geometry"/></mxCell></root></mxGraphModel>"#;

/// Installs a fmt subscriber honouring `RUST_LOG`; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn loaded_model() -> DrawioModel {
    init_tracing();
    let mut model = DrawioModel::new().expect("model");
    model.from_string(SAMPLE).expect("load sample");
    model
}

pub fn record_content(model: &DrawioModel) -> Rc<RefCell<Vec<GraphDelta>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    model
        .content_changed()
        .connect(move |delta: &GraphDelta| sink.borrow_mut().push(delta.clone()));
    seen
}

pub fn record_state(model: &DrawioModel) -> Rc<RefCell<Vec<StateChange>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    model
        .state_changed()
        .connect(move |change: &StateChange| sink.borrow_mut().push(*change));
    seen
}
