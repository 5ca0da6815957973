pub mod bridge;
pub mod document;
pub mod model;
pub mod number;
pub mod options;
pub mod store;
pub mod xml;
pub use bridge::{ChangeBridge, Signal, SlotId, StateChange, StateField};
pub use document::{DrawioModel, Lifecycle, ModelError, ModelResult};
pub use model::{Cell, CellWrapper, Geometry, GraphDocument, RawElement};
pub use options::ModelOptions;
pub use store::{
    CellChange, CellChangeKind, GraphDelta, GraphTxn, ObserverId, Origin, SharedGraphStore,
    StoreError, StoreResult,
};
pub use xml::{ParseError, ParseResult, parse_document, parse_graph_model, serialize_graph_model};
