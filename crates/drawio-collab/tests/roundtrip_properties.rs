use std::collections::BTreeMap;

use drawio_collab::{
    Cell, CellWrapper, DrawioModel, Geometry, GraphDocument, ModelOptions, RawElement,
    parse_graph_model, serialize_graph_model,
};
use proptest::prelude::*;

/// Attribute text including markup characters, quotes, tabs and line breaks.
fn arb_text() -> impl Strategy<Value = String> {
    "[ -~\t\né中]{0,12}"
}

fn arb_id() -> impl Strategy<Value = String> {
    "[a-z0-9]{1,4}"
}

/// Keys that cannot collide with an attribute the parser models.
fn arb_bag() -> impl Strategy<Value = BTreeMap<String, String>> {
    prop::collection::btree_map("data[A-Z][a-z]{0,5}", arb_text(), 0..3)
}

fn arb_raw() -> impl Strategy<Value = RawElement> {
    let leaf = ("ext[A-Z][a-z]{0,5}", prop::collection::btree_map("[a-z]{1,4}", arb_text(), 0..3))
        .prop_map(|(name, attributes)| RawElement {
            name,
            attributes,
            children: Vec::new(),
        });
    leaf.prop_recursive(3, 12, 3, |inner| {
        (
            "ext[A-Z][a-z]{0,5}",
            prop::collection::btree_map("[a-z]{1,4}", arb_text(), 0..2),
            prop::collection::vec(inner, 0..3),
        )
            .prop_map(|(name, attributes, children)| RawElement {
                name,
                attributes,
                children,
            })
    })
}

fn arb_raw_list() -> impl Strategy<Value = Vec<RawElement>> {
    prop::collection::vec(arb_raw(), 0..3)
}

fn arb_coordinate() -> impl Strategy<Value = Option<f64>> {
    prop::option::of(prop_oneof![-1.0e6..1.0e6f64, prop::num::f64::NORMAL])
}

fn arb_geometry() -> impl Strategy<Value = Geometry> {
    (
        (arb_coordinate(), arb_coordinate(), arb_coordinate(), arb_coordinate()),
        any::<Option<bool>>(),
        prop::option::of(prop_oneof![Just("geometry".to_string()), arb_text()]),
        arb_bag(),
        arb_raw_list(),
    )
        .prop_map(|((x, y, width, height), relative, as_attr, extra, children)| Geometry {
            x,
            y,
            width,
            height,
            relative,
            as_attr,
            extra,
            children,
        })
}

fn arb_wrapper() -> impl Strategy<Value = CellWrapper> {
    (
        prop_oneof![Just("UserObject"), Just("object")],
        arb_bag(),
        arb_raw_list(),
    )
        .prop_map(|(name, attributes, children)| CellWrapper {
            name: name.to_string(),
            attributes,
            children,
        })
}

fn arb_cell() -> impl Strategy<Value = Cell> {
    (
        (arb_id(), prop::option::of(arb_id()), prop::option::of(arb_text()), prop::option::of(arb_text())),
        (any::<Option<bool>>(), any::<Option<bool>>()),
        (prop::option::of(arb_id()), prop::option::of(arb_id())),
        arb_bag(),
        prop::option::of(arb_geometry()),
        arb_raw_list(),
        prop::option::of(arb_wrapper()),
    )
        .prop_map(
            |((id, parent, value, style), (vertex, edge), (source, target), extra, geometry, children, wrapper)| {
                let mut cell = Cell::new(id);
                cell.parent = parent;
                cell.value = value;
                cell.style = style;
                cell.vertex = vertex;
                cell.edge = edge;
                cell.source = source;
                cell.target = target;
                cell.extra = extra;
                cell.geometry = geometry;
                cell.children = children;
                cell.wrapper = wrapper;
                cell
            },
        )
}

fn arb_document() -> impl Strategy<Value = GraphDocument> {
    (
        prop::collection::btree_map("[a-z][a-zA-Z]{0,6}", arb_text(), 0..4),
        prop::collection::vec(arb_cell(), 0..8),
        arb_raw_list(),
        arb_raw_list(),
    )
        .prop_map(|(attributes, cells, root_elements, model_elements)| {
            let mut doc = GraphDocument {
                attributes,
                root_elements,
                model_elements,
                ..GraphDocument::default()
            };
            for cell in cells {
                doc.insert(cell);
            }
            doc
        })
}

proptest! {
    /// Parsing serialized output yields the document that was serialized.
    #[test]
    fn prop_parse_inverts_serialize(doc in arb_document()) {
        let xml = serialize_graph_model(&doc);
        let reparsed = parse_graph_model(&xml).map_err(|e| TestCaseError::fail(format!("{e}: {xml}")))?;
        prop_assert_eq!(reparsed, doc);
    }

    /// Serialization is deterministic and stable across a parse.
    #[test]
    fn prop_serialize_is_byte_stable(doc in arb_document()) {
        let first = serialize_graph_model(&doc);
        prop_assert_eq!(&first, &serialize_graph_model(&doc));

        let reparsed = parse_graph_model(&first).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(serialize_graph_model(&reparsed), first);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// The shared store holds every field the XML form carries.
    #[test]
    fn prop_model_stores_what_it_loads(doc in arb_document()) {
        let xml = serialize_graph_model(&doc);
        let options = ModelOptions {
            mirror_raw_source: false,
            ..ModelOptions::default()
        };
        let mut model = DrawioModel::with_options(options).map_err(|e| TestCaseError::fail(e.to_string()))?;
        model.from_string(&xml).map_err(|e| TestCaseError::fail(e.to_string()))?;

        prop_assert_eq!(model.to_string().map_err(|e| TestCaseError::fail(e.to_string()))?, xml);
    }
}
