use crate::model::{Cell, CellWrapper, Geometry, GraphDocument, RawElement};
use crate::number::format_number;
use quick_xml::escape::escape;
use std::borrow::Cow;
use std::fmt::Write as _;

/// Serializes a document as `<mxGraphModel ...><root>...</root></mxGraphModel>`.
///
/// Output is a pure function of the document: attributes in key order, cells
/// `"0"`, `"1"`, then ascending id, cell attributes in a fixed order. An
/// unchanged document always serializes to the same bytes.
pub fn serialize_graph_model(doc: &GraphDocument) -> String {
    let mut out = String::with_capacity(64 + doc.cells.len() * 96);
    out.push_str("<mxGraphModel");
    for (k, v) in &doc.attributes {
        push_attr(&mut out, k, v);
    }
    out.push_str("><root>");
    for cell in doc.ordered_cells() {
        match &cell.wrapper {
            Some(wrapper) => write_wrapped_cell(&mut out, cell, wrapper),
            None => write_cell(&mut out, cell, true),
        }
    }
    for element in &doc.root_elements {
        write_raw(&mut out, element);
    }
    out.push_str("</root>");
    for element in &doc.model_elements {
        write_raw(&mut out, element);
    }
    out.push_str("</mxGraphModel>");
    out
}

/// `<UserObject id=".." label="..">` carries identity and label; the inner
/// mxCell keeps the value only when the wrapper has its own `label`.
fn write_wrapped_cell(out: &mut String, cell: &Cell, wrapper: &CellWrapper) {
    let inline_value = wrapper.attributes.contains_key("label");
    let _ = write!(out, "<{}", wrapper.name);
    push_attr(out, "id", &cell.id);
    if !inline_value {
        push_opt(out, "label", cell.value.as_deref());
    }
    for (k, v) in wrapper.attributes.iter().filter(|(k, _)| *k != "id") {
        push_attr(out, k, v);
    }
    out.push('>');
    write_cell(out, cell, false);
    for child in &wrapper.children {
        write_raw(out, child);
    }
    let _ = write!(out, "</{}>", wrapper.name);
}

fn write_cell(out: &mut String, cell: &Cell, with_identity: bool) {
    out.push_str("<mxCell");
    if with_identity {
        push_attr(out, "id", &cell.id);
    }
    push_opt(out, "parent", cell.parent.as_deref());
    if with_identity || cell.wrapper.as_ref().is_some_and(|w| w.attributes.contains_key("label")) {
        push_opt(out, "value", cell.value.as_deref());
    }
    push_opt(out, "style", cell.style.as_deref());
    push_flag(out, "vertex", cell.vertex);
    push_flag(out, "edge", cell.edge);
    push_opt(out, "source", cell.source.as_deref());
    push_opt(out, "target", cell.target.as_deref());
    for (k, v) in &cell.extra {
        push_attr(out, k, v);
    }
    if cell.geometry.is_none() && cell.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    if let Some(geom) = &cell.geometry {
        write_geometry(out, geom);
    }
    for child in &cell.children {
        write_raw(out, child);
    }
    out.push_str("</mxCell>");
}

fn write_geometry(out: &mut String, geom: &Geometry) {
    out.push_str("<mxGeometry");
    for (key, v) in [
        ("x", geom.x),
        ("y", geom.y),
        ("width", geom.width),
        ("height", geom.height),
    ] {
        if let Some(v) = v {
            push_attr(out, key, &format_number(v));
        }
    }
    push_flag(out, "relative", geom.relative);
    push_opt(out, "as", geom.as_attr.as_deref());
    for (k, v) in &geom.extra {
        push_attr(out, k, v);
    }
    write_children(out, "mxGeometry", &geom.children);
}

fn write_raw(out: &mut String, element: &RawElement) {
    let _ = write!(out, "<{}", element.name);
    for (k, v) in &element.attributes {
        push_attr(out, k, v);
    }
    write_children(out, &element.name, &element.children);
}

fn write_children(out: &mut String, name: &str, children: &[RawElement]) {
    if children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for child in children {
        write_raw(out, child);
    }
    let _ = write!(out, "</{name}>");
}

fn push_attr(out: &mut String, key: &str, value: &str) {
    let _ = write!(out, " {key}=\"{}\"", escape_attr(value));
}

fn push_opt(out: &mut String, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        push_attr(out, key, value);
    }
}

fn push_flag(out: &mut String, key: &str, value: Option<bool>) {
    if let Some(value) = value {
        push_attr(out, key, if value { "1" } else { "0" });
    }
}

/// Markup escaping plus character references for line breaks and tabs, which
/// XML attribute normalization would otherwise turn into spaces.
fn escape_attr(value: &str) -> Cow<'_, str> {
    let escaped = escape(value);
    if !escaped.contains(['\n', '\r', '\t']) {
        return escaped;
    }
    Cow::Owned(
        escaped
            .replace('\n', "&#xa;")
            .replace('\r', "&#xd;")
            .replace('\t', "&#x9;"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::parse_graph_model;
    use pretty_assertions::assert_eq;

    fn sample() -> GraphDocument {
        let mut doc = GraphDocument::with_default_layers();
        doc.attributes.insert("dx".into(), "800".into());
        doc.insert(
            Cell::new_vertex("2", "1")
                .with_value("A")
                .with_geometry(Geometry::new(10.0, 10.0, 40.0, 20.0)),
        );
        doc
    }

    #[test]
    fn writes_expected_markup() {
        assert_eq!(
            serialize_graph_model(&sample()),
            concat!(
                r#"<mxGraphModel dx="800"><root>"#,
                r#"<mxCell id="0"/>"#,
                r#"<mxCell id="1" parent="0"/>"#,
                r#"<mxCell id="2" parent="1" value="A" vertex="1">"#,
                r#"<mxGeometry x="10" y="10" width="40" height="20" as="geometry"/>"#,
                r#"</mxCell></root></mxGraphModel>"#,
            )
        );
    }

    #[test]
    fn escapes_markup_and_line_breaks() {
        let mut doc = GraphDocument::with_default_layers();
        doc.insert(Cell::new_vertex("2", "1").with_value("a<b>&\"c\"\nnext"));

        let xml = serialize_graph_model(&doc);
        assert!(xml.contains("value=\"a&lt;b&gt;&amp;&quot;c&quot;&#xa;next\""));

        let reparsed = parse_graph_model(&xml).expect("reparse");
        assert_eq!(reparsed, doc);
    }

    #[test]
    fn writes_wrapper_around_cell() {
        let mut doc = GraphDocument::with_default_layers();
        doc.insert(
            Cell::new_vertex("u", "1")
                .with_value("Hi")
                .with_wrapper(CellWrapper::user_object().with_attribute("link", "http://x")),
        );

        let xml = serialize_graph_model(&doc);
        assert!(xml.contains(
            r#"<UserObject id="u" label="Hi" link="http://x"><mxCell parent="1" vertex="1"/></UserObject>"#
        ));
        assert_eq!(parse_graph_model(&xml).expect("reparse"), doc);
    }

    #[test]
    fn writes_unknown_elements_back() {
        let mut doc = GraphDocument::with_default_layers();
        let mut cell = Cell::new_vertex("2", "1");
        cell.children.push(RawElement::new("Object").with_attribute("as", "data"));
        doc.insert(cell);
        doc.root_elements.push(RawElement::new("mxFoo").with_attribute("id", "z"));
        doc.model_elements.push(RawElement::new("extra"));

        let xml = serialize_graph_model(&doc);
        assert!(xml.contains(r#"<mxCell id="2" parent="1" vertex="1"><Object as="data"/></mxCell>"#));
        assert!(xml.ends_with(r#"<mxFoo id="z"/></root><extra/></mxGraphModel>"#));
        assert_eq!(parse_graph_model(&xml).expect("reparse"), doc);
    }

    #[test]
    fn writes_raw_geometry_children() {
        let mut geom = Geometry::relative_edge();
        geom.children.push(
            RawElement::new("mxPoint")
                .with_attribute("as", "targetPoint")
                .with_attribute("x", "3"),
        );
        let mut doc = GraphDocument::with_default_layers();
        doc.insert(Cell::new_edge("e", "1", "0", "1").with_geometry(geom));

        let xml = serialize_graph_model(&doc);
        assert!(xml.contains(
            r#"<mxGeometry relative="1" as="geometry"><mxPoint as="targetPoint" x="3"/></mxGeometry>"#
        ));
        assert_eq!(parse_graph_model(&xml).expect("reparse"), doc);
    }
}
