// quick-xml event parser for a bare `<mxGraphModel>` document.
//
// - Exactly one mxGraphModel; its attributes are kept verbatim
// - mxCell elements must sit inside <root>; ids must be unique
// - UserObject/object wrappers give the wrapped mxCell its id and label and
//   are kept on the cell as a CellWrapper
// - Unknown attributes go to `extra`; unknown elements anywhere inside the
//   model are kept as RawElement trees on their nearest known owner
// - Whitespace/text between elements is ignored; the dialect has no text content

use super::{ParseError, ParseResult};
use crate::model::{Cell, CellWrapper, Geometry, GraphDocument, RawElement};
use crate::number::parse_number;
use quick_xml::Reader;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use std::collections::BTreeMap;
use std::str;

/// Parses `<mxGraphModel ...><root><mxCell .../>...</root></mxGraphModel>`.
///
/// Only whitespace, comments and processing instructions may follow the
/// closing `</mxGraphModel>`.
pub fn parse_graph_model(xml: &str) -> ParseResult<GraphDocument> {
    let mut reader = Reader::from_str(xml);
    let doc = read_graph_model(&mut reader)?;

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => return Ok(doc),
            Event::Text(t) if t.iter().all(u8::is_ascii_whitespace) => {}
            Event::Comment(_) | Event::PI(_) => {}
            other => {
                return Err(ParseError::Structure(format!(
                    "unexpected content after </mxGraphModel>: {other:?}"
                )));
            }
        }
        buf.clear();
    }
}

/// Reads up to and including the first `</mxGraphModel>`, skipping any
/// wrapper elements before it. The reader is left right after the model.
pub(super) fn read_graph_model(reader: &mut Reader<&[u8]>) -> ParseResult<GraphDocument> {
    let mut buf = Vec::new();
    let mut builder = GraphBuilder::default();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = local_name_start(&e)?;
                builder.open(&name, &e)?;
            }
            Event::Empty(e) => {
                let name = local_name_start(&e)?;
                builder.open(&name, &e)?;
                if let Some(doc) = builder.close(&name)? {
                    return Ok(doc);
                }
            }
            Event::End(e) => {
                let name = local_name_end(&e)?;
                if let Some(doc) = builder.close(&name)? {
                    return Ok(doc);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if builder.graph.is_some() {
        return Err(ParseError::Structure("unclosed <mxGraphModel>".into()));
    }
    Err(ParseError::MissingElement("mxGraphModel"))
}

#[derive(Default)]
struct GraphBuilder {
    graph: Option<GraphDocument>,
    seen_root: bool,
    in_root: bool,
    wrapper: Option<CellWrapper>,
    // mxCell closed inside a wrapper, inserted when the wrapper closes
    wrapped: Option<Cell>,
    cell: Option<Cell>,
    geometry: Option<Geometry>,
    raw_stack: Vec<RawElement>,
}

impl GraphBuilder {
    fn open(&mut self, name: &str, e: &BytesStart<'_>) -> ParseResult<()> {
        if !self.raw_stack.is_empty() || self.geometry.is_some() {
            return self.open_raw(name, e);
        }

        match name {
            "mxGraphModel" => {
                if self.graph.is_some() {
                    return Err(ParseError::Structure("nested <mxGraphModel>".into()));
                }
                self.graph = Some(GraphDocument {
                    attributes: attrs_to_map(e)?,
                    ..GraphDocument::default()
                });
            }
            "root" if self.graph.is_some() && self.cell.is_none() && self.wrapper.is_none() => {
                if self.seen_root {
                    return Err(ParseError::Structure("more than one <root>".into()));
                }
                self.seen_root = true;
                self.in_root = true;
            }
            "root" if self.graph.is_none() => {
                return Err(ParseError::Structure("<root> outside mxGraphModel".into()));
            }
            _ if self.in_root && self.cell.is_none() && self.wrapper.is_none() && is_user_object(name) => {
                self.wrapper = Some(CellWrapper {
                    name: name.to_string(),
                    attributes: attrs_to_map(e)?,
                    children: Vec::new(),
                });
            }
            "mxCell" if self.cell.is_none() => {
                if !self.in_root {
                    return Err(ParseError::Structure("mxCell outside <root>".into()));
                }
                if self.wrapped.is_some() {
                    return Err(ParseError::Structure("more than one mxCell in a wrapper".into()));
                }
                self.cell = Some(parse_mxcell(e, self.wrapper.as_mut())?);
            }
            "mxGeometry" => {
                let cell = self.cell.as_ref().ok_or_else(|| {
                    ParseError::Structure("mxGeometry found but no current mxCell".into())
                })?;
                if cell.geometry.is_some() {
                    return Err(ParseError::Structure(format!(
                        "mxCell {} has more than one mxGeometry",
                        cell.id
                    )));
                }
                self.geometry = Some(parse_mxgeometry(e)?);
            }
            _ if self.graph.is_some() => return self.open_raw(name, e),
            // Wrapper elements around the model (<mxfile>, <diagram>)
            _ => {}
        }
        Ok(())
    }

    fn open_raw(&mut self, name: &str, e: &BytesStart<'_>) -> ParseResult<()> {
        self.raw_stack.push(RawElement {
            name: name.to_string(),
            attributes: attrs_to_map(e)?,
            children: Vec::new(),
        });
        Ok(())
    }

    /// Hangs a finished raw element on the innermost open owner.
    fn attach_raw(&mut self, element: RawElement) {
        if let Some(parent) = self.raw_stack.last_mut() {
            parent.children.push(element);
        } else if let Some(geom) = self.geometry.as_mut() {
            geom.children.push(element);
        } else if let Some(cell) = self.cell.as_mut() {
            cell.children.push(element);
        } else if let Some(wrapper) = self.wrapper.as_mut() {
            wrapper.children.push(element);
        } else if let Some(graph) = self.graph.as_mut() {
            if self.in_root {
                graph.root_elements.push(element);
            } else {
                graph.model_elements.push(element);
            }
        }
    }

    fn insert_cell(&mut self, cell: Cell) -> ParseResult<()> {
        let graph = self
            .graph
            .as_mut()
            .ok_or_else(|| ParseError::Structure("mxCell outside mxGraphModel".into()))?;
        if graph.cells.contains_key(&cell.id) {
            return Err(ParseError::DuplicateCell(cell.id));
        }
        graph.cells.insert(cell.id.clone(), cell);
        Ok(())
    }

    /// Returns the finished document when `</mxGraphModel>` closes.
    fn close(&mut self, name: &str) -> ParseResult<Option<GraphDocument>> {
        if let Some(element) = self.raw_stack.pop() {
            self.attach_raw(element);
            return Ok(None);
        }

        match name {
            "mxGeometry" => {
                if let (Some(cell), Some(geom)) = (self.cell.as_mut(), self.geometry.take()) {
                    cell.geometry = Some(geom);
                }
            }
            "mxCell" => {
                let Some(cell) = self.cell.take() else {
                    return Ok(None);
                };
                if self.wrapper.is_some() {
                    self.wrapped = Some(cell);
                } else {
                    self.insert_cell(cell)?;
                }
            }
            "root" => self.in_root = false,
            "mxGraphModel" => {
                let graph = self.graph.take().ok_or_else(|| {
                    ParseError::Structure("closing mxGraphModel but none open".into())
                })?;
                if !self.seen_root {
                    return Err(ParseError::MissingElement("root"));
                }
                return Ok(Some(graph));
            }
            _ if is_user_object(name) => {
                let Some(wrapper) = self.wrapper.take() else {
                    return Ok(None);
                };
                let mut cell = self.wrapped.take().ok_or_else(|| {
                    ParseError::Structure(format!("<{}> without an mxCell", wrapper.name))
                })?;
                cell.wrapper = Some(wrapper);
                self.insert_cell(cell)?;
            }
            _ => {}
        }
        Ok(None)
    }
}

/// Builds a cell from `<mxCell>` attributes. Inside a wrapper the wrapper's
/// `id` and `label` are moved onto the cell unless the mxCell has its own.
fn parse_mxcell(e: &BytesStart<'_>, wrapper: Option<&mut CellWrapper>) -> ParseResult<Cell> {
    let mut attrs = attrs_to_map(e)?;

    if let Some(wrapper) = wrapper {
        let wrapper_id = wrapper.attributes.remove("id");
        if !attrs.contains_key("id")
            && let Some(id) = wrapper_id
        {
            attrs.insert("id".into(), id);
        }
        if !attrs.contains_key("value")
            && let Some(label) = wrapper.attributes.remove("label")
        {
            attrs.insert("value".into(), label);
        }
    }

    let id = attrs
        .remove("id")
        .ok_or(ParseError::MissingAttr("mxCell@id"))?;

    let mut cell = Cell::new(id);
    cell.parent = attrs.remove("parent");
    cell.value = attrs.remove("value");
    cell.style = attrs.remove("style");
    cell.source = attrs.remove("source");
    cell.target = attrs.remove("target");
    cell.vertex = take_flag(&mut attrs, "vertex");
    cell.edge = take_flag(&mut attrs, "edge");
    cell.extra = attrs;
    Ok(cell)
}

fn parse_mxgeometry(e: &BytesStart<'_>) -> ParseResult<Geometry> {
    let mut attrs = attrs_to_map(e)?;
    Ok(Geometry {
        x: take_number(&mut attrs, "x")?,
        y: take_number(&mut attrs, "y")?,
        width: take_number(&mut attrs, "width")?,
        height: take_number(&mut attrs, "height")?,
        relative: take_flag(&mut attrs, "relative"),
        as_attr: attrs.remove("as"),
        extra: attrs,
        children: Vec::new(),
    })
}

/// Removes a `0`/`1` flag. Values that are not booleans stay in the map so
/// they survive in `extra`.
fn take_flag(attrs: &mut BTreeMap<String, String>, key: &str) -> Option<bool> {
    let parsed = parse_bool_opt(attrs.get(key))?;
    attrs.remove(key);
    Some(parsed)
}

fn take_number(
    attrs: &mut BTreeMap<String, String>,
    field: &'static str,
) -> ParseResult<Option<f64>> {
    let Some(raw) = attrs.remove(field) else {
        return Ok(None);
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    parse_number(&raw)
        .map(Some)
        .ok_or(ParseError::InvalidNumber { field, value: raw })
}

pub(super) fn attrs_to_map(e: &BytesStart<'_>) -> ParseResult<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for a in e.attributes() {
        let a = a?;
        let key = str::from_utf8(a.key.as_ref())?.to_string();
        let val = a.unescape_value()?.to_string();
        out.insert(key, val);
    }
    Ok(out)
}

pub(super) fn local_name_start(e: &BytesStart<'_>) -> ParseResult<String> {
    Ok(str::from_utf8(e.name().as_ref())?.to_string())
}

pub(super) fn local_name_end(e: &BytesEnd<'_>) -> ParseResult<String> {
    Ok(str::from_utf8(e.name().as_ref())?.to_string())
}

fn is_user_object(name: &str) -> bool {
    name.eq_ignore_ascii_case("userObject") || name == "object"
}

fn parse_bool_opt(v: Option<&String>) -> Option<bool> {
    let s = v?;
    match s.as_str() {
        "1" | "true" | "TRUE" | "True" => Some(true),
        "0" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"<mxGraphModel dx="800" grid="1"><root><mxCell id="0"/><mxCell id="1" parent="0"/><mxCell id="2" parent="1" vertex="1" value="A" tooltip="hi"><mxGeometry x="10" y="10" width="40" height="20" as="geometry"/></mxCell></root></mxGraphModel>"#;

    #[test]
    fn parses_attributes_verbatim() {
        let doc = parse_graph_model(SAMPLE).expect("parse");
        assert_eq!(doc.attributes.get("dx").map(String::as_str), Some("800"));
        assert_eq!(doc.attributes.get("grid").map(String::as_str), Some("1"));
        assert_eq!(doc.cells.len(), 3);
    }

    #[test]
    fn parses_cell_fields_and_geometry() {
        let doc = parse_graph_model(SAMPLE).expect("parse");
        let cell = doc.cell("2").expect("cell 2");
        assert_eq!(cell.parent.as_deref(), Some("1"));
        assert_eq!(cell.value.as_deref(), Some("A"));
        assert_eq!(cell.vertex, Some(true));
        assert_eq!(cell.extra.get("tooltip").map(String::as_str), Some("hi"));
        assert_eq!(cell.geometry, Some(Geometry::new(10.0, 10.0, 40.0, 20.0)));
    }

    #[test]
    fn keeps_geometry_children_as_raw_elements() {
        let xml = r#"<mxGraphModel><root><mxCell id="0"/><mxCell id="1" parent="0"/><mxCell id="e" edge="1" parent="1"><mxGeometry relative="1" as="geometry"><mxPoint x="1" y="2" as="sourcePoint"/><Array as="points"><mxPoint x="5" y="6"/></Array></mxGeometry></mxCell></root></mxGraphModel>"#;
        let doc = parse_graph_model(xml).expect("parse");
        let geom = doc.cell("e").and_then(|c| c.geometry.clone()).expect("geometry");

        assert_eq!(geom.relative, Some(true));
        assert_eq!(
            geom.children,
            vec![
                RawElement::new("mxPoint")
                    .with_attribute("x", "1")
                    .with_attribute("y", "2")
                    .with_attribute("as", "sourcePoint"),
                RawElement {
                    children: vec![
                        RawElement::new("mxPoint")
                            .with_attribute("x", "5")
                            .with_attribute("y", "6")
                    ],
                    ..RawElement::new("Array").with_attribute("as", "points")
                },
            ]
        );
    }

    #[test]
    fn keeps_user_object_wrapper_on_cell() {
        let xml = r#"<mxGraphModel><root><mxCell id="0"/><UserObject label="Hello" id="u1" link="https://example.com"><mxCell vertex="1" parent="0"/></UserObject></root></mxGraphModel>"#;
        let doc = parse_graph_model(xml).expect("parse");
        let cell = doc.cell("u1").expect("wrapped cell");
        assert_eq!(cell.value.as_deref(), Some("Hello"));
        assert!(cell.extra.is_empty());
        assert_eq!(
            cell.wrapper,
            Some(CellWrapper::user_object().with_attribute("link", "https://example.com"))
        );
    }

    #[test]
    fn wrapper_without_cell_is_an_error() {
        let xml = r#"<mxGraphModel><root><object id="o" label="x"/></root></mxGraphModel>"#;
        let err = parse_graph_model(xml).unwrap_err();
        assert!(matches!(err, ParseError::Structure(_)), "got {err:?}");
    }

    #[test]
    fn keeps_unknown_elements_where_they_appear() {
        let xml = r#"<mxGraphModel><root><mxCell id="0"/><mxCell id="2" parent="0" vertex="1"><Object as="data" k="v"/><mxGeometry x="1" as="geometry"/></mxCell><mxFoo id="z"><bar/></mxFoo></root><extra/></mxGraphModel>"#;
        let doc = parse_graph_model(xml).expect("parse");

        let cell = doc.cell("2").expect("cell 2");
        assert_eq!(
            cell.children,
            vec![RawElement::new("Object").with_attribute("as", "data").with_attribute("k", "v")]
        );
        assert_eq!(cell.geometry.as_ref().and_then(|g| g.x), Some(1.0));
        assert_eq!(
            doc.root_elements,
            vec![RawElement {
                children: vec![RawElement::new("bar")],
                ..RawElement::new("mxFoo").with_attribute("id", "z")
            }]
        );
        assert_eq!(doc.model_elements, vec![RawElement::new("extra")]);
        assert_eq!(doc.cells.len(), 2);
    }

    #[test]
    fn non_boolean_flag_is_preserved_in_extra() {
        let xml = r#"<mxGraphModel><root><mxCell id="0" vertex="maybe"/></root></mxGraphModel>"#;
        let doc = parse_graph_model(xml).expect("parse");
        let cell = doc.cell("0").expect("cell");
        assert_eq!(cell.vertex, None);
        assert_eq!(cell.extra.get("vertex").map(String::as_str), Some("maybe"));
    }

    #[test]
    fn rejects_duplicate_ids() {
        let xml = r#"<mxGraphModel><root><mxCell id="0"/><mxCell id="0"/></root></mxGraphModel>"#;
        let err = parse_graph_model(xml).unwrap_err();
        assert!(matches!(err, ParseError::DuplicateCell(id) if id == "0"));
    }

    #[test]
    fn reports_missing_elements() {
        assert!(matches!(
            parse_graph_model("<diagram/>").unwrap_err(),
            ParseError::MissingElement("mxGraphModel")
        ));
        assert!(matches!(
            parse_graph_model(r#"<mxGraphModel dx="1"></mxGraphModel>"#).unwrap_err(),
            ParseError::MissingElement("root")
        ));
        assert!(matches!(
            parse_graph_model("<mxGraphModel/>").unwrap_err(),
            ParseError::MissingElement("root")
        ));
    }

    #[test]
    fn rejects_malformed_xml() {
        let err = parse_graph_model("<mxGraphModel><root></mxGraphModel>").unwrap_err();
        assert!(matches!(err, ParseError::Xml(_)), "got {err:?}");
    }

    #[test]
    fn rejects_trailing_content() {
        let trailing = format!("{SAMPLE}<<<not xml");
        assert!(parse_graph_model(&trailing).is_err());

        let text = format!("{SAMPLE}junk");
        assert!(matches!(
            parse_graph_model(&text).unwrap_err(),
            ParseError::Structure(_)
        ));

        let second = format!("{SAMPLE}<mxGraphModel/>");
        assert!(parse_graph_model(&second).is_err());
    }

    #[test]
    fn allows_whitespace_and_comments_after_model() {
        let xml = format!("{SAMPLE}\n  <!-- saved -->\n");
        assert_eq!(
            parse_graph_model(&xml).expect("parse"),
            parse_graph_model(SAMPLE).expect("parse")
        );
    }

    #[test]
    fn rejects_non_numeric_geometry() {
        let xml = r#"<mxGraphModel><root><mxCell id="0"><mxGeometry x="ten" as="geometry"/></mxCell></root></mxGraphModel>"#;
        let err = parse_graph_model(xml).unwrap_err();
        assert!(matches!(err, ParseError::InvalidNumber { field: "x", .. }));
    }

    #[test]
    fn rejects_cell_without_id() {
        let xml = r#"<mxGraphModel><root><mxCell parent="0"/></root></mxGraphModel>"#;
        let err = parse_graph_model(xml).unwrap_err();
        assert!(matches!(err, ParseError::MissingAttr("mxCell@id")));
    }
}
