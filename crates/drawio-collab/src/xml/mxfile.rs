// `.drawio` files wrap the model: <mxfile><diagram>...</diagram></mxfile>.
// The diagram body is either an inline <mxGraphModel> or a compressed payload
// (base64 -> raw deflate -> percent-encoded XML). Only the first diagram is
// loaded into the collaborative model.

use super::parse::{local_name_end, local_name_start, read_graph_model};
use super::{ParseError, ParseResult, parse_graph_model};
use crate::model::GraphDocument;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::read::DeflateDecoder;
use percent_encoding::percent_decode_str;
use quick_xml::Reader;
use quick_xml::events::Event;
use std::io::Read;
use tracing::debug;

/// Parses either a bare `<mxGraphModel>` or an `<mxfile>` wrapper.
pub fn parse_document(xml: &str) -> ParseResult<GraphDocument> {
    match root_element(xml)?.as_deref() {
        Some("mxfile") => match first_diagram(xml)? {
            DiagramBody::Inline => parse_inline(xml),
            DiagramBody::Encoded(payload) => {
                debug!(bytes = payload.len(), "decoding compressed diagram payload");
                parse_graph_model(&decode_diagram_payload(&payload)?)
            }
            DiagramBody::Missing => Err(ParseError::MissingElement("diagram")),
        },
        _ => parse_graph_model(xml),
    }
}

/// Inflates a compressed `<diagram>` body back into model XML.
pub fn decode_diagram_payload(payload: &str) -> ParseResult<String> {
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let decoded = STANDARD.decode(compact)?;
    let mut decoder = DeflateDecoder::new(&decoded[..]);
    let mut inflated = Vec::new();
    decoder.read_to_end(&mut inflated)?;
    let inflated_str = std::str::from_utf8(&inflated)?;
    let decoded = percent_decode_str(inflated_str).decode_utf8()?;
    Ok(decoded.into_owned())
}

/// Reads the first inline model, then the rest of the file so a broken
/// wrapper is still reported.
fn parse_inline(xml: &str) -> ParseResult<GraphDocument> {
    let mut reader = Reader::from_str(xml);
    let doc = read_graph_model(&mut reader)?;
    let mut buf = Vec::new();
    while !matches!(reader.read_event_into(&mut buf)?, Event::Eof) {
        buf.clear();
    }
    Ok(doc)
}

enum DiagramBody {
    Inline,
    Encoded(String),
    Missing,
}

fn root_element(xml: &str) -> ParseResult<Option<String>> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) => return Ok(Some(local_name_start(&e)?)),
            Event::Eof => return Ok(None),
            _ => {}
        }
        buf.clear();
    }
}

fn first_diagram(xml: &str) -> ParseResult<DiagramBody> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut in_diagram = false;
    let mut payload = String::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = local_name_start(&e)?;
                if name == "diagram" {
                    in_diagram = true;
                } else if in_diagram && name == "mxGraphModel" {
                    return Ok(DiagramBody::Inline);
                }
            }
            Event::Empty(e) => {
                if local_name_start(&e)? == "diagram" {
                    return Ok(DiagramBody::Missing);
                }
            }
            // Indentation-only text is formatting; anything else is payload.
            Event::Text(t) if in_diagram => {
                let txt = t.decode()?;
                if !txt.trim().is_empty() {
                    payload.push_str(&txt);
                }
            }
            Event::CData(c) if in_diagram => {
                let txt = c.decode()?;
                if !txt.trim().is_empty() {
                    payload.push_str(&txt);
                }
            }
            Event::End(e) => {
                if local_name_end(&e)? == "diagram" {
                    return Ok(if payload.is_empty() {
                        DiagramBody::Missing
                    } else {
                        DiagramBody::Encoded(payload)
                    });
                }
            }
            Event::Eof => return Ok(DiagramBody::Missing),
            _ => {}
        }
        buf.clear();
    }
}
