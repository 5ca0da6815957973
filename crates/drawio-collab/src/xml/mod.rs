//! Translation between the `mxGraphModel` XML dialect and [`GraphDocument`].
//!
//! [`GraphDocument`]: crate::model::GraphDocument

mod mxfile;
mod parse;
mod write;

pub use mxfile::{decode_diagram_payload, parse_document};
pub use parse::parse_graph_model;
pub use write::serialize_graph_model;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("attribute error: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),

    #[error("utf8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] quick_xml::encoding::EncodingError),

    #[error("missing <{0}> element")]
    MissingElement(&'static str),

    #[error("missing required attribute: {0}")]
    MissingAttr(&'static str),

    #[error("duplicate cell id: {0}")]
    DuplicateCell(String),

    #[error("invalid number for {field}: {value}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("unexpected structure: {0}")]
    Structure(String),

    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("deflate decode error: {0}")]
    Deflate(#[from] std::io::Error),
}

pub type ParseResult<T> = Result<T, ParseError>;
