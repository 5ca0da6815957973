use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::number;

/// Id of the mandatory root cell.
pub const ROOT_CELL_ID: &str = "0";

/// Id of the mandatory default layer.
pub const LAYER_CELL_ID: &str = "1";

/// Content of one `<mxGraphModel>`: document attributes plus cells keyed by id.
///
/// The dirty flag is not part of the value; it lives in the shared store
/// next to the content (see [`crate::store::SharedGraphStore::dirty`]).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphDocument {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,

    #[serde(default)]
    pub cells: BTreeMap<String, Cell>,

    /// Unknown elements inside `<root>`, written after the cells.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub root_elements: Vec<RawElement>,

    /// Unknown elements inside `<mxGraphModel>` but outside `<root>`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub model_elements: Vec<RawElement>,
}

impl GraphDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty diagram holding only the root cell and the default layer.
    pub fn with_default_layers() -> Self {
        let mut doc = Self::new();
        doc.insert(Cell::new(ROOT_CELL_ID));
        doc.insert(Cell::new(LAYER_CELL_ID).with_parent(ROOT_CELL_ID));
        doc
    }

    /// Inserts or replaces a cell under its own id.
    pub fn insert(&mut self, cell: Cell) -> Option<Cell> {
        self.cells.insert(cell.id.clone(), cell)
    }

    pub fn cell(&self, id: &str) -> Option<&Cell> {
        self.cells.get(id)
    }

    /// Cells in serialization order: `"0"`, `"1"`, then every other id in
    /// ascending order.
    pub fn ordered_cells(&self) -> impl Iterator<Item = &Cell> {
        let head = [ROOT_CELL_ID, LAYER_CELL_ID]
            .into_iter()
            .filter_map(|id| self.cells.get(id));
        let tail = self
            .cells
            .iter()
            .filter(|(id, _)| !is_root_id(id))
            .map(|(_, cell)| cell);
        head.chain(tail)
    }

    /// References (`parent`/`source`/`target`) that point at ids missing from
    /// this document, as `(cell id, field, missing id)`.
    pub fn dangling_references(&self) -> Vec<(&str, &'static str, &str)> {
        let mut dangling = Vec::new();
        for cell in self.cells.values() {
            for (field, target) in cell.references() {
                if !self.cells.contains_key(target) {
                    dangling.push((cell.id.as_str(), field, target));
                }
            }
        }
        dangling
    }
}

pub fn is_root_id(id: &str) -> bool {
    id == ROOT_CELL_ID || id == LAYER_CELL_ID
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertex: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Attributes of `<mxCell>` this crate does not model.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,

    /// Children of `<mxCell>` other than `<mxGeometry>`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RawElement>,

    /// Set when drawio wrote the cell inside a `UserObject`/`object` element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapper: Option<CellWrapper>,
}

impl Cell {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent: None,
            value: None,
            style: None,
            vertex: None,
            edge: None,
            source: None,
            target: None,
            extra: BTreeMap::new(),
            geometry: None,
            children: Vec::new(),
            wrapper: None,
        }
    }

    pub fn new_vertex(id: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            vertex: Some(true),
            ..Self::new(id).with_parent(parent)
        }
    }

    pub fn new_edge(
        id: impl Into<String>,
        parent: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            edge: Some(true),
            source: Some(source.into()),
            target: Some(target.into()),
            ..Self::new(id).with_parent(parent)
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_wrapper(mut self, wrapper: CellWrapper) -> Self {
        self.wrapper = Some(wrapper);
        self
    }

    pub fn is_vertex(&self) -> bool {
        self.vertex == Some(true)
    }

    pub fn is_edge(&self) -> bool {
        self.edge == Some(true)
    }

    /// Coordinates that are NaN or infinite, which the XML form cannot carry.
    pub fn non_finite_coordinate(&self) -> Option<&'static str> {
        let geom = self.geometry.as_ref()?;
        [
            ("x", geom.x),
            ("y", geom.y),
            ("width", geom.width),
            ("height", geom.height),
        ]
        .into_iter()
        .find(|(_, v)| v.is_some_and(|v| !v.is_finite()))
        .map(|(field, _)| field)
    }

    /// Ids this cell points at, tagged with the attribute that holds them.
    pub fn references(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        [
            ("parent", self.parent.as_deref()),
            ("source", self.source.as_deref()),
            ("target", self.target.as_deref()),
        ]
        .into_iter()
        .filter_map(|(field, id)| id.map(|id| (field, id)))
    }

    pub fn refers_to(&self, id: &str) -> Option<&'static str> {
        self.references()
            .find(|(_, target)| *target == id)
            .map(|(field, _)| field)
    }
}

/// The `UserObject`/`object` element around a cell with custom properties.
///
/// The wrapper's `id` is the cell id and its `label` is the cell value, so
/// neither appears in `attributes` once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellWrapper {
    pub name: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,

    /// Elements next to the wrapped `<mxCell>`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RawElement>,
}

impl CellWrapper {
    pub fn user_object() -> Self {
        Self {
            name: "UserObject".to_string(),
            attributes: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "number::ser_opt_compact",
        deserialize_with = "number::de_opt_finite"
    )]
    pub x: Option<f64>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "number::ser_opt_compact",
        deserialize_with = "number::de_opt_finite"
    )]
    pub y: Option<f64>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "number::ser_opt_compact",
        deserialize_with = "number::de_opt_finite"
    )]
    pub width: Option<f64>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "number::ser_opt_compact",
        deserialize_with = "number::de_opt_finite"
    )]
    pub height: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative: Option<bool>,

    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub as_attr: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,

    /// Nested `mxPoint`/`Array` elements, carried through untouched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RawElement>,
}

impl Geometry {
    /// A vertex box (`as="geometry"`).
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            width: Some(width),
            height: Some(height),
            as_attr: Some("geometry".to_string()),
            ..Self::default()
        }
    }

    /// Relative geometry as drawio writes it for edges.
    pub fn relative_edge() -> Self {
        Self {
            relative: Some(true),
            as_attr: Some("geometry".to_string()),
            ..Self::default()
        }
    }
}

/// An element the dialect allows but this crate does not interpret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawElement {
    pub name: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RawElement>,
}

impl RawElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}
