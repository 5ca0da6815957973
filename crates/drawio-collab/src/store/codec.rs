// Mapping between typed cells and automerge objects.
//
// ROOT
//   attributes: Map<key, Str>
//   cells:      Map<id, Map>        one map per cell, keyed by id
//     parent/value/style/source/target: Str
//     vertex/edge: Boolean
//     extra: Map<key, Str>
//     children: Str (JSON)
//     geometry: Map { x/y/width/height: F64, relative: Boolean, as: Str,
//                     extra: Map<key, Str>, children: Str (JSON) }
//     wrapper: Map { name: Str, attributes: Map<key, Str>, children: Str (JSON) }
//   root_elements, model_elements: Str (JSON)
//   source:     Text                last raw XML seen by from_string
//   state:      Map { dirty: Boolean }
//
// Writers only touch fields whose value differs, so concurrent edits of
// different fields of one cell merge field by field.

use automerge::transaction::{Transactable, Transaction};
use automerge::{ObjId, ObjType, ROOT, ReadDoc, ScalarValue, Value};
use std::collections::BTreeMap;

use super::{StoreError, StoreResult};
use crate::model::{Cell, CellWrapper, Geometry, RawElement};

const ATTRIBUTES: &str = "attributes";
const CELLS: &str = "cells";
const SOURCE: &str = "source";
const STATE: &str = "state";
const DIRTY: &str = "dirty";
const ROOT_ELEMENTS: &str = "root_elements";
const MODEL_ELEMENTS: &str = "model_elements";

/// Object ids of the top-level containers.
#[derive(Debug, Clone)]
pub(crate) struct Schema {
    pub attributes: ObjId,
    pub cells: ObjId,
    pub source: ObjId,
    pub state: ObjId,
}

impl Schema {
    pub fn create(tx: &mut Transaction<'_>) -> StoreResult<Self> {
        let attributes = tx.put_object(ROOT, ATTRIBUTES, ObjType::Map)?;
        let cells = tx.put_object(ROOT, CELLS, ObjType::Map)?;
        let source = tx.put_object(ROOT, SOURCE, ObjType::Text)?;
        let state = tx.put_object(ROOT, STATE, ObjType::Map)?;
        tx.put(&state, DIRTY, false)?;
        Ok(Self {
            attributes,
            cells,
            source,
            state,
        })
    }

    pub fn resolve<R: ReadDoc>(doc: &R) -> StoreResult<Self> {
        Ok(Self {
            attributes: object_at(doc, &ROOT, ATTRIBUTES, ObjType::Map)?
                .ok_or(StoreError::Schema(ATTRIBUTES))?,
            cells: object_at(doc, &ROOT, CELLS, ObjType::Map)?
                .ok_or(StoreError::Schema(CELLS))?,
            source: object_at(doc, &ROOT, SOURCE, ObjType::Text)?
                .ok_or(StoreError::Schema(SOURCE))?,
            state: object_at(doc, &ROOT, STATE, ObjType::Map)?
                .ok_or(StoreError::Schema(STATE))?,
        })
    }
}

// ---- reads ----------------------------------------------------------------

pub(crate) fn object_at<R: ReadDoc>(
    doc: &R,
    parent: &ObjId,
    key: &str,
    expected: ObjType,
) -> StoreResult<Option<ObjId>> {
    Ok(match doc.get(parent, key)? {
        Some((Value::Object(kind), id)) if kind == expected => Some(id),
        _ => None,
    })
}

fn scalar_at<R: ReadDoc>(doc: &R, obj: &ObjId, key: &str) -> StoreResult<Option<ScalarValue>> {
    Ok(match doc.get(obj, key)? {
        Some((Value::Scalar(s), _)) => Some(s.into_owned()),
        _ => None,
    })
}

pub(crate) fn read_str<R: ReadDoc>(doc: &R, obj: &ObjId, key: &str) -> StoreResult<Option<String>> {
    Ok(match scalar_at(doc, obj, key)? {
        Some(ScalarValue::Str(s)) => Some(s.to_string()),
        _ => None,
    })
}

fn read_f64<R: ReadDoc>(doc: &R, obj: &ObjId, key: &str) -> StoreResult<Option<f64>> {
    Ok(match scalar_at(doc, obj, key)? {
        Some(ScalarValue::F64(v)) => Some(v),
        Some(ScalarValue::Int(v)) => Some(v as f64),
        Some(ScalarValue::Uint(v)) => Some(v as f64),
        _ => None,
    })
}

pub(crate) fn read_bool<R: ReadDoc>(doc: &R, obj: &ObjId, key: &str) -> StoreResult<Option<bool>> {
    Ok(match scalar_at(doc, obj, key)? {
        Some(ScalarValue::Boolean(b)) => Some(b),
        _ => None,
    })
}

pub(crate) fn read_string_map<R: ReadDoc>(
    doc: &R,
    obj: &ObjId,
) -> StoreResult<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for key in doc.keys(obj) {
        if let Some(v) = read_str(doc, obj, &key)? {
            out.insert(key, v);
        }
    }
    Ok(out)
}

fn read_child_map<R: ReadDoc>(
    doc: &R,
    parent: &ObjId,
    key: &str,
) -> StoreResult<BTreeMap<String, String>> {
    match object_at(doc, parent, key, ObjType::Map)? {
        Some(obj) => read_string_map(doc, &obj),
        None => Ok(BTreeMap::new()),
    }
}

pub(crate) fn read_dirty<R: ReadDoc>(doc: &R, schema: &Schema) -> StoreResult<bool> {
    Ok(read_bool(doc, &schema.state, DIRTY)?.unwrap_or(false))
}

pub(crate) fn contains_cell<R: ReadDoc>(doc: &R, schema: &Schema, id: &str) -> StoreResult<bool> {
    Ok(object_at(doc, &schema.cells, id, ObjType::Map)?.is_some())
}

pub(crate) fn read_cell<R: ReadDoc>(
    doc: &R,
    schema: &Schema,
    id: &str,
) -> StoreResult<Option<Cell>> {
    let Some(obj) = object_at(doc, &schema.cells, id, ObjType::Map)? else {
        return Ok(None);
    };

    let mut cell = Cell::new(id);
    cell.parent = read_str(doc, &obj, "parent")?;
    cell.value = read_str(doc, &obj, "value")?;
    cell.style = read_str(doc, &obj, "style")?;
    cell.source = read_str(doc, &obj, "source")?;
    cell.target = read_str(doc, &obj, "target")?;
    cell.vertex = read_bool(doc, &obj, "vertex")?;
    cell.edge = read_bool(doc, &obj, "edge")?;
    cell.extra = read_child_map(doc, &obj, "extra")?;
    cell.children = read_raw_list(doc, &obj, "children")?;
    cell.geometry = match object_at(doc, &obj, "geometry", ObjType::Map)? {
        Some(geom) => Some(read_geometry(doc, &geom)?),
        None => None,
    };
    cell.wrapper = match object_at(doc, &obj, "wrapper", ObjType::Map)? {
        Some(wrapper) => read_wrapper(doc, &wrapper)?,
        None => None,
    };
    Ok(Some(cell))
}

/// Unknown `<root>` and `<mxGraphModel>` children, in that order.
pub(crate) fn read_elements<R: ReadDoc>(
    doc: &R,
) -> StoreResult<(Vec<RawElement>, Vec<RawElement>)> {
    Ok((
        read_raw_list(doc, &ROOT, ROOT_ELEMENTS)?,
        read_raw_list(doc, &ROOT, MODEL_ELEMENTS)?,
    ))
}

fn read_raw_list<R: ReadDoc>(doc: &R, obj: &ObjId, key: &str) -> StoreResult<Vec<RawElement>> {
    match read_str(doc, obj, key)? {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(Vec::new()),
    }
}

fn read_wrapper<R: ReadDoc>(doc: &R, obj: &ObjId) -> StoreResult<Option<CellWrapper>> {
    let Some(name) = read_str(doc, obj, "name")? else {
        return Ok(None);
    };
    Ok(Some(CellWrapper {
        name,
        attributes: read_child_map(doc, obj, "attributes")?,
        children: read_raw_list(doc, obj, "children")?,
    }))
}

pub(crate) fn read_cells<R: ReadDoc>(
    doc: &R,
    schema: &Schema,
) -> StoreResult<BTreeMap<String, Cell>> {
    let mut out = BTreeMap::new();
    for id in doc.keys(&schema.cells) {
        if let Some(cell) = read_cell(doc, schema, &id)? {
            out.insert(id, cell);
        }
    }
    Ok(out)
}

fn read_geometry<R: ReadDoc>(doc: &R, obj: &ObjId) -> StoreResult<Geometry> {
    let children = read_raw_list(doc, obj, "children")?;
    Ok(Geometry {
        x: read_f64(doc, obj, "x")?,
        y: read_f64(doc, obj, "y")?,
        width: read_f64(doc, obj, "width")?,
        height: read_f64(doc, obj, "height")?,
        relative: read_bool(doc, obj, "relative")?,
        as_attr: read_str(doc, obj, "as")?,
        extra: read_child_map(doc, obj, "extra")?,
        children,
    })
}

// ---- writes ---------------------------------------------------------------

/// Creates or updates the cell map for `cell.id`, field by field.
pub(crate) fn write_cell(
    tx: &mut Transaction<'_>,
    schema: &Schema,
    cell: &Cell,
) -> StoreResult<()> {
    let obj = ensure_map(tx, &schema.cells, &cell.id)?;

    sync_scalar(tx, &obj, "parent", cell.parent.as_deref().map(ScalarValue::from))?;
    sync_scalar(tx, &obj, "value", cell.value.as_deref().map(ScalarValue::from))?;
    sync_scalar(tx, &obj, "style", cell.style.as_deref().map(ScalarValue::from))?;
    sync_scalar(tx, &obj, "source", cell.source.as_deref().map(ScalarValue::from))?;
    sync_scalar(tx, &obj, "target", cell.target.as_deref().map(ScalarValue::from))?;
    sync_scalar(tx, &obj, "vertex", cell.vertex.map(ScalarValue::Boolean))?;
    sync_scalar(tx, &obj, "edge", cell.edge.map(ScalarValue::Boolean))?;
    sync_child_map(tx, &obj, "extra", &cell.extra)?;
    sync_raw_list(tx, &obj, "children", &cell.children)?;

    match &cell.geometry {
        Some(geom) => {
            let geom_obj = ensure_map(tx, &obj, "geometry")?;
            write_geometry(tx, &geom_obj, geom)?;
        }
        None => {
            delete_key(tx, &obj, "geometry")?;
        }
    }
    match &cell.wrapper {
        Some(wrapper) => {
            let wrapper_obj = ensure_map(tx, &obj, "wrapper")?;
            sync_scalar(tx, &wrapper_obj, "name", Some(ScalarValue::from(wrapper.name.as_str())))?;
            sync_child_map(tx, &wrapper_obj, "attributes", &wrapper.attributes)?;
            sync_raw_list(tx, &wrapper_obj, "children", &wrapper.children)?;
        }
        None => {
            delete_key(tx, &obj, "wrapper")?;
        }
    }
    Ok(())
}

pub(crate) fn write_elements(
    tx: &mut Transaction<'_>,
    root_elements: &[RawElement],
    model_elements: &[RawElement],
) -> StoreResult<()> {
    sync_raw_list(tx, &ROOT, ROOT_ELEMENTS, root_elements)?;
    sync_raw_list(tx, &ROOT, MODEL_ELEMENTS, model_elements)
}

/// Raw element trees are stored as one JSON string: concurrent edits of
/// the same list resolve last-writer-wins.
fn sync_raw_list(
    tx: &mut Transaction<'_>,
    obj: &ObjId,
    key: &str,
    elements: &[RawElement],
) -> StoreResult<()> {
    let json = if elements.is_empty() {
        None
    } else {
        Some(ScalarValue::from(serde_json::to_string(elements)?))
    };
    sync_scalar(tx, obj, key, json)
}

fn write_geometry(tx: &mut Transaction<'_>, obj: &ObjId, geom: &Geometry) -> StoreResult<()> {
    sync_scalar(tx, obj, "x", geom.x.map(ScalarValue::F64))?;
    sync_scalar(tx, obj, "y", geom.y.map(ScalarValue::F64))?;
    sync_scalar(tx, obj, "width", geom.width.map(ScalarValue::F64))?;
    sync_scalar(tx, obj, "height", geom.height.map(ScalarValue::F64))?;
    sync_scalar(tx, obj, "relative", geom.relative.map(ScalarValue::Boolean))?;
    sync_scalar(tx, obj, "as", geom.as_attr.as_deref().map(ScalarValue::from))?;
    sync_child_map(tx, obj, "extra", &geom.extra)?;
    sync_raw_list(tx, obj, "children", &geom.children)
}

pub(crate) fn delete_key(tx: &mut Transaction<'_>, obj: &ObjId, key: &str) -> StoreResult<bool> {
    if tx.get(obj, key)?.is_none() {
        return Ok(false);
    }
    tx.delete(obj, key)?;
    Ok(true)
}

pub(crate) fn sync_scalar(
    tx: &mut Transaction<'_>,
    obj: &ObjId,
    key: &str,
    want: Option<ScalarValue>,
) -> StoreResult<()> {
    let have = scalar_at(&*tx, obj, key)?;
    match want {
        Some(want) if have.as_ref() == Some(&want) => {}
        Some(want) => tx.put(obj, key, want)?,
        None => {
            delete_key(tx, obj, key)?;
        }
    }
    Ok(())
}

/// Makes the map at `obj` hold exactly `want`.
pub(crate) fn sync_string_map(
    tx: &mut Transaction<'_>,
    obj: &ObjId,
    want: &BTreeMap<String, String>,
) -> StoreResult<()> {
    let stale: Vec<String> = tx.keys(obj).filter(|k| !want.contains_key(k)).collect();
    for key in stale {
        tx.delete(obj, key.as_str())?;
    }
    for (key, value) in want {
        sync_scalar(tx, obj, key, Some(ScalarValue::from(value.as_str())))?;
    }
    Ok(())
}

fn sync_child_map(
    tx: &mut Transaction<'_>,
    parent: &ObjId,
    key: &str,
    want: &BTreeMap<String, String>,
) -> StoreResult<()> {
    if want.is_empty() {
        delete_key(tx, parent, key)?;
        return Ok(());
    }
    let obj = ensure_map(tx, parent, key)?;
    sync_string_map(tx, &obj, want)
}

fn ensure_map(tx: &mut Transaction<'_>, parent: &ObjId, key: &str) -> StoreResult<ObjId> {
    match object_at(&*tx, parent, key, ObjType::Map)? {
        Some(obj) => Ok(obj),
        None => Ok(tx.put_object(parent, key, ObjType::Map)?),
    }
}

pub(crate) fn replace_text(tx: &mut Transaction<'_>, obj: &ObjId, text: &str) -> StoreResult<()> {
    let len = tx.length(obj);
    tx.splice_text(obj, 0, len as isize, text)?;
    Ok(())
}
