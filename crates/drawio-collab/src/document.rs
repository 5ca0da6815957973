//! The document model a host editor talks to.
//!
//! [`DrawioModel`] owns a [`SharedGraphStore`] and keeps no cell state of its
//! own: every read goes to the store, every write is one store transaction.

use automerge::ChangeHash;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bridge::{ChangeBridge, Signal, StateChange, StateField};
use crate::model::{Cell, Geometry, GraphDocument, RawElement, is_root_id};
use crate::options::ModelOptions;
use crate::store::{GraphDelta, GraphTxn, SharedGraphStore, StoreError};
use crate::xml::{ParseError, parse_document, serialize_graph_model};

#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cell `{id}` {field} refers to missing cell `{target}`")]
    DanglingReference {
        id: String,
        field: &'static str,
        target: String,
    },
    #[error("cell `{id}` is still referenced by `{referrer}` ({field})")]
    CellReferenced {
        id: String,
        referrer: String,
        field: &'static str,
    },
    #[error("no cell with id `{0}`")]
    CellNotFound(String),
    #[error("cell `{0}` is the root or default layer and cannot be removed")]
    MandatoryCell(String),
    #[error("duplicate cell id `{0}`")]
    DuplicateCell(String),
    #[error("cell `{id}` has a non-finite {field}")]
    NonFiniteCoordinate { id: String, field: &'static str },
    #[error("cell `{0}` cannot be both a vertex and an edge")]
    VertexAndEdge(String),
    #[error("cell id `{actual}` does not match `{expected}`")]
    IdMismatch { expected: String, actual: String },
    #[error("model is disposed")]
    Disposed,
    #[error("model is read-only")]
    ReadOnly,
    #[error("invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Unloaded,
    Loading,
    Ready,
    Disposed,
}

#[derive(Debug)]
pub struct DrawioModel {
    store: Option<SharedGraphStore>,
    options: ModelOptions,
    lifecycle: Lifecycle,
    read_only: bool,
    content_changed: Signal<GraphDelta>,
    state_changed: Signal<StateChange>,
}

impl DrawioModel {
    pub fn new() -> ModelResult<Self> {
        Self::with_options(ModelOptions::default())
    }

    pub fn with_options(options: ModelOptions) -> ModelResult<Self> {
        Ok(Self::from_store(
            SharedGraphStore::new()?,
            options,
            Lifecycle::Unloaded,
        ))
    }

    /// Opens a replica from bytes produced by [`DrawioModel::save`].
    pub fn load(bytes: &[u8], options: ModelOptions) -> ModelResult<Self> {
        Ok(Self::from_store(
            SharedGraphStore::load(bytes)?,
            options,
            Lifecycle::Ready,
        ))
    }

    /// A second replica of this model with its own actor and signals.
    pub fn fork(&self) -> ModelResult<Self> {
        let store = self.store()?.fork();
        Ok(Self::from_store(store, self.options.clone(), self.lifecycle))
    }

    fn from_store(mut store: SharedGraphStore, options: ModelOptions, lifecycle: Lifecycle) -> Self {
        let content_changed = Signal::new();
        let state_changed = Signal::new();
        ChangeBridge::attach(&mut store, &content_changed, &state_changed);
        Self {
            store: Some(store),
            read_only: options.read_only,
            options,
            lifecycle,
            content_changed,
            state_changed,
        }
    }

    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_disposed(&self) -> bool {
        self.lifecycle == Lifecycle::Disposed
    }

    /// Emitted after every transaction or merge that changed content.
    pub fn content_changed(&self) -> &Signal<GraphDelta> {
        &self.content_changed
    }

    /// Emitted when `dirty` or `read_only` flips.
    pub fn state_changed(&self) -> &Signal<StateChange> {
        &self.state_changed
    }

    fn store(&self) -> ModelResult<&SharedGraphStore> {
        self.store.as_ref().ok_or(ModelError::Disposed)
    }

    fn store_mut(&mut self) -> ModelResult<&mut SharedGraphStore> {
        self.store.as_mut().ok_or(ModelError::Disposed)
    }

    /// Runs `f` as one store transaction after the disposed/read-only checks.
    pub fn transact<F, O>(&mut self, f: F) -> ModelResult<O>
    where
        F: FnOnce(&mut GraphTxn<'_, '_>) -> ModelResult<O>,
    {
        if self.read_only && self.store.is_some() {
            return Err(ModelError::ReadOnly);
        }
        let out = self.store_mut()?.transact(f)?;
        if self.lifecycle == Lifecycle::Unloaded {
            self.lifecycle = Lifecycle::Ready;
        }
        Ok(out)
    }

    // ---- whole document ---------------------------------------------------

    /// Serializes the current store state as `mxGraphModel` XML.
    pub fn to_string(&self) -> ModelResult<String> {
        let doc = self.store()?.snapshot()?;
        log_dangling(&doc, "serializing");
        Ok(serialize_graph_model(&doc))
    }

    /// Replaces attributes and cells with the parsed contents of `xml`.
    ///
    /// Accepts a bare `<mxGraphModel>` or a `.drawio` `<mxfile>` wrapper. On a
    /// parse error the store is left untouched; a first load falls back to
    /// [`Lifecycle::Unloaded`].
    pub fn from_string(&mut self, xml: &str) -> ModelResult<()> {
        self.store()?;
        if self.read_only {
            return Err(ModelError::ReadOnly);
        }
        let first_load = self.lifecycle == Lifecycle::Unloaded;
        if first_load {
            self.lifecycle = Lifecycle::Loading;
        }

        let result = self.replace_from_xml(xml);
        self.lifecycle = match (&result, first_load) {
            (Err(_), true) => Lifecycle::Unloaded,
            _ => Lifecycle::Ready,
        };
        result
    }

    fn replace_from_xml(&mut self, xml: &str) -> ModelResult<()> {
        let doc = parse_document(xml)?;
        log_dangling(&doc, "loading");
        let mirror = self.options.mirror_raw_source;
        self.store_mut()?.transact::<_, _, ModelError>(|txn| {
            txn.replace_contents(&doc)?;
            if mirror {
                txn.set_source(xml)?;
            }
            Ok(())
        })?;
        info!(cells = doc.cells.len(), attributes = doc.attributes.len(), "loaded document");
        Ok(())
    }

    /// The document as JSON: `attributes`, `cells` keyed by id, and `dirty`.
    pub fn to_json(&self) -> ModelResult<Value> {
        let store = self.store()?;
        let mut value = serde_json::to_value(store.snapshot()?)?;
        if let Value::Object(map) = &mut value {
            map.insert("dirty".into(), Value::Bool(store.dirty()?));
        }
        Ok(value)
    }

    /// Replaces the store contents with JSON text in the [`to_json`] shape.
    /// A `dirty` key is ignored; the flag follows the normal rules.
    ///
    /// Cells go through the same checks as XML input: a repeated key fails
    /// with [`ModelError::DuplicateCell`], a key that differs from the
    /// cell's `id` with [`ModelError::IdMismatch`].
    ///
    /// [`to_json`]: DrawioModel::to_json
    pub fn from_json(&mut self, json: &str) -> ModelResult<()> {
        let input: JsonDocument = serde_json::from_str(json)?;
        let mut doc = GraphDocument {
            attributes: input.attributes,
            cells: BTreeMap::new(),
            root_elements: input.root_elements,
            model_elements: input.model_elements,
        };
        for (key, cell) in input.cells.0 {
            if key != cell.id {
                return Err(ModelError::IdMismatch {
                    expected: key,
                    actual: cell.id,
                });
            }
            if doc.cells.contains_key(&key) {
                return Err(ModelError::DuplicateCell(key));
            }
            validate_cell(&cell)?;
            doc.cells.insert(key, cell);
        }
        log_dangling(&doc, "loading JSON");
        self.transact(|txn| Ok(txn.replace_contents(&doc)?))
    }

    /// Seeds the root cell `"0"` and default layer `"1"` into an empty
    /// document without marking it dirty.
    pub fn initialize(&mut self) -> ModelResult<()> {
        self.transact(|txn| {
            if !txn.cells()?.is_empty() {
                return Ok(());
            }
            let dirty = txn.dirty()?;
            for cell in GraphDocument::with_default_layers().cells.values() {
                txn.set_cell(cell)?;
            }
            txn.set_dirty(dirty)?;
            Ok(())
        })?;
        debug!("initialized default layers");
        Ok(())
    }

    // ---- cells ------------------------------------------------------------

    pub fn get_cell(&self, id: &str) -> ModelResult<Option<Cell>> {
        Ok(self.store()?.get_cell(id)?)
    }

    pub fn contains_cell(&self, id: &str) -> ModelResult<bool> {
        Ok(self.store()?.contains_cell(id)?)
    }

    pub fn cell_ids(&self) -> ModelResult<Vec<String>> {
        Ok(self.store()?.cell_ids())
    }

    pub fn cells(&self) -> ModelResult<BTreeMap<String, Cell>> {
        Ok(self.store()?.cells()?)
    }

    /// Creates or replaces the cell stored under `id`.
    ///
    /// Fails with [`ModelError::DanglingReference`] when `parent`, `source` or
    /// `target` names a cell that does not exist (unless the options allow
    /// it). A cell may refer to itself. Geometry must be finite and a cell
    /// cannot be flagged both vertex and edge.
    pub fn set_cell(&mut self, id: &str, cell: Cell) -> ModelResult<()> {
        if cell.id != id {
            return Err(ModelError::IdMismatch {
                expected: id.to_string(),
                actual: cell.id,
            });
        }
        validate_cell(&cell)?;
        let reject = self.options.reject_dangling_references;
        self.transact(|txn| {
            for (field, target) in cell.references() {
                if target == cell.id || txn.contains_cell(target)? {
                    continue;
                }
                if reject {
                    warn!(id = %cell.id, field, missing = target, "rejected dangling reference");
                    return Err(ModelError::DanglingReference {
                        id: cell.id.clone(),
                        field,
                        target: target.to_string(),
                    });
                }
                warn!(id = %cell.id, field, missing = target, "storing dangling reference");
            }
            txn.set_cell(&cell)?;
            Ok(())
        })
    }

    /// Removes a cell. Returns `false` when no such cell exists.
    ///
    /// Fails with [`ModelError::CellReferenced`] while another cell still
    /// names `id` as its parent, source or target, and with
    /// [`ModelError::MandatoryCell`] for `"0"` and `"1"`.
    pub fn remove_cell(&mut self, id: &str) -> ModelResult<bool> {
        self.transact(|txn| {
            if is_root_id(id) {
                return Err(ModelError::MandatoryCell(id.to_string()));
            }
            if !txn.contains_cell(id)? {
                return Ok(false);
            }
            for other in txn.cells()?.values() {
                if other.id == id {
                    continue;
                }
                if let Some(field) = other.refers_to(id) {
                    warn!(id, referrer = %other.id, field, "rejected removal of referenced cell");
                    return Err(ModelError::CellReferenced {
                        id: id.to_string(),
                        referrer: other.id.clone(),
                        field,
                    });
                }
            }
            Ok(txn.remove_cell(id)?)
        })
    }

    fn required_cell(&self, id: &str) -> ModelResult<Cell> {
        self.get_cell(id)?
            .ok_or_else(|| ModelError::CellNotFound(id.to_string()))
    }

    fn update_cell<F>(&mut self, id: &str, edit: F) -> ModelResult<()>
    where
        F: FnOnce(&mut Cell),
    {
        self.transact(|txn| {
            let mut cell = txn
                .get_cell(id)?
                .ok_or_else(|| ModelError::CellNotFound(id.to_string()))?;
            edit(&mut cell);
            validate_cell(&cell)?;
            txn.set_cell(&cell)?;
            Ok(())
        })
    }

    pub fn get_geometry(&self, id: &str) -> ModelResult<Option<Geometry>> {
        Ok(self.required_cell(id)?.geometry)
    }

    pub fn set_geometry(&mut self, id: &str, geometry: Option<Geometry>) -> ModelResult<()> {
        self.update_cell(id, |cell| cell.geometry = geometry)
    }

    pub fn get_value(&self, id: &str) -> ModelResult<Option<String>> {
        Ok(self.required_cell(id)?.value)
    }

    pub fn set_value(&mut self, id: &str, value: Option<&str>) -> ModelResult<()> {
        self.update_cell(id, |cell| cell.value = value.map(str::to_string))
    }

    pub fn get_style(&self, id: &str) -> ModelResult<Option<String>> {
        Ok(self.required_cell(id)?.style)
    }

    pub fn set_style(&mut self, id: &str, style: Option<&str>) -> ModelResult<()> {
        self.update_cell(id, |cell| cell.style = style.map(str::to_string))
    }

    /// Cells whose parent is `id`, in serialization order.
    pub fn children(&self, id: &str) -> ModelResult<Vec<Cell>> {
        let doc = self.store()?.snapshot()?;
        Ok(doc
            .ordered_cells()
            .filter(|c| c.parent.as_deref() == Some(id))
            .cloned()
            .collect())
    }

    /// Edges whose source or target is `id`, in serialization order.
    pub fn edges_of(&self, id: &str) -> ModelResult<Vec<Cell>> {
        let doc = self.store()?.snapshot()?;
        Ok(doc
            .ordered_cells()
            .filter(|c| c.is_edge())
            .filter(|c| c.source.as_deref() == Some(id) || c.target.as_deref() == Some(id))
            .cloned()
            .collect())
    }

    // ---- attributes -------------------------------------------------------

    pub fn get_attribute(&self, key: &str) -> ModelResult<Option<String>> {
        Ok(self.store()?.get_attribute(key)?)
    }

    pub fn attributes(&self) -> ModelResult<BTreeMap<String, String>> {
        Ok(self.store()?.attributes()?)
    }

    pub fn set_attribute(&mut self, key: &str, value: &str) -> ModelResult<()> {
        self.transact(|txn| Ok(txn.set_attribute(key, value)?))
    }

    pub fn remove_attribute(&mut self, key: &str) -> ModelResult<bool> {
        self.transact(|txn| Ok(txn.remove_attribute(key)?))
    }

    // ---- state ------------------------------------------------------------

    pub fn dirty(&self) -> ModelResult<bool> {
        Ok(self.store()?.dirty()?)
    }

    /// Writes the replicated dirty flag. Allowed while read-only so a host
    /// can clear it after saving.
    pub fn set_dirty(&mut self, dirty: bool) -> ModelResult<()> {
        Ok(self.store_mut()?.set_dirty(dirty)?)
    }

    pub fn clear_dirty(&mut self) -> ModelResult<()> {
        self.set_dirty(false)
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn set_read_only(&mut self, read_only: bool) -> ModelResult<()> {
        self.store()?;
        let old = std::mem::replace(&mut self.read_only, read_only);
        if old != read_only {
            self.state_changed.emit(&StateChange {
                field: StateField::ReadOnly,
                old,
                new: read_only,
            });
        }
        Ok(())
    }

    /// The raw XML text buffer (the last source given to `from_string`, plus
    /// any [`DrawioModel::update_source`] edits).
    pub fn raw_source(&self) -> ModelResult<String> {
        Ok(self.store()?.source()?)
    }

    /// Replaces the characters `start..end` of the raw source buffer with
    /// `value`. Out-of-range bounds are clamped.
    pub fn update_source(&mut self, start: usize, end: usize, value: &str) -> ModelResult<()> {
        self.transact(|txn| Ok(txn.splice_source(start, end, value)?))
    }

    // ---- replication ------------------------------------------------------

    pub fn save(&self) -> ModelResult<Vec<u8>> {
        Ok(self.store()?.save())
    }

    pub fn heads(&self) -> ModelResult<Vec<ChangeHash>> {
        Ok(self.store()?.heads())
    }

    pub fn changes_since(&self, heads: &[ChangeHash]) -> ModelResult<Vec<u8>> {
        Ok(self.store()?.changes_since(heads))
    }

    /// Applies encoded changes from a peer. Remote edits are accepted even
    /// while the model is read-only.
    pub fn apply_changes(&mut self, bytes: &[u8]) -> ModelResult<GraphDelta> {
        let delta = self.store_mut()?.apply_changes(bytes)?;
        self.ready_after_remote(&delta);
        Ok(delta)
    }

    /// Pulls every change `other` has that this model lacks.
    pub fn merge_from(&mut self, other: &mut DrawioModel) -> ModelResult<GraphDelta> {
        let theirs = other.store_mut()?;
        let ours = self.store.as_mut().ok_or(ModelError::Disposed)?;
        let delta = ours.merge(theirs)?;
        self.ready_after_remote(&delta);
        Ok(delta)
    }

    fn ready_after_remote(&mut self, delta: &GraphDelta) {
        if self.lifecycle == Lifecycle::Unloaded && delta.has_content_changes() {
            self.lifecycle = Lifecycle::Ready;
        }
    }

    // ---- teardown ---------------------------------------------------------

    /// Clears signals, detaches store observers and drops the store. Safe to
    /// call more than once.
    pub fn dispose(&mut self) {
        if self.is_disposed() {
            return;
        }
        self.lifecycle = Lifecycle::Disposed;
        self.content_changed.clear();
        self.state_changed.clear();
        if let Some(mut store) = self.store.take() {
            store.clear_observers();
        }
        info!("disposed document model");
    }
}

impl Drop for DrawioModel {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn validate_cell(cell: &Cell) -> ModelResult<()> {
    if let Some(field) = cell.non_finite_coordinate() {
        return Err(ModelError::NonFiniteCoordinate {
            id: cell.id.clone(),
            field,
        });
    }
    if cell.is_vertex() && cell.is_edge() {
        return Err(ModelError::VertexAndEdge(cell.id.clone()));
    }
    Ok(())
}

/// JSON input. `cells` keeps every entry in order so a repeated id is seen
/// instead of overwriting the earlier one.
#[derive(Deserialize)]
struct JsonDocument {
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    #[serde(default)]
    cells: CellEntries,
    #[serde(default)]
    root_elements: Vec<RawElement>,
    #[serde(default)]
    model_elements: Vec<RawElement>,
}

#[derive(Default)]
struct CellEntries(Vec<(String, Cell)>);

impl<'de> Deserialize<'de> for CellEntries {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = CellEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of cell id to cell")
            }

            fn visit_map<A>(self, mut map: A) -> Result<CellEntries, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::new();
                while let Some(entry) = map.next_entry()? {
                    entries.push(entry);
                }
                Ok(CellEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

fn log_dangling(doc: &GraphDocument, context: &'static str) {
    for (id, field, target) in doc.dangling_references() {
        warn!(id, field, missing = target, context, "dangling cell reference");
    }
}
