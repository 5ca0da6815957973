use std::collections::BTreeMap;

use crate::model::{Cell, Geometry, GraphDocument};

/// Where the transaction behind a delta was committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeChange {
    pub key: String,
    pub old: Option<String>,
    pub new: Option<String>,
}

/// Whole-cell before/after. `new == None` means the cell was removed.
#[derive(Debug, Clone, PartialEq)]
pub struct CellChange {
    pub id: String,
    pub old: Option<Cell>,
    pub new: Option<Cell>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellChangeKind {
    Added,
    Removed,
    Updated,
}

impl CellChange {
    pub fn kind(&self) -> CellChangeKind {
        match (&self.old, &self.new) {
            (None, _) => CellChangeKind::Added,
            (Some(_), None) => CellChangeKind::Removed,
            (Some(_), Some(_)) => CellChangeKind::Updated,
        }
    }

    pub fn geometry_changed(&self) -> bool {
        self.field_changed(|c| c.geometry.as_ref())
    }

    pub fn style_changed(&self) -> bool {
        self.field_changed(|c| c.style.as_deref())
    }

    pub fn value_changed(&self) -> bool {
        self.field_changed(|c| c.value.as_deref())
    }

    pub fn new_geometry(&self) -> Option<&Geometry> {
        self.new.as_ref().and_then(|c| c.geometry.as_ref())
    }

    fn field_changed<'a, T, F>(&'a self, field: F) -> bool
    where
        T: PartialEq + 'a,
        F: Fn(&'a Cell) -> Option<T>,
    {
        self.old.as_ref().and_then(&field) != self.new.as_ref().and_then(&field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyChange {
    pub old: bool,
    pub new: bool,
}

/// Everything one committed transaction (or one merge) changed.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphDelta {
    pub origin: Origin,
    pub attributes: Vec<AttributeChange>,
    pub cells: Vec<CellChange>,
    /// Unknown `<root>`/`<mxGraphModel>` children were replaced.
    pub elements_changed: bool,
    /// The raw XML text buffer was edited.
    pub source_changed: bool,
    pub dirty: Option<DirtyChange>,
}

impl GraphDelta {
    pub fn new(origin: Origin) -> Self {
        Self {
            origin,
            attributes: Vec::new(),
            cells: Vec::new(),
            elements_changed: false,
            source_changed: false,
            dirty: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.has_content_changes() && self.dirty.is_none()
    }

    pub fn has_content_changes(&self) -> bool {
        !self.attributes.is_empty()
            || !self.cells.is_empty()
            || self.elements_changed
            || self.source_changed
    }

    pub fn cell(&self, id: &str) -> Option<&CellChange> {
        self.cells.iter().find(|c| c.id == id)
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeChange> {
        self.attributes.iter().find(|a| a.key == key)
    }

    pub(crate) fn push_attribute(&mut self, key: String, old: Option<String>, new: Option<String>) {
        if old != new {
            self.attributes.push(AttributeChange { key, old, new });
        }
    }

    pub(crate) fn push_cell(&mut self, id: String, old: Option<Cell>, new: Option<Cell>) {
        if old != new {
            self.cells.push(CellChange { id, old, new });
        }
    }

    pub(crate) fn set_dirty(&mut self, old: bool, new: bool) {
        self.dirty = (old != new).then_some(DirtyChange { old, new });
    }

    /// Diffs two full store states; used for merges where no journal exists.
    pub(crate) fn between(before: &StoreState, after: &StoreState, origin: Origin) -> Self {
        let mut delta = Self::new(origin);
        for (key, old, new) in diff_maps(&before.document.attributes, &after.document.attributes) {
            delta.push_attribute(key, old, new);
        }
        for (id, old, new) in diff_maps(&before.document.cells, &after.document.cells) {
            delta.push_cell(id, old, new);
        }
        delta.elements_changed = before.document.root_elements != after.document.root_elements
            || before.document.model_elements != after.document.model_elements;
        delta.source_changed = before.source != after.source;
        delta.set_dirty(before.dirty, after.dirty);
        delta
    }
}

/// Everything a replica holds, materialized.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct StoreState {
    pub document: GraphDocument,
    pub source: String,
    pub dirty: bool,
}

type MapDiff<V> = Vec<(String, Option<V>, Option<V>)>;

fn diff_maps<V: PartialEq + Clone>(
    before: &BTreeMap<String, V>,
    after: &BTreeMap<String, V>,
) -> MapDiff<V> {
    let mut out = Vec::new();
    for (key, old) in before {
        match after.get(key) {
            Some(new) if new == old => {}
            new => out.push((key.clone(), Some(old.clone()), new.cloned())),
        }
    }
    for (key, new) in after {
        if !before.contains_key(key) {
            out.push((key.clone(), None, Some(new.clone())));
        }
    }
    out
}
