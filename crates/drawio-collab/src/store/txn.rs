use automerge::ReadDoc;
use automerge::transaction::{Transactable, Transaction};
use std::collections::BTreeMap;

use super::codec::{self, Schema};
use super::delta::{GraphDelta, Origin};
use super::StoreResult;
use crate::model::{Cell, GraphDocument, RawElement};

type Elements = (Vec<RawElement>, Vec<RawElement>);

/// First-seen values of everything a transaction touched.
#[derive(Debug, Default)]
pub(crate) struct Journal {
    attributes: BTreeMap<String, Option<String>>,
    cells: BTreeMap<String, Option<Cell>>,
    elements: Option<Elements>,
    source: Option<String>,
    dirty: Option<bool>,
    // any content write, including one that left the value unchanged
    written: bool,
}

impl Journal {
    /// Compares the recorded old values with what `doc` holds now.
    pub(crate) fn delta<R: ReadDoc>(&self, doc: &R, schema: &Schema) -> StoreResult<GraphDelta> {
        let mut delta = GraphDelta::new(Origin::Local);
        for (key, old) in &self.attributes {
            let new = codec::read_str(doc, &schema.attributes, key)?;
            delta.push_attribute(key.clone(), old.clone(), new);
        }
        for (id, old) in &self.cells {
            let new = codec::read_cell(doc, schema, id)?;
            delta.push_cell(id.clone(), old.clone(), new);
        }
        if let Some(old) = &self.elements {
            delta.elements_changed = *old != codec::read_elements(doc)?;
        }
        if let Some(old) = &self.source {
            delta.source_changed = *old != doc.text(&schema.source)?;
        }
        if let Some(old) = self.dirty {
            delta.set_dirty(old, codec::read_dirty(doc, schema)?);
        }
        Ok(delta)
    }
}

/// Typed view over an open automerge transaction.
///
/// Every write records the prior value in the journal the first time a key
/// is touched, so the committed delta carries real before/after pairs.
pub struct GraphTxn<'t, 'd> {
    tx: &'t mut Transaction<'d>,
    schema: &'t Schema,
    journal: &'t mut Journal,
}

impl<'t, 'd> GraphTxn<'t, 'd> {
    pub(crate) fn new(tx: &'t mut Transaction<'d>, schema: &'t Schema, journal: &'t mut Journal) -> Self {
        Self { tx, schema, journal }
    }

    pub fn get_attribute(&self, key: &str) -> StoreResult<Option<String>> {
        codec::read_str(&*self.tx, &self.schema.attributes, key)
    }

    pub fn attributes(&self) -> StoreResult<BTreeMap<String, String>> {
        codec::read_string_map(&*self.tx, &self.schema.attributes)
    }

    pub fn get_cell(&self, id: &str) -> StoreResult<Option<Cell>> {
        codec::read_cell(&*self.tx, self.schema, id)
    }

    pub fn contains_cell(&self, id: &str) -> StoreResult<bool> {
        codec::contains_cell(&*self.tx, self.schema, id)
    }

    pub fn cells(&self) -> StoreResult<BTreeMap<String, Cell>> {
        codec::read_cells(&*self.tx, self.schema)
    }

    pub fn document(&self) -> StoreResult<GraphDocument> {
        let (root_elements, model_elements) = codec::read_elements(&*self.tx)?;
        Ok(GraphDocument {
            attributes: self.attributes()?,
            cells: self.cells()?,
            root_elements,
            model_elements,
        })
    }

    pub fn source(&self) -> StoreResult<String> {
        Ok(self.tx.text(&self.schema.source)?)
    }

    pub fn dirty(&self) -> StoreResult<bool> {
        codec::read_dirty(&*self.tx, self.schema)
    }

    pub fn set_attribute(&mut self, key: &str, value: &str) -> StoreResult<()> {
        self.journal.written = true;
        if self.get_attribute(key)?.as_deref() == Some(value) {
            return Ok(());
        }
        self.note_attribute(key)?;
        self.tx.put(&self.schema.attributes, key, value)?;
        Ok(())
    }

    pub fn remove_attribute(&mut self, key: &str) -> StoreResult<bool> {
        self.note_attribute(key)?;
        let removed = codec::delete_key(&mut *self.tx, &self.schema.attributes, key)?;
        self.journal.written |= removed;
        Ok(removed)
    }

    /// Inserts or updates a cell. Unchanged fields are not rewritten.
    pub fn set_cell(&mut self, cell: &Cell) -> StoreResult<()> {
        self.journal.written = true;
        self.note_cell(&cell.id)?;
        codec::write_cell(&mut *self.tx, self.schema, cell)
    }

    pub fn remove_cell(&mut self, id: &str) -> StoreResult<bool> {
        self.note_cell(id)?;
        let removed = codec::delete_key(&mut *self.tx, &self.schema.cells, id)?;
        self.journal.written |= removed;
        Ok(removed)
    }

    /// Makes the store hold exactly `doc`: stale attributes and cells are
    /// removed, the rest are synced field by field.
    pub fn replace_contents(&mut self, doc: &GraphDocument) -> StoreResult<()> {
        let current = self.attributes()?;
        for key in current.keys().chain(doc.attributes.keys()) {
            self.note_attribute(key)?;
        }
        codec::sync_string_map(&mut *self.tx, &self.schema.attributes, &doc.attributes)?;

        let stale: Vec<String> = self
            .tx
            .keys(&self.schema.cells)
            .filter(|id| !doc.cells.contains_key(id))
            .collect();
        for id in stale {
            self.remove_cell(&id)?;
        }
        for cell in doc.cells.values() {
            self.set_cell(cell)?;
        }

        if self.journal.elements.is_none() {
            self.journal.elements = Some(codec::read_elements(&*self.tx)?);
        }
        self.journal.written = true;
        codec::write_elements(&mut *self.tx, &doc.root_elements, &doc.model_elements)
    }

    pub fn set_source(&mut self, text: &str) -> StoreResult<()> {
        self.journal.written = true;
        self.note_source()?;
        codec::replace_text(&mut *self.tx, &self.schema.source, text)
    }

    /// Replaces the characters in `start..end` of the source buffer.
    pub fn splice_source(&mut self, start: usize, end: usize, text: &str) -> StoreResult<()> {
        let len = self.tx.length(&self.schema.source);
        let start = start.min(len);
        let end = end.clamp(start, len);
        self.journal.written = true;
        self.note_source()?;
        self.tx
            .splice_text(&self.schema.source, start, (end - start) as isize, text)?;
        Ok(())
    }

    pub fn set_dirty(&mut self, dirty: bool) -> StoreResult<()> {
        if self.journal.dirty.is_none() {
            self.journal.dirty = Some(self.dirty()?);
        }
        codec::sync_scalar(&mut *self.tx, &self.schema.state, "dirty", Some(dirty.into()))
    }

    /// Flags the document dirty after any content write, even one that left
    /// the content as it was, unless the transaction set the flag itself.
    pub(crate) fn mark_dirty_after_write(&mut self) -> StoreResult<()> {
        if self.journal.written && self.journal.dirty.is_none() {
            self.set_dirty(true)?;
        }
        Ok(())
    }

    fn note_attribute(&mut self, key: &str) -> StoreResult<()> {
        if !self.journal.attributes.contains_key(key) {
            let old = self.get_attribute(key)?;
            self.journal.attributes.insert(key.to_string(), old);
        }
        Ok(())
    }

    fn note_cell(&mut self, id: &str) -> StoreResult<()> {
        if !self.journal.cells.contains_key(id) {
            let old = self.get_cell(id)?;
            self.journal.cells.insert(id.to_string(), old);
        }
        Ok(())
    }

    fn note_source(&mut self) -> StoreResult<()> {
        if self.journal.source.is_none() {
            self.journal.source = Some(self.source()?);
        }
        Ok(())
    }
}
