//! Shared graph store: the replicated container behind a diagram.
//!
//! The store owns one automerge document (layout in `codec.rs`). All writes
//! go through [`SharedGraphStore::transact`], which commits atomically (a
//! failing closure rolls everything back) and then hands one [`GraphDelta`]
//! to every observer. Remote changes arriving
//! through [`SharedGraphStore::apply_changes`] or [`SharedGraphStore::merge`]
//! produce a delta with [`Origin::Remote`].
//!
//! The store checks nothing about graph structure: dangling references,
//! removal of the root cells and geometry validity are enforced by
//! [`crate::DrawioModel`], which is the API hosts should edit through.

mod codec;
mod delta;
mod txn;

pub use delta::{AttributeChange, CellChange, CellChangeKind, DirtyChange, GraphDelta, Origin};
pub use txn::GraphTxn;

pub(crate) use delta::StoreState;

use automerge::transaction::{Failure, Success};
use automerge::{ActorId, Automerge, AutomergeError, ChangeHash, ReadDoc};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

use crate::model::{Cell, GraphDocument};
use codec::Schema;
use txn::Journal;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("automerge error: {0}")]
    Automerge(#[from] AutomergeError),
    #[error("document is missing the `{0}` container")]
    Schema(&'static str),
    #[error("invalid stored JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Handle returned by [`SharedGraphStore::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Box<dyn FnMut(&GraphDelta)>;

pub struct SharedGraphStore {
    doc: Automerge,
    schema: Schema,
    observers: Vec<(ObserverId, Observer)>,
    next_observer: u64,
}

impl std::fmt::Debug for SharedGraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedGraphStore")
            .field("actor", &self.doc.get_actor().to_hex_string())
            .field("heads", &self.doc.get_heads())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl SharedGraphStore {
    /// Creates an empty replica with a fresh actor.
    pub fn new() -> StoreResult<Self> {
        let mut doc = Automerge::new();
        let schema = doc
            .transact::<_, _, StoreError>(|tx| Schema::create(tx))
            .map_err(|f| f.error)?
            .result;
        debug!(actor = %doc.get_actor(), "created graph store");
        Ok(Self::from_parts(doc, schema))
    }

    /// Loads a replica from bytes produced by [`SharedGraphStore::save`].
    pub fn load(bytes: &[u8]) -> StoreResult<Self> {
        let doc = Automerge::load(bytes)?;
        let schema = Schema::resolve(&doc)?;
        info!(bytes = bytes.len(), heads = doc.get_heads().len(), "loaded graph store");
        Ok(Self::from_parts(doc, schema))
    }

    /// A new replica with identical history and its own actor. Observers are
    /// not carried over.
    pub fn fork(&self) -> Self {
        Self::from_parts(self.doc.fork(), self.schema.clone())
    }

    fn from_parts(doc: Automerge, schema: Schema) -> Self {
        Self {
            doc,
            schema,
            observers: Vec::new(),
            next_observer: 0,
        }
    }

    pub fn actor(&self) -> &ActorId {
        self.doc.get_actor()
    }

    pub fn set_actor(&mut self, actor: ActorId) {
        self.doc.set_actor(actor);
    }

    // ---- replication ------------------------------------------------------

    pub fn save(&self) -> Vec<u8> {
        self.doc.save()
    }

    pub fn heads(&self) -> Vec<ChangeHash> {
        self.doc.get_heads()
    }

    /// Encoded changes not covered by `heads`; feed them to a peer's
    /// [`SharedGraphStore::apply_changes`].
    pub fn changes_since(&self, heads: &[ChangeHash]) -> Vec<u8> {
        self.doc.save_after(heads)
    }

    /// Applies changes from a peer and notifies observers with a remote delta.
    pub fn apply_changes(&mut self, bytes: &[u8]) -> StoreResult<GraphDelta> {
        self.absorb_remote(|doc| {
            let ops = doc.load_incremental(bytes)?;
            debug!(ops, "applied remote changes");
            Ok(())
        })
    }

    /// Pulls every change `other` has that this replica lacks.
    pub fn merge(&mut self, other: &mut SharedGraphStore) -> StoreResult<GraphDelta> {
        self.absorb_remote(|doc| {
            let hashes = doc.merge(&mut other.doc)?;
            debug!(changes = hashes.len(), "merged replica");
            Ok(())
        })
    }

    fn absorb_remote<F>(&mut self, apply: F) -> StoreResult<GraphDelta>
    where
        F: FnOnce(&mut Automerge) -> StoreResult<()>,
    {
        let before = self.state()?;
        apply(&mut self.doc)?;
        self.schema = Schema::resolve(&self.doc)?;
        let after = self.state()?;

        let delta = GraphDelta::between(&before, &after, Origin::Remote);
        if !delta.is_empty() {
            info!(cells = delta.cells.len(), attributes = delta.attributes.len(), "remote delta");
            self.emit(&delta);
        }
        Ok(delta)
    }

    // ---- reads ------------------------------------------------------------

    pub fn get_attribute(&self, key: &str) -> StoreResult<Option<String>> {
        codec::read_str(&self.doc, &self.schema.attributes, key)
    }

    pub fn attributes(&self) -> StoreResult<BTreeMap<String, String>> {
        codec::read_string_map(&self.doc, &self.schema.attributes)
    }

    pub fn get_cell(&self, id: &str) -> StoreResult<Option<Cell>> {
        codec::read_cell(&self.doc, &self.schema, id)
    }

    pub fn contains_cell(&self, id: &str) -> StoreResult<bool> {
        codec::contains_cell(&self.doc, &self.schema, id)
    }

    pub fn cells(&self) -> StoreResult<BTreeMap<String, Cell>> {
        codec::read_cells(&self.doc, &self.schema)
    }

    /// Ids in key order, without materializing the cells.
    pub fn cell_ids(&self) -> Vec<String> {
        self.doc.keys(&self.schema.cells).collect()
    }

    pub fn source(&self) -> StoreResult<String> {
        Ok(self.doc.text(&self.schema.source)?)
    }

    pub fn dirty(&self) -> StoreResult<bool> {
        codec::read_dirty(&self.doc, &self.schema)
    }

    /// Materializes attributes and cells.
    pub fn snapshot(&self) -> StoreResult<GraphDocument> {
        let (root_elements, model_elements) = codec::read_elements(&self.doc)?;
        Ok(GraphDocument {
            attributes: self.attributes()?,
            cells: self.cells()?,
            root_elements,
            model_elements,
        })
    }

    pub(crate) fn state(&self) -> StoreResult<StoreState> {
        Ok(StoreState {
            document: self.snapshot()?,
            source: self.source()?,
            dirty: self.dirty()?,
        })
    }

    // ---- writes -----------------------------------------------------------

    /// Runs `f` inside one automerge transaction.
    ///
    /// If `f` returns `Err` nothing is committed and no observer runs. On
    /// success the document is flagged dirty when `f` wrote content, even if
    /// the values were unchanged (unless `f` set the flag itself), and
    /// observers receive the delta, if non-empty.
    pub fn transact<F, O, E>(&mut self, f: F) -> Result<O, E>
    where
        F: FnOnce(&mut GraphTxn<'_, '_>) -> Result<O, E>,
        E: From<StoreError>,
    {
        let schema = self.schema.clone();
        let mut journal = Journal::default();

        let committed = self.doc.transact::<_, _, E>(|tx| {
            let mut txn = GraphTxn::new(tx, &schema, &mut journal);
            let out = f(&mut txn)?;
            txn.mark_dirty_after_write()?;
            Ok(out)
        });
        let out = match committed {
            Ok(Success { result, .. }) => result,
            Err(Failure { error, .. }) => {
                debug!("transaction rolled back");
                return Err(error);
            }
        };

        let delta = journal.delta(&self.doc, &self.schema)?;
        if !delta.is_empty() {
            debug!(
                cells = delta.cells.len(),
                attributes = delta.attributes.len(),
                source = delta.source_changed,
                "committed local delta"
            );
            self.emit(&delta);
        }
        Ok(out)
    }

    pub fn set_attribute(&mut self, key: &str, value: &str) -> StoreResult<()> {
        self.transact(|txn| txn.set_attribute(key, value))
    }

    pub fn remove_attribute(&mut self, key: &str) -> StoreResult<bool> {
        self.transact(|txn| txn.remove_attribute(key))
    }

    /// Writes `cell` as is; references are not checked here.
    pub fn set_cell(&mut self, cell: &Cell) -> StoreResult<()> {
        self.transact(|txn| txn.set_cell(cell))
    }

    pub fn remove_cell(&mut self, id: &str) -> StoreResult<bool> {
        self.transact(|txn| txn.remove_cell(id))
    }

    pub fn set_source(&mut self, text: &str) -> StoreResult<()> {
        self.transact(|txn| txn.set_source(text))
    }

    pub fn set_dirty(&mut self, dirty: bool) -> StoreResult<()> {
        self.transact(|txn| txn.set_dirty(dirty))
    }

    // ---- observers --------------------------------------------------------

    /// Registers `f` to run after every non-empty committed or merged delta,
    /// in registration order.
    pub fn observe<F>(&mut self, f: F) -> ObserverId
    where
        F: FnMut(&GraphDelta) + 'static,
    {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, Box::new(f)));
        id
    }

    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        self.observers.len() != before
    }

    pub fn clear_observers(&mut self) {
        self.observers.clear();
    }

    fn emit(&mut self, delta: &GraphDelta) {
        for (_, observer) in &mut self.observers {
            observer(delta);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Geometry;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder(store: &mut SharedGraphStore) -> Rc<RefCell<Vec<GraphDelta>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        store.observe(move |d| sink.borrow_mut().push(d.clone()));
        seen
    }

    #[test]
    fn new_store_is_empty_and_clean() {
        let store = SharedGraphStore::new().expect("store");
        assert!(store.cells().expect("cells").is_empty());
        assert!(store.attributes().expect("attrs").is_empty());
        assert_eq!(store.source().expect("source"), "");
        assert!(!store.dirty().expect("dirty"));
    }

    #[test]
    fn transaction_emits_one_delta_and_marks_dirty() {
        let mut store = SharedGraphStore::new().expect("store");
        let seen = recorder(&mut store);

        store
            .transact::<_, _, StoreError>(|txn| {
                txn.set_cell(&Cell::new("0"))?;
                txn.set_cell(&Cell::new("1").with_parent("0"))?;
                txn.set_attribute("grid", "1")
            })
            .expect("commit");

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        let delta = &seen[0];
        assert_eq!(delta.origin, Origin::Local);
        assert_eq!(delta.cells.len(), 2);
        assert_eq!(delta.attributes.len(), 1);
        assert_eq!(delta.dirty, Some(DirtyChange { old: false, new: true }));
        assert!(store.dirty().expect("dirty"));
        assert_eq!(store.cell_ids(), vec!["0", "1"]);
    }

    #[test]
    fn failed_transaction_rolls_back_without_notifying() {
        let mut store = SharedGraphStore::new().expect("store");
        let seen = recorder(&mut store);

        let result = store.transact::<_, (), StoreError>(|txn| {
            txn.set_cell(&Cell::new("0"))?;
            Err(StoreError::Schema("test"))
        });

        assert!(result.is_err());
        assert!(seen.borrow().is_empty());
        assert!(!store.contains_cell("0").expect("contains"));
        assert!(!store.dirty().expect("dirty"));
    }

    #[test]
    fn rewriting_identical_cell_only_flags_dirty() {
        let mut store = SharedGraphStore::new().expect("store");
        let cell = Cell::new_vertex("2", "1").with_geometry(Geometry::new(1.0, 2.0, 3.0, 4.0));
        store.set_cell(&cell).expect("first");
        store.set_dirty(false).expect("clean");

        let seen = recorder(&mut store);
        store.set_cell(&cell).expect("second");
        assert!(store.dirty().expect("dirty"));

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert!(!seen[0].has_content_changes());
        assert_eq!(seen[0].dirty, Some(DirtyChange { old: false, new: true }));
    }

    #[test]
    fn removing_missing_keys_is_not_a_write() {
        let mut store = SharedGraphStore::new().expect("store");
        assert!(!store.remove_cell("nope").expect("remove"));
        assert!(!store.remove_attribute("nope").expect("remove"));
        assert!(!store.dirty().expect("dirty"));
    }

    #[test]
    fn store_writes_skip_reference_checks() {
        let mut store = SharedGraphStore::new().expect("store");
        store
            .set_cell(&Cell::new_vertex("2", "missing"))
            .expect("unchecked write");
        let doc = store.snapshot().expect("snapshot");
        assert_eq!(doc.dangling_references(), vec![("2", "parent", "missing")]);
    }

    #[test]
    fn explicit_dirty_choice_wins_over_auto_flag() {
        let mut store = SharedGraphStore::new().expect("store");
        store
            .transact::<_, _, StoreError>(|txn| {
                txn.set_cell(&Cell::new("0"))?;
                txn.set_dirty(false)
            })
            .expect("commit");
        assert!(store.contains_cell("0").expect("contains"));
        assert!(!store.dirty().expect("dirty"));
    }

    #[test]
    fn source_splice_clamps_range() {
        let mut store = SharedGraphStore::new().expect("store");
        store.set_source("<a/>").expect("set");
        store
            .transact::<_, _, StoreError>(|txn| txn.splice_source(1, 99, "b/>"))
            .expect("splice");
        assert_eq!(store.source().expect("source"), "<b/>");
    }

    #[test]
    fn unobserve_stops_delivery() {
        let mut store = SharedGraphStore::new().expect("store");
        let count = Rc::new(RefCell::new(0));
        let c = Rc::clone(&count);
        let id = store.observe(move |_| *c.borrow_mut() += 1);

        store.set_attribute("a", "1").expect("a");
        assert!(store.unobserve(id));
        store.set_attribute("a", "2").expect("a");
        assert_eq!(*count.borrow(), 1);
        assert!(!store.unobserve(id));
    }

    #[test]
    fn forked_replicas_merge_field_by_field() {
        let mut left = SharedGraphStore::new().expect("store");
        left.set_cell(
            &Cell::new_vertex("2", "1")
                .with_style("fillColor=red;")
                .with_geometry(Geometry::new(0.0, 0.0, 10.0, 10.0)),
        )
        .expect("seed");
        let mut right = left.fork();

        let mut moved = left.get_cell("2").expect("get").expect("cell");
        moved.geometry = Some(Geometry::new(50.0, 60.0, 10.0, 10.0));
        left.set_cell(&moved).expect("move");

        let mut restyled = right.get_cell("2").expect("get").expect("cell");
        restyled.style = Some("fillColor=blue;".into());
        right.set_cell(&restyled).expect("restyle");

        let seen = recorder(&mut left);
        let delta = left.merge(&mut right).expect("merge");
        right.merge(&mut left).expect("merge back");

        let merged = left.get_cell("2").expect("get").expect("cell");
        assert_eq!(merged.style.as_deref(), Some("fillColor=blue;"));
        assert_eq!(merged.geometry.as_ref().and_then(|g| g.x), Some(50.0));
        assert_eq!(left.snapshot().expect("l"), right.snapshot().expect("r"));

        assert_eq!(delta.origin, Origin::Remote);
        assert!(delta.cell("2").is_some_and(CellChange::style_changed));
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn changes_since_carries_only_new_work() {
        let mut origin = SharedGraphStore::new().expect("store");
        origin.set_attribute("dx", "10").expect("seed");
        let mut replica = SharedGraphStore::load(&origin.save()).expect("load");

        let heads = origin.heads();
        origin.set_attribute("dx", "20").expect("edit");
        let delta = replica
            .apply_changes(&origin.changes_since(&heads))
            .expect("apply");

        assert_eq!(replica.get_attribute("dx").expect("dx").as_deref(), Some("20"));
        let change = delta.attribute("dx").expect("dx change");
        assert_eq!(change.old.as_deref(), Some("10"));
        assert_eq!(change.new.as_deref(), Some("20"));
    }

    #[test]
    fn applying_known_changes_is_quiet() {
        let mut origin = SharedGraphStore::new().expect("store");
        origin.set_attribute("dx", "10").expect("seed");
        let bytes = origin.save();
        let mut replica = SharedGraphStore::load(&bytes).expect("load");
        let seen = recorder(&mut replica);

        let delta = replica.apply_changes(&bytes).expect("apply");
        assert!(delta.is_empty());
        assert!(seen.borrow().is_empty());
    }
}
