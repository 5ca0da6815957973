//! Change notification bridge.
//!
//! [`Signal`] is a small single-threaded multicast callback list. The
//! [`ChangeBridge`] subscribes to a [`SharedGraphStore`] and re-emits each
//! committed delta on the model's `content_changed` / `state_changed`
//! signals.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::store::{GraphDelta, ObserverId, SharedGraphStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

type Slot<T> = Rc<RefCell<dyn FnMut(&T)>>;

struct Slots<T> {
    next: u64,
    slots: Vec<(SlotId, Slot<T>)>,
}

/// Cloning a signal yields another handle to the same slot list.
pub struct Signal<T> {
    inner: Rc<RefCell<Slots<T>>>,
}

impl<T> Signal<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Slots {
                next: 0,
                slots: Vec::new(),
            })),
        }
    }

    pub fn connect<F>(&self, f: F) -> SlotId
    where
        F: FnMut(&T) + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        let id = SlotId(inner.next);
        inner.next += 1;
        inner.slots.push((id, Rc::new(RefCell::new(f))));
        id
    }

    pub fn disconnect(&self, id: SlotId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let before = inner.slots.len();
        inner.slots.retain(|(sid, _)| *sid != id);
        inner.slots.len() != before
    }

    /// Calls every connected slot in connection order. Slots may connect or
    /// disconnect while the signal is emitting; changes apply to the next
    /// emission.
    pub fn emit(&self, value: &T) {
        let slots: Vec<Slot<T>> = self
            .inner
            .borrow()
            .slots
            .iter()
            .map(|(_, slot)| Rc::clone(slot))
            .collect();
        for slot in slots {
            (slot.borrow_mut())(value);
        }
    }

    pub fn clear(&self) {
        self.inner.borrow_mut().slots.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal").field("slots", &self.len()).finish()
    }
}

/// Model state outside the cell content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateField {
    Dirty,
    ReadOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub field: StateField,
    pub old: bool,
    pub new: bool,
}

pub struct ChangeBridge;

impl ChangeBridge {
    /// Registers a store observer forwarding deltas to the two signals.
    ///
    /// A delta with content changes goes to `content`; a dirty flip goes to
    /// `state`, after the content emission of the same delta.
    pub fn attach(
        store: &mut SharedGraphStore,
        content: &Signal<GraphDelta>,
        state: &Signal<StateChange>,
    ) -> ObserverId {
        let content = content.clone();
        let state = state.clone();
        store.observe(move |delta| {
            if delta.has_content_changes() {
                content.emit(delta);
            }
            if let Some(dirty) = delta.dirty {
                state.emit(&StateChange {
                    field: StateField::Dirty,
                    old: dirty.old,
                    new: dirty.new,
                });
            }
        })
    }
}
