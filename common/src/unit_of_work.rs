//! Staged writes that become visible together.
//!
//! Stores validate and reserve keys when a write is staged, then hand the
//! unit a write closure and an undo closure. `commit` applies every write in
//! staging order and releases the events recorded along the way. A unit that
//! is dropped without committing runs its undo closures in reverse order, so
//! reservations are released and no event is ever published.

use crate::DeskEvent;

type Action = Box<dyn FnOnce() + Send>;

/// A batch of staged writes plus the events they produce.
pub struct UnitOfWork<E = DeskEvent> {
    writes: Vec<Action>,
    undo: Vec<Action>,
    events: Vec<E>,
    committed: bool,
}

impl<E> UnitOfWork<E> {
    pub fn new() -> Self {
        Self {
            writes: Vec::new(),
            undo: Vec::new(),
            events: Vec::new(),
            committed: false,
        }
    }

    /// Stage a write. Writes must not fail; all checks happen before staging.
    pub fn stage(&mut self, write: impl FnOnce() + Send + 'static) {
        self.writes.push(Box::new(write));
    }

    /// Register an action to run if the unit is abandoned.
    pub fn on_rollback(&mut self, undo: impl FnOnce() + Send + 'static) {
        self.undo.push(Box::new(undo));
    }

    /// Record an event to release after commit.
    pub fn emit(&mut self, event: E) {
        self.events.push(event);
    }

    /// Number of staged writes.
    pub fn staged_writes(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.events.is_empty()
    }

    /// Apply every staged write and return the events.
    pub fn commit(mut self) -> Vec<E> {
        self.committed = true;
        self.undo.clear();
        for write in std::mem::take(&mut self.writes) {
            write();
        }
        std::mem::take(&mut self.events)
    }
}

impl<E> Default for UnitOfWork<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Drop for UnitOfWork<E> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        while let Some(undo) = self.undo.pop() {
            undo();
        }
    }
}
