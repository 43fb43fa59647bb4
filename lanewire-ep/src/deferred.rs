//! Slow-path work queue.
//!
//! Work that must not run from completion or pending-retry context (freeing
//! requests, destroying transports) is registered here and run by the worker
//! at the end of a progress call. Every entry is one-shot: dispatch removes it
//! before it runs.

use std::collections::VecDeque;

use lanewire_core::pool::RequestId;

/// Handle of a registered entry.
pub type DeferredId = u64;

/// Kinds of deferred work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredWork {
    /// Continue starting flushes on lanes a request has not reached yet.
    Resume(RequestId),
    /// Every lane is flushed: run the flushed handler, then complete.
    Flushed(RequestId),
}

impl DeferredWork {
    #[must_use]
    pub const fn request(&self) -> RequestId {
        match self {
            Self::Resume(req) | Self::Flushed(req) => *req,
        }
    }
}

#[derive(Debug, Default)]
pub struct DeferredQueue {
    entries: VecDeque<(DeferredId, DeferredWork)>,
    next_id: DeferredId,
}

impl DeferredQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, work: DeferredWork) -> DeferredId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push_back((id, work));
        id
    }

    /// Remove an entry. Returns `false` if it was not registered.
    pub fn unregister(&mut self, id: DeferredId) -> bool {
        self.take(id).is_some()
    }

    /// Remove an entry, returning its work.
    pub fn take(&mut self, id: DeferredId) -> Option<DeferredWork> {
        let pos = self.entries.iter().position(|(entry, _)| *entry == id)?;
        self.entries.remove(pos).map(|(_, work)| work)
    }

    /// Ids registered right now, oldest first.
    ///
    /// Entries registered while these run are left for the next dispatch.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DeferredId> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry.
    pub fn clear(&mut self) -> Vec<DeferredWork> {
        self.entries.drain(..).map(|(_, work)| work).collect()
    }
}
