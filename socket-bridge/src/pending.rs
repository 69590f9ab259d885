//! Correlation of asynchronous calls with their completions.
//!
//! Calls such as bind, setOption or a multicast join are answered later by a
//! `CallComplete` event carrying the [`CallId`] the call was issued with.
//! [`PendingCalls`] holds the continuation for each outstanding id; completing
//! an id removes it, so a second completion for the same id finds nothing.

use std::collections::HashMap;
use std::fmt;

/// Locally generated correlation id.  Monotonically increasing per
/// [`CallIds`] generator, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

/// Source of fresh [`CallId`]s.
#[derive(Debug, Default)]
pub struct CallIds {
    next: u64,
}

impl CallIds {
    pub fn next_id(&mut self) -> CallId {
        self.next += 1;
        CallId(self.next)
    }
}

/// Outstanding calls for one socket, each with an optional continuation `T`.
///
/// Internal calls (e.g. default options pushed at creation) are registered
/// with `None`: their completion is still expected, only nobody waits on it.
pub struct PendingCalls<T> {
    calls: HashMap<CallId, Option<T>>,
}

impl<T> Default for PendingCalls<T> {
    fn default() -> Self {
        Self {
            calls: HashMap::new(),
        }
    }
}

impl<T> fmt::Debug for PendingCalls<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.calls.keys().collect();
        ids.sort();
        f.debug_struct("PendingCalls").field("ids", &ids).finish()
    }
}

impl<T> PendingCalls<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id`.
    ///
    /// # Panics
    ///
    /// Registering the same id twice is a caller bug and panics.
    pub fn register(&mut self, id: CallId, continuation: Option<T>) {
        let previous = self.calls.insert(id, continuation);
        assert!(previous.is_none(), "{id} registered twice");
    }

    /// Remove `id`.  Outer `None`: the id was not outstanding.  Inner
    /// `None`: it was, but has no continuation.
    pub fn complete(&mut self, id: CallId) -> Option<Option<T>> {
        self.calls.remove(&id)
    }

    pub fn contains(&self, id: CallId) -> bool {
        self.calls.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Drop every continuation and return the ids that were outstanding.
    pub fn drain_ids(&mut self) -> Vec<CallId> {
        self.calls.drain().map(|(id, _)| id).collect()
    }
}
