//! Concurrent id-keyed directory of callers.
//!
//! Used for both pending reply handlers (keyed by correlation id) and
//! provider request callers (keyed by participant id). Each operation is
//! atomic per key, so a concurrent `take` and `remove_where` never both
//! obtain the same entry.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::traits::RequestCaller;

/// Directory of provider request callers keyed by participant id.
pub type RequestCallerDirectory = CallerDirectory<Arc<dyn RequestCaller>>;

/// Thread-safe map from id to caller.
pub struct CallerDirectory<T> {
    entries: DashMap<String, T>,
    kind: &'static str,
}

impl<T: Clone> CallerDirectory<T> {
    /// Creates an empty directory. `kind` labels log lines.
    #[must_use]
    pub fn new(kind: &'static str) -> Self {
        Self {
            entries: DashMap::new(),
            kind,
        }
    }

    /// Inserts or replaces the entry for `id`, returning the previous one.
    pub fn add(&self, id: impl Into<String>, caller: T) -> Option<T> {
        let id = id.into();
        tracing::debug!(kind = self.kind, %id, "directory add");
        self.entries.insert(id, caller)
    }

    /// Inserts only if `id` is vacant. Hands the caller back if it is taken.
    ///
    /// # Errors
    ///
    /// Returns `Err(caller)` when an entry for `id` already exists.
    pub fn try_add(&self, id: impl Into<String>, caller: T) -> Result<(), T> {
        match self.entries.entry(id.into()) {
            Entry::Occupied(_) => Err(caller),
            Entry::Vacant(slot) => {
                slot.insert(caller);
                Ok(())
            }
        }
    }

    /// Removes and returns the entry for `id`.
    pub fn take(&self, id: &str) -> Option<T> {
        self.entries.remove(id).map(|(_, caller)| caller)
    }

    /// Returns a clone of the entry for `id`.
    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<T> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Removes every entry matching `predicate` and returns them.
    pub fn remove_where(&self, predicate: impl Fn(&T) -> bool) -> Vec<(String, T)> {
        let candidates: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        // Re-check under the shard lock; the entry may have been taken meanwhile.
        candidates
            .into_iter()
            .filter_map(|id| self.entries.remove_if(&id, |_, v| predicate(v)))
            .collect()
    }

    /// Removes and returns all entries.
    pub fn drain(&self) -> Vec<(String, T)> {
        self.remove_where(|_| true)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
