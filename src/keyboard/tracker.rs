//! Presence tracker
//!
//! Owns the set of keyboards currently considered active. Every mutation and
//! every read goes through one lock, so readers never see a half-updated set.

use crate::keyboard::types::DeviceIdentity;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Difference between two presence sets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceDiff {
    pub added: Vec<DeviceIdentity>,
    pub removed: Vec<DeviceIdentity>,
    /// Count after the change
    pub count: usize,
}

impl PresenceDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Thread-safe set of active keyboards
#[derive(Debug, Default)]
pub struct PresenceTracker {
    active: Mutex<HashSet<DeviceIdentity>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a new set and return what changed.
    ///
    /// The diff is computed under the same lock as the swap, so it always
    /// describes one consistent before/after pair.
    pub fn replace_all(&self, new_set: HashSet<DeviceIdentity>) -> PresenceDiff {
        let mut active = self.lock();

        let added = new_set.difference(&active).cloned().collect();
        let removed = active.difference(&new_set).cloned().collect();
        *active = new_set;

        PresenceDiff {
            added,
            removed,
            count: active.len(),
        }
    }

    /// Add one keyboard. Returns false if it was already present.
    pub fn add(&self, id: DeviceIdentity) -> bool {
        self.lock().insert(id)
    }

    /// Remove one keyboard. Returns false if it was not present.
    pub fn remove(&self, id: &DeviceIdentity) -> bool {
        self.lock().remove(id)
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn contains(&self, id: &DeviceIdentity) -> bool {
        self.lock().contains(id)
    }

    /// Owned copy of the current set
    pub fn snapshot(&self) -> HashSet<DeviceIdentity> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<DeviceIdentity>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
