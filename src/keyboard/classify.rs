//! Virtual-device classification and the exclusion filter

use crate::keyboard::constants::*;
use crate::keyboard::types::{normalize_id, Classification, VirtualReason};
use std::collections::HashSet;

/// Classify a device. Rules are checked in order and the first match wins.
///
/// Bus prefixes such as `HID\` are deliberately not used on their own: plenty
/// of real keyboards enumerate under the same prefixes as virtual ones.
pub fn classify(id: &str, description: &str) -> Classification {
    let id = normalize_id(id);
    let description = description.to_lowercase();

    if SYNTHETIC_ROOT_PREFIXES.iter().any(|p| id.starts_with(p)) {
        return Classification::Virtual(VirtualReason::SyntheticRoot);
    }

    if SYSTEM_DRIVER_MARKERS.iter().any(|m| id.contains(m)) {
        return Classification::Virtual(VirtualReason::SystemDriverNode);
    }

    if id.starts_with(REMOTE_SESSION_PREFIX)
        || id.contains(REMOTE_SESSION_ID_MARKER)
        || REMOTE_SESSION_WORDS.iter().any(|w| description.contains(w))
    {
        return Classification::Virtual(VirtualReason::RemoteSession);
    }

    if description.contains(VIRTUAL_WORD) {
        return Classification::Virtual(VirtualReason::VirtualDescription);
    }

    Classification::Real
}

/// User-configured set of device ids that never count as keyboards
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionList {
    ids: HashSet<String>,
}

impl ExclusionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an id; returns false if it was already excluded
    pub fn insert(&mut self, id: &str) -> bool {
        let key = normalize_id(id);
        if key.is_empty() {
            return false;
        }
        self.ids.insert(key)
    }

    /// Remove an id; returns false if it was not excluded
    pub fn remove(&mut self, id: &str) -> bool {
        self.ids.remove(&normalize_id(id))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn contains_key(&self, key: &str) -> bool {
        self.ids.contains(key)
    }
}

impl<S: AsRef<str>> FromIterator<S> for ExclusionList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut list = ExclusionList::new();
        for id in iter {
            list.insert(id.as_ref());
        }
        list
    }
}

/// Case-insensitive exclusion test
pub fn is_excluded(id: &str, exclusions: &ExclusionList) -> bool {
    exclusions.contains_key(&normalize_id(id))
}
