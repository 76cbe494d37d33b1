//! Keyboard device type definitions
//!
//! This module defines the identity types shared by the enumerator, the
//! presence tracker and the reconciler.

use std::fmt;
use std::hash::{Hash, Hasher};

/// A keyboard device as reported by the OS.
///
/// Equality and hashing only look at the device instance id, compared
/// case-insensitively. The description is carried along for logs and UI.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    id: String,
    key: String,
    description: String,
}

impl DeviceIdentity {
    /// Create an identity. Returns `None` for an empty or blank id.
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Option<Self> {
        let id = id.into().trim().to_string();
        if id.is_empty() {
            return None;
        }

        let key = normalize_id(&id);
        Some(Self {
            id,
            key,
            description: description.into(),
        })
    }

    /// Device instance id as reported by the OS
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable description ("Unknown" when the OS gave none)
    pub fn description(&self) -> &str {
        if self.description.is_empty() {
            "Unknown"
        } else {
            &self.description
        }
    }

    /// Case-folded id used for comparisons
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Check whether this identity refers to the given raw id
    pub fn matches(&self, id: &str) -> bool {
        self.key == normalize_id(id)
    }
}

impl PartialEq for DeviceIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for DeviceIdentity {}

impl Hash for DeviceIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.id)
    }
}

/// Case-fold a device id for comparison
pub(crate) fn normalize_id(id: &str) -> String {
    id.trim().to_uppercase()
}

/// Why a device was classified as virtual
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualReason {
    /// Enumerated under the root or software device namespace
    SyntheticRoot,
    /// The generic HID keyboard driver node rather than a concrete device
    SystemDriverNode,
    /// Redirected keyboard of a remote desktop / terminal session
    RemoteSession,
    /// Description says "virtual"
    VirtualDescription,
}

/// Device classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Real,
    Virtual(VirtualReason),
}

impl Classification {
    pub fn is_virtual(&self) -> bool {
        matches!(self, Classification::Virtual(_))
    }
}

/// A candidate keyboard with its classification, used by the exclusion editor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyboardDevice {
    pub identity: DeviceIdentity,
    pub classification: Classification,
}

impl KeyboardDevice {
    /// Label shown in device lists; system devices get a marker
    pub fn display_text(&self) -> String {
        if self.classification.is_virtual() {
            format!("[system] {}", self.identity.description())
        } else {
            self.identity.description().to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_identity_rejects_empty_id() {
        assert!(DeviceIdentity::new("", "Keyboard").is_none());
        assert!(DeviceIdentity::new("   ", "Keyboard").is_none());
    }

    #[test]
    fn test_identity_equality_ignores_case_and_description() {
        let a = DeviceIdentity::new("HID\\VID_046D&PID_C31C\\7&1", "Logitech").unwrap();
        let b = DeviceIdentity::new("hid\\vid_046d&pid_c31c\\7&1", "something else").unwrap();
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(!set.insert(b));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_identity_matches_raw_id() {
        let id = DeviceIdentity::new("BTHENUM\\{00001124}\\8&ABC", "BT Keyboard").unwrap();
        assert!(id.matches("bthenum\\{00001124}\\8&abc"));
        assert!(!id.matches("BTHENUM\\{00001124}\\8&ABD"));
    }

    #[test]
    fn test_missing_description_shows_unknown() {
        let id = DeviceIdentity::new("HID\\X", "").unwrap();
        assert_eq!(id.description(), "Unknown");
    }

    #[test]
    fn test_display_text_marks_system_devices() {
        let device = KeyboardDevice {
            identity: DeviceIdentity::new("ROOT\\RDP_KBD\\0000", "Terminal Server Keyboard").unwrap(),
            classification: Classification::Virtual(VirtualReason::SyntheticRoot),
        };
        assert_eq!(device.display_text(), "[system] Terminal Server Keyboard");
    }
}
