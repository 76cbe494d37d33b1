//! One-shot keyboard enumeration
//!
//! Wraps a [`DeviceBackend`] and turns its raw listing into filtered
//! [`DeviceIdentity`] values. Entries without an id are dropped, virtual
//! devices are classified out, and duplicates collapse case-insensitively.

use crate::backend::{BackendError, DeviceBackend};
use crate::keyboard::classify::classify;
use crate::keyboard::types::{DeviceIdentity, KeyboardDevice};
use log::{debug, warn};
use std::collections::HashSet;

/// Keyboard enumerator over a device backend
pub struct KeyboardEnumerator<D: DeviceBackend> {
    backend: D,
}

impl<D: DeviceBackend> KeyboardEnumerator<D> {
    pub fn new(backend: D) -> Self {
        Self { backend }
    }

    /// Access the underlying backend
    pub fn backend(&self) -> &D {
        &self.backend
    }

    /// Scan for real keyboards.
    ///
    /// An `Err` means "currently unknown" and must never be read as
    /// "no keyboards attached".
    pub fn scan(&self) -> Result<HashSet<DeviceIdentity>, BackendError> {
        let devices = self.list_devices()?;

        let real: HashSet<DeviceIdentity> = devices
            .into_iter()
            .filter(|d| !d.classification.is_virtual())
            .map(|d| d.identity)
            .collect();

        debug!("Scan found {} real keyboard(s)", real.len());
        Ok(real)
    }

    /// List every keyboard-class device with its classification
    pub fn list_devices(&self) -> Result<Vec<KeyboardDevice>, BackendError> {
        let raw = self.backend.keyboard_devices().map_err(|e| {
            warn!("Keyboard enumeration failed: {}", e);
            e
        })?;

        let mut seen = HashSet::new();
        let mut devices = Vec::with_capacity(raw.len());

        for entry in raw {
            let Some(identity) = DeviceIdentity::new(entry.id, entry.description) else {
                debug!("Skipping device without an id");
                continue;
            };

            if !seen.insert(identity.clone()) {
                continue;
            }

            let classification = classify(identity.id(), identity.description());
            if classification.is_virtual() {
                debug!("  filtered {:?}: {}", classification, identity);
            } else {
                debug!("  keyboard: {}", identity);
            }

            devices.push(KeyboardDevice {
                identity,
                classification,
            });
        }

        Ok(devices)
    }
}
