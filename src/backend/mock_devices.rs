//! Mock device backend for testing.
//!
//! This backend serves a scripted list of keyboard devices instead of
//! querying the OS. Tests plug and unplug devices, or make the next scans
//! fail, and can count how many scans were run.

use super::{BackendError, DeviceBackend, RawDevice};
use log::debug;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Default)]
struct MockDeviceState {
    devices: Vec<RawDevice>,
    fail: bool,
    scans: usize,
}

/// Mock device backend with shared, scriptable state.
#[derive(Clone, Debug, Default)]
pub struct MockDeviceBackend {
    state: Arc<Mutex<MockDeviceState>>,
}

impl MockDeviceBackend {
    /// Create a mock backend with no devices attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock backend with the given devices attached.
    pub fn with_devices(devices: Vec<RawDevice>) -> Self {
        let backend = Self::new();
        backend.set_devices(devices);
        backend
    }

    /// Replace the attached device list.
    pub fn set_devices(&self, devices: Vec<RawDevice>) {
        self.lock().devices = devices;
    }

    /// Attach one device.
    pub fn plug(&self, id: &str, description: &str) {
        debug!("[MOCK DEVICES] plug: {} ({})", description, id);
        self.lock().devices.push(RawDevice::new(id, description));
    }

    /// Detach every device with the given id.
    pub fn unplug(&self, id: &str) {
        debug!("[MOCK DEVICES] unplug: {}", id);
        self.lock().devices.retain(|d| !d.id.eq_ignore_ascii_case(id));
    }

    /// Make subsequent scans fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.lock().fail = fail;
    }

    /// Number of scans served so far, failed ones included.
    pub fn scan_count(&self) -> usize {
        self.lock().scans
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockDeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DeviceBackend for MockDeviceBackend {
    fn keyboard_devices(&self) -> Result<Vec<RawDevice>, BackendError> {
        let mut state = self.lock();
        state.scans += 1;
        if state.fail {
            debug!("[MOCK DEVICES] scan #{} failing", state.scans);
            return Err(BackendError::Enumeration("mock enumeration failure".into()));
        }
        debug!("[MOCK DEVICES] scan #{}: {} devices", state.scans, state.devices.len());
        Ok(state.devices.clone())
    }
}
