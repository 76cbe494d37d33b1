//! Mock startup registration for testing.

use super::{BackendError, StartupBackend};
use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Mock startup backend that keeps the registration in memory.
#[derive(Clone, Debug, Default)]
pub struct MockStartupBackend {
    enabled: Arc<AtomicBool>,
    fail: Arc<AtomicBool>,
}

impl MockStartupBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent registrations fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl StartupBackend for MockStartupBackend {
    fn set_enabled(&self, enable: bool) -> Result<(), BackendError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BackendError::Startup("mock startup failure".into()));
        }
        info!("[MOCK STARTUP] run at startup -> {}", enable);
        self.enabled.store(enable, Ordering::SeqCst);
        Ok(())
    }

    fn is_enabled(&self) -> Result<bool, BackendError> {
        Ok(self.enabled.load(Ordering::SeqCst))
    }
}
