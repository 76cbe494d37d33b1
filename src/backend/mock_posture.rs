//! Mock posture backend for testing.
//!
//! This backend keeps the tablet flag in memory instead of writing the
//! registry, and records every posture it was asked to apply.

use super::{BackendError, PostureBackend};
use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Mock posture backend that records applied postures.
#[derive(Clone, Debug, Default)]
pub struct MockPostureBackend {
    tablet: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    fail_reads: Arc<AtomicBool>,
    alternate: Arc<AtomicBool>,
    applied: Arc<Mutex<Vec<bool>>>,
}

impl MockPostureBackend {
    /// Create a mock backend starting in desktop posture.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock backend starting in the given posture.
    pub fn starting_in(tablet: bool) -> Self {
        let backend = Self::new();
        backend.tablet.store(tablet, Ordering::SeqCst);
        backend
    }

    /// Change the flag behind the app's back, as other software might.
    pub fn set_external(&self, tablet: bool) {
        self.tablet.store(tablet, Ordering::SeqCst);
    }

    /// Make subsequent writes fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent reads fail.
    pub fn set_read_failing(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Every posture successfully applied, oldest first (`true` = tablet).
    pub fn applied(&self) -> Vec<bool> {
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the alternate method was last switched on.
    pub fn alternate_method(&self) -> bool {
        self.alternate.load(Ordering::SeqCst)
    }
}

impl PostureBackend for MockPostureBackend {
    fn is_tablet_mode(&self) -> Result<bool, BackendError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(BackendError::PostureRead("mock read failure".into()));
        }
        Ok(self.tablet.load(Ordering::SeqCst))
    }

    fn set_tablet_mode(&self, enable: bool) -> Result<(), BackendError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BackendError::PostureApply("mock write failure".into()));
        }
        info!("[MOCK POSTURE] tablet mode -> {}", enable);
        self.tablet.store(enable, Ordering::SeqCst);
        self.applied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(enable);
        Ok(())
    }

    fn set_alternate_method(&self, enabled: bool) {
        self.alternate.store(enabled, Ordering::SeqCst);
    }

    fn restart_shell(&self) -> Result<(), BackendError> {
        info!("[MOCK POSTURE] restart shell");
        Ok(())
    }
}
