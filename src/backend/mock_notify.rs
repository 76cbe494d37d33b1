//! Manually driven notification source for testing.
//!
//! Tests call [`ManualNotificationSource::trigger`] to simulate the OS
//! reporting a device arrival or removal. The source can also be told to
//! fail on start, to exercise the poll-only fallback.

use super::{BackendError, DeviceSignal, NotificationSource};
use crossbeam_channel::Sender;
use log::debug;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Default)]
struct ManualState {
    sender: Option<Sender<DeviceSignal>>,
    fail_on_start: bool,
}

/// Notification source whose signals are fired by hand.
///
/// Clones share state, so a test can keep one handle and give the other to
/// the manager.
#[derive(Clone, Debug, Default)]
pub struct ManualNotificationSource {
    state: Arc<Mutex<ManualState>>,
}

impl ManualNotificationSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source whose `start` always fails.
    pub fn failing() -> Self {
        let source = Self::new();
        source.lock().fail_on_start = true;
        source
    }

    /// Deliver a signal. Returns false when the source is not started.
    pub fn trigger(&self, signal: DeviceSignal) -> bool {
        match &self.lock().sender {
            Some(sender) => sender.send(signal).is_ok(),
            None => false,
        }
    }

    /// Whether `start` succeeded and `stop` has not been called since.
    pub fn is_started(&self) -> bool {
        self.lock().sender.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NotificationSource for ManualNotificationSource {
    fn start(&mut self, signals: Sender<DeviceSignal>) -> Result<(), BackendError> {
        let mut state = self.lock();
        if state.fail_on_start {
            return Err(BackendError::Notification("mock registration failure".into()));
        }
        debug!("[MOCK NOTIFY] started");
        state.sender = Some(signals);
        Ok(())
    }

    fn stop(&mut self) {
        if self.lock().sender.take().is_some() {
            debug!("[MOCK NOTIFY] stopped");
        }
    }
}
