//! Cancellable scheduled tasks
//!
//! A [`ScheduledTask`] wraps one callback that can be armed to run once after
//! a delay, or started on a fixed period. Arming while a run is pending
//! replaces it, which is what makes debouncing work. Tasks run on a tokio
//! runtime handle and do not depend on any UI toolkit.
//!
//! Every arm/cancel bumps a generation counter under the slot lock, and the
//! callback runs while holding that same lock. Once [`ScheduledTask::cancel`]
//! returns, no callback is running and no stale run can start.

use log::{error, trace};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

#[derive(Default)]
struct Slot {
    generation: u64,
    task: Option<JoinHandle<()>>,
    runs: u64,
}

impl Slot {
    /// Invalidate whatever is scheduled and return the new generation
    fn bump(&mut self) -> u64 {
        self.generation += 1;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.generation
    }
}

struct Shared {
    name: String,
    callback: Box<dyn Fn() + Send + Sync>,
    slot: Mutex<Slot>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the callback if `generation` is still current.
    /// Returns false when the schedule was replaced or cancelled.
    fn fire(&self, generation: u64, once: bool) -> bool {
        let mut slot = self.lock();
        if slot.generation != generation {
            return false;
        }
        if once {
            slot.task = None;
        }
        slot.runs += 1;

        trace!("Task '{}' firing (run #{})", self.name, slot.runs);
        if panic::catch_unwind(AssertUnwindSafe(|| (self.callback)())).is_err() {
            error!("Task '{}' panicked; the timer stays registered", self.name);
        }
        true
    }
}

/// A re-armable, cancellable timer callback.
///
/// The callback must not arm or cancel its own task.
pub struct ScheduledTask {
    runtime: Handle,
    shared: Arc<Shared>,
}

impl ScheduledTask {
    pub fn new<F>(name: impl Into<String>, runtime: Handle, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            runtime,
            shared: Arc::new(Shared {
                name: name.into(),
                callback: Box::new(callback),
                slot: Mutex::new(Slot::default()),
            }),
        }
    }

    /// Run once after `delay`, replacing any pending run
    pub fn arm(&self, delay: Duration) {
        let mut slot = self.shared.lock();
        let generation = slot.bump();
        let shared = Arc::clone(&self.shared);

        slot.task = Some(self.runtime.spawn(async move {
            time::sleep(delay).await;
            shared.fire(generation, true);
        }));
    }

    /// Run every `period`, first run one period from now. Replaces any
    /// pending schedule.
    pub fn start_repeating(&self, period: Duration) {
        let mut slot = self.shared.lock();
        let generation = slot.bump();
        let shared = Arc::clone(&self.shared);

        slot.task = Some(self.runtime.spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !shared.fire(generation, false) {
                    break;
                }
            }
        }));
    }

    /// Cancel any pending run. Waits for a run in progress to finish.
    pub fn cancel(&self) {
        self.shared.lock().bump();
    }

    /// Whether a run (or a repeating schedule) is pending
    pub fn is_pending(&self) -> bool {
        self.shared.lock().task.is_some()
    }

    /// Number of times the callback has run
    pub fn runs(&self) -> u64 {
        self.shared.lock().runs
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        // The owner may be dropped from inside this task's own callback,
        // which already holds the slot.
        match self.shared.slot.try_lock() {
            Ok(mut slot) => {
                slot.bump();
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                poisoned.into_inner().bump();
            }
            Err(TryLockError::WouldBlock) => {
                trace!("Task '{}' dropped while running", self.shared.name);
            }
        }
    }
}
