//! Mode switcher
//!
//! The single presence subscriber. Connect/disconnect events are forwarded
//! to the UI channel and, when auto-switch is on, re-arm the switch delay.
//! When the delay elapses the switcher reads the live posture, asks the
//! decision engine, and applies only an actual change.

use crate::backend::{BackendError, PostureBackend};
use crate::keyboard::{DeviceIdentity, PresenceTracker};
use crate::watcher::decision::{decide, Posture};
use crate::watcher::reconciler::{PresenceEvent, PresenceSubscriber};
use crate::watcher::scheduler::ScheduledTask;
use crossbeam_channel::{Sender, TrySendError};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;

/// Upper bound of the switch delay
pub const MAX_SWITCH_DELAY: Duration = Duration::from_millis(10_000);

/// Status events for the UI layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    KeyboardConnected { device: DeviceIdentity, count: usize },
    KeyboardDisconnected { device: DeviceIdentity, count: usize },
    ModeChanged(Posture),
    ModeSwitchFailed { target: Posture, reason: String },
}

/// Applies posture decisions behind the switch delay
pub struct ModeSwitcher<P: PostureBackend> {
    posture: P,
    tracker: Arc<PresenceTracker>,
    auto_switch: AtomicBool,
    delay_ms: AtomicU64,
    events: Sender<AppEvent>,
    /// Serializes read-decide-apply
    sync_lock: Mutex<()>,
    delay: ScheduledTask,
}

impl<P> ModeSwitcher<P>
where
    P: PostureBackend + Send + Sync + 'static,
{
    pub fn new(
        posture: P,
        tracker: Arc<PresenceTracker>,
        auto_switch: bool,
        delay: Duration,
        events: Sender<AppEvent>,
        runtime: Handle,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let on_elapsed = weak.clone();
            let delay_task = ScheduledTask::new("switch-delay", runtime, move || {
                if let Some(switcher) = on_elapsed.upgrade() {
                    switcher.on_delay_elapsed();
                }
            });

            Self {
                posture,
                tracker,
                auto_switch: AtomicBool::new(auto_switch),
                delay_ms: AtomicU64::new(clamp_delay_ms(delay)),
                events,
                sync_lock: Mutex::new(()),
                delay: delay_task,
            }
        })
    }

    fn on_delay_elapsed(&self) {
        if !self.is_auto_switch() {
            return;
        }
        if let Err(e) = self.sync_now() {
            warn!("Automatic mode switch failed: {}", e);
        }
    }

    /// Decide from current presence and the live posture, and apply at once.
    ///
    /// Returns the posture applied, or `None` when nothing had to change.
    pub fn sync_now(&self) -> Result<Option<Posture>, BackendError> {
        let _sync = self.sync_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.current_posture()?;
        let count = self.tracker.count();

        match decide(count, current) {
            Some(target) => {
                info!("{} keyboard(s), switching {} -> {}", count, current, target);
                self.apply(target)?;
                Ok(Some(target))
            }
            None => {
                debug!("{} keyboard(s), staying in {}", count, current);
                Ok(None)
            }
        }
    }

    /// Manual switch. Returns false when the posture already matched.
    pub fn switch_to(&self, target: Posture) -> Result<bool, BackendError> {
        let _sync = self.sync_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.current_posture()? == target {
            debug!("Already in {}", target);
            return Ok(false);
        }
        self.apply(target)?;
        Ok(true)
    }

    fn apply(&self, target: Posture) -> Result<(), BackendError> {
        match self.posture.set_tablet_mode(target.is_tablet()) {
            Ok(()) => {
                info!("✓ Switched to {}", target);
                self.emit(AppEvent::ModeChanged(target));
                Ok(())
            }
            Err(e) => {
                warn!("Failed to switch to {}: {}", target, e);
                self.emit(AppEvent::ModeSwitchFailed {
                    target,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Live posture read from the OS
    pub fn current_posture(&self) -> Result<Posture, BackendError> {
        self.posture.is_tablet_mode().map(Posture::from_tablet_flag)
    }

    pub fn set_auto_switch(&self, enabled: bool) {
        self.auto_switch.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.delay.cancel();
        }
    }

    pub fn is_auto_switch(&self) -> bool {
        self.auto_switch.load(Ordering::SeqCst)
    }

    /// Set the switch delay; values above 10 s are clamped
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(clamp_delay_ms(delay), Ordering::SeqCst);
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.load(Ordering::SeqCst))
    }

    pub fn is_switch_pending(&self) -> bool {
        self.delay.is_pending()
    }

    /// Cancel a pending delayed switch. Waits for one in progress.
    pub fn cancel(&self) {
        self.delay.cancel();
    }

    pub fn posture_backend(&self) -> &P {
        &self.posture
    }

    fn emit(&self, event: AppEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => debug!("UI event queue full, dropped {:?}", event),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl<P> PresenceSubscriber for ModeSwitcher<P>
where
    P: PostureBackend + Send + Sync + 'static,
{
    fn on_presence_event(&self, event: &PresenceEvent, count: usize) {
        let ui_event = match event {
            PresenceEvent::Connected(device) => AppEvent::KeyboardConnected {
                device: device.clone(),
                count,
            },
            PresenceEvent::Disconnected(device) => AppEvent::KeyboardDisconnected {
                device: device.clone(),
                count,
            },
        };
        self.emit(ui_event);

        if self.is_auto_switch() {
            self.delay.arm(self.delay());
        }
    }

    fn on_presence_known(&self, count: usize) {
        if self.is_auto_switch() {
            debug!("Presence resolved to {} keyboard(s), arming switch", count);
            self.delay.arm(self.delay());
        }
    }
}

fn clamp_delay_ms(delay: Duration) -> u64 {
    let clamped = delay.min(MAX_SWITCH_DELAY);
    u64::try_from(clamped.as_millis()).unwrap_or(10_000)
}
