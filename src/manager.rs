//! High-level tablet mode manager
//!
//! This module ties the pieces together: it owns the timer runtime, the
//! presence tracker, the reconciler, the mode switcher and the notification
//! source, and forwards raw device signals to the reconciler from a
//! dedicated pump thread.

use crate::backend::{
    BackendError, DeviceBackend, DeviceSignal, NotificationSource, PostureBackend,
};
use crate::keyboard::{KeyboardDevice, KeyboardEnumerator, PresenceDiff, PresenceTracker};
use crate::settings::{AppSettings, ConfigError};
use crate::watcher::{
    AppEvent, ModeSwitcher, PassTrigger, Posture, PresenceSubscriber, Reconciler,
};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};

/// How often the pump re-checks the running flag
const PUMP_TIMEOUT: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Manager is already running")]
    AlreadyRunning,

    #[error("Failed to start manager threads: {0}")]
    Runtime(#[from] io::Error),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Snapshot for the tray tooltip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// Live posture, `None` when it could not be read
    pub posture: Option<Posture>,
    pub keyboard_count: usize,
}

/// Manager for automatic tablet/desktop switching
pub struct TabletModeManager<D, P>
where
    D: DeviceBackend + Send + Sync + 'static,
    P: PostureBackend + Send + Sync + 'static,
{
    settings: AppSettings,
    /// Timer runtime; taken on drop
    runtime: Option<Runtime>,
    tracker: Arc<PresenceTracker>,
    reconciler: Arc<Reconciler<D>>,
    switcher: Arc<ModeSwitcher<P>>,
    notifications: Option<Box<dyn NotificationSource>>,
    signal_sender: Sender<DeviceSignal>,
    signal_receiver: Receiver<DeviceSignal>,
    event_receiver: Receiver<AppEvent>,
    /// Running flag
    running: Arc<AtomicBool>,
    pump: Option<JoinHandle<()>>,
}

impl<D, P> TabletModeManager<D, P>
where
    D: DeviceBackend + Send + Sync + 'static,
    P: PostureBackend + Send + Sync + 'static,
{
    /// Create a manager. Without a notification source it relies on polling.
    ///
    /// Must not be created or dropped from inside an async context.
    pub fn new(settings: AppSettings, devices: D, posture: P) -> Result<Self, ManagerError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("tabletmode-timer")
            .enable_time()
            .build()?;
        let handle = runtime.handle().clone();

        let (event_sender, event_receiver) = bounded(100);
        let (signal_sender, signal_receiver) = bounded(64);

        posture.set_alternate_method(settings.use_alt_posture_method);

        let tracker = Arc::new(PresenceTracker::new());
        let switcher = ModeSwitcher::new(
            posture,
            Arc::clone(&tracker),
            settings.auto_switch_enabled,
            settings.switch_delay(),
            event_sender,
            handle.clone(),
        );
        let subscriber: Arc<dyn PresenceSubscriber> = switcher.clone();
        let reconciler = Reconciler::new(
            KeyboardEnumerator::new(devices),
            Arc::clone(&tracker),
            settings.exclusion_list(),
            subscriber,
            settings.debounce(),
            handle,
        );

        Ok(Self {
            settings,
            runtime: Some(runtime),
            tracker,
            reconciler,
            switcher,
            notifications: None,
            signal_sender,
            signal_receiver,
            event_receiver,
            running: Arc::new(AtomicBool::new(false)),
            pump: None,
        })
    }

    /// Use `source` for device arrival/removal signals
    pub fn with_notification_source(mut self, source: Box<dyn NotificationSource>) -> Self {
        self.notifications = Some(source);
        self
    }

    /// Scan, apply the initial posture, and start listening and polling
    pub fn start(&mut self) -> Result<(), ManagerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ManagerError::AlreadyRunning);
        }

        info!("Starting tablet mode manager...");

        // An unknown presence must not drive a switch; the first good poll
        // pass arms the decision instead.
        if self.reconciler.run_pass(PassTrigger::Startup).is_some() {
            info!("{} keyboard(s) present", self.tracker.count());
            if self.settings.auto_switch_enabled {
                if let Err(e) = self.switcher.sync_now() {
                    warn!("Initial mode sync failed: {}", e);
                }
            }
        } else {
            warn!("Initial keyboard scan failed, polling will retry");
        }

        self.reconciler.start_polling(self.settings.poll_interval());
        if let Err(e) = self.start_pump_thread() {
            self.reconciler.stop();
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        if let Some(source) = self.notifications.as_mut() {
            if let Err(e) = source.start(self.signal_sender.clone()) {
                warn!("{}; falling back to polling only", e);
            }
        } else {
            info!("No notification source, polling only");
        }

        info!("✓ Manager started! Watching for keyboards...");
        Ok(())
    }

    fn start_pump_thread(&mut self) -> Result<(), ManagerError> {
        let receiver = self.signal_receiver.clone();
        let running = Arc::clone(&self.running);
        let reconciler = Arc::clone(&self.reconciler);

        let handle = thread::Builder::new()
            .name("notification-pump".to_string())
            .spawn(move || {
                debug!("Notification pump started");

                while running.load(Ordering::SeqCst) {
                    match receiver.recv_timeout(PUMP_TIMEOUT) {
                        Ok(signal) => {
                            debug!("Device signal: {:?}", signal);
                            reconciler.notify();
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => {
                            warn!("Device signal channel disconnected");
                            break;
                        }
                    }
                }

                debug!("Notification pump stopped");
            })?;

        self.pump = Some(handle);
        Ok(())
    }

    /// Stop listening and cancel every timer. Idempotent.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping tablet mode manager...");

        if let Some(source) = self.notifications.as_mut() {
            source.stop();
        }
        if let Some(pump) = self.pump.take() {
            if pump.join().is_err() {
                warn!("Notification pump panicked");
            }
        }

        self.reconciler.stop();
        self.switcher.cancel();
        self.tracker.clear();

        info!("✓ Tablet mode manager stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> Status {
        let posture = match self.switcher.current_posture() {
            Ok(posture) => Some(posture),
            Err(e) => {
                debug!("Posture unavailable: {}", e);
                None
            }
        };
        Status {
            posture,
            keyboard_count: self.tracker.count(),
        }
    }

    /// Rescan now and, with auto-switch on, apply the result immediately.
    ///
    /// Returns `None` when enumeration failed or the manager is stopped.
    pub fn rescan(&self) -> Option<PresenceDiff> {
        if !self.is_running() {
            debug!("Rescan ignored, manager is stopped");
            return None;
        }
        let diff = self.reconciler.run_pass(PassTrigger::Manual)?;
        if self.settings.auto_switch_enabled {
            self.switcher.cancel();
            if let Err(e) = self.switcher.sync_now() {
                warn!("Mode sync after rescan failed: {}", e);
            }
        }
        Some(diff)
    }

    /// Manual override. Returns false when the posture already matched.
    pub fn switch_to(&self, posture: Posture) -> Result<bool, ManagerError> {
        Ok(self.switcher.switch_to(posture)?)
    }

    pub fn set_auto_switch(&mut self, enabled: bool) {
        info!("Auto switch {}", if enabled { "enabled" } else { "disabled" });
        self.settings.auto_switch_enabled = enabled;
        self.switcher.set_auto_switch(enabled);
    }

    pub fn set_show_notifications(&mut self, enabled: bool) {
        self.settings.show_notifications = enabled;
    }

    /// Apply edited settings to the running components.
    ///
    /// A changed exclusion list triggers a full rescan while running. When
    /// stopped the settings are only stored and the next `start()` scans.
    pub fn apply_settings(&mut self, settings: &AppSettings) -> Result<(), ManagerError> {
        settings.validate()?;

        self.switcher.set_auto_switch(settings.auto_switch_enabled);
        self.switcher.set_delay(settings.switch_delay());
        self.switcher
            .posture_backend()
            .set_alternate_method(settings.use_alt_posture_method);
        self.reconciler.set_quiet_window(settings.debounce());

        if self.is_running() && settings.poll_interval_ms != self.settings.poll_interval_ms {
            self.reconciler.start_polling(settings.poll_interval());
        }

        self.settings = settings.clone();
        if !self.is_running() {
            self.reconciler.replace_exclusions(settings.exclusion_list());
            info!("Settings stored, applied on next start");
            return Ok(());
        }

        if self.reconciler.set_exclusions(settings.exclusion_list()).is_some()
            && settings.auto_switch_enabled
        {
            if let Err(e) = self.switcher.sync_now() {
                warn!("Mode sync after settings change failed: {}", e);
            }
        }

        info!("Settings applied");
        Ok(())
    }

    /// Save the current settings, reporting success as a flag
    pub fn save_settings(&self) -> bool {
        match self.settings.save() {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to save settings: {}", e);
                false
            }
        }
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    /// Every keyboard the OS reports, virtual ones included, for the
    /// exclusion editor
    pub fn keyboard_devices(&self) -> Result<Vec<KeyboardDevice>, ManagerError> {
        Ok(self.reconciler.enumerator().list_devices()?)
    }

    pub fn restart_shell(&self) -> Result<(), ManagerError> {
        Ok(self.switcher.posture_backend().restart_shell()?)
    }

    /// Status events for the UI layer
    pub fn event_receiver(&self) -> &Receiver<AppEvent> {
        &self.event_receiver
    }
}

impl<D, P> Drop for TabletModeManager<D, P>
where
    D: DeviceBackend + Send + Sync + 'static,
    P: PostureBackend + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.stop();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
