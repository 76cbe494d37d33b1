//! Debounced change reconciler and poll fallback
//!
//! Raw device notifications only mark a refresh as pending and (re)arm the
//! quiet-window timer, so a burst of notifications from one plug or unplug
//! collapses into a single rescan. A repeating poll runs the same pass as a
//! backstop for drivers that never notify.
//!
//! Each pass scans, applies the exclusion filter, swaps the presence set and
//! reports the difference to the subscriber as connect/disconnect events.

use crate::backend::DeviceBackend;
use crate::keyboard::{is_excluded, DeviceIdentity, ExclusionList, KeyboardEnumerator};
use crate::keyboard::{PresenceDiff, PresenceTracker};
use crate::watcher::scheduler::ScheduledTask;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::runtime::Handle;

const UNKNOWN_COUNT: usize = usize::MAX;

/// A change in keyboard presence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    Connected(DeviceIdentity),
    Disconnected(DeviceIdentity),
}

/// The single consumer of presence events
pub trait PresenceSubscriber: Send + Sync {
    /// Called once per added or removed keyboard; `count` is the presence
    /// count after the whole pass.
    fn on_presence_event(&self, event: &PresenceEvent, count: usize);

    /// Called once when a pass succeeds after presence was unknown (a failed
    /// startup scan), even if nothing was added or removed.
    fn on_presence_known(&self, _count: usize) {}
}

/// What started a reconciliation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassTrigger {
    Startup,
    Notification,
    Poll,
    Manual,
    Exclusions,
}

/// Debounced reconciler over a device backend
pub struct Reconciler<D: DeviceBackend> {
    enumerator: KeyboardEnumerator<D>,
    tracker: Arc<PresenceTracker>,
    exclusions: RwLock<ExclusionList>,
    subscriber: Arc<dyn PresenceSubscriber>,
    /// A coalesced refresh is owed
    pending: AtomicBool,
    quiet_window_ms: AtomicU64,
    last_count: AtomicUsize,
    passes: AtomicU64,
    /// Serializes passes so each diff uses one before/after pair
    pass_lock: Mutex<()>,
    debounce: ScheduledTask,
    poll: ScheduledTask,
}

impl<D> Reconciler<D>
where
    D: DeviceBackend + Send + Sync + 'static,
{
    pub fn new(
        enumerator: KeyboardEnumerator<D>,
        tracker: Arc<PresenceTracker>,
        exclusions: ExclusionList,
        subscriber: Arc<dyn PresenceSubscriber>,
        quiet_window: Duration,
        runtime: Handle,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let on_quiet = weak.clone();
            let debounce = ScheduledTask::new("debounce", runtime.clone(), move || {
                if let Some(reconciler) = on_quiet.upgrade() {
                    reconciler.on_quiet_window();
                }
            });

            let on_poll = weak.clone();
            let poll = ScheduledTask::new("poll", runtime, move || {
                if let Some(reconciler) = on_poll.upgrade() {
                    reconciler.run_pass(PassTrigger::Poll);
                }
            });

            Self {
                enumerator,
                tracker,
                exclusions: RwLock::new(exclusions),
                subscriber,
                pending: AtomicBool::new(false),
                quiet_window_ms: AtomicU64::new(duration_ms(quiet_window)),
                last_count: AtomicUsize::new(UNKNOWN_COUNT),
                passes: AtomicU64::new(0),
                pass_lock: Mutex::new(()),
                debounce,
                poll,
            }
        })
    }

    /// Handle one raw device notification
    pub fn notify(&self) {
        self.pending.store(true, Ordering::SeqCst);
        self.debounce.arm(self.quiet_window());
    }

    /// Debounce timer fired.
    ///
    /// A notification landing during a pass sets the flag again and is
    /// picked up by the next loop iteration or its own re-armed timer.
    fn on_quiet_window(&self) {
        while self.pending.swap(false, Ordering::SeqCst) {
            self.run_pass(PassTrigger::Notification);
        }
    }

    /// Run one full reconciliation pass.
    ///
    /// Returns `None` when enumeration failed; presence is left untouched.
    pub fn run_pass(&self, trigger: PassTrigger) -> Option<PresenceDiff> {
        let _pass = self.pass_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let scanned = match self.enumerator.scan() {
            Ok(set) => set,
            Err(e) => {
                warn!("{:?} pass skipped, presence unchanged: {}", trigger, e);
                return None;
            }
        };

        let active: HashSet<DeviceIdentity> = {
            let exclusions = self.exclusions.read().unwrap_or_else(PoisonError::into_inner);
            scanned
                .into_iter()
                .filter(|d| {
                    let excluded = is_excluded(d.id(), &exclusions);
                    if excluded {
                        debug!("  excluded by settings: {}", d);
                    }
                    !excluded
                })
                .collect()
        };

        let diff = self.tracker.replace_all(active);
        self.passes.fetch_add(1, Ordering::SeqCst);

        let previous = self.last_count.swap(diff.count, Ordering::SeqCst);
        if previous != UNKNOWN_COUNT && previous != diff.count {
            info!("{:?} pass: keyboard count {} -> {}", trigger, previous, diff.count);
        } else {
            debug!("{:?} pass: {} keyboard(s)", trigger, diff.count);
        }
        if previous == UNKNOWN_COUNT && trigger != PassTrigger::Startup {
            info!("Keyboard presence known again: {} keyboard(s)", diff.count);
            self.subscriber.on_presence_known(diff.count);
        }

        for id in &diff.added {
            info!("Keyboard connected: {}", id);
            self.subscriber
                .on_presence_event(&PresenceEvent::Connected(id.clone()), diff.count);
        }
        for id in &diff.removed {
            info!("Keyboard disconnected: {} ({} remaining)", id, diff.count);
            self.subscriber
                .on_presence_event(&PresenceEvent::Disconnected(id.clone()), diff.count);
        }

        Some(diff)
    }

    /// Replace the exclusion list and rebuild presence from a full rescan
    pub fn set_exclusions(&self, exclusions: ExclusionList) -> Option<PresenceDiff> {
        if !self.replace_exclusions(exclusions) {
            return None;
        }
        self.run_pass(PassTrigger::Exclusions)
    }

    /// Store a new exclusion list without scanning. Returns false when the
    /// list is unchanged.
    pub fn replace_exclusions(&self, exclusions: ExclusionList) -> bool {
        let mut current = self.exclusions.write().unwrap_or_else(PoisonError::into_inner);
        if *current == exclusions {
            return false;
        }
        info!("Exclusion list updated ({} device(s))", exclusions.len());
        *current = exclusions;
        true
    }

    pub fn exclusions(&self) -> ExclusionList {
        self.exclusions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Start (or restart with a new period) the poll fallback
    pub fn start_polling(&self, period: Duration) {
        debug!("Polling keyboards every {:?}", period);
        self.poll.start_repeating(period);
    }

    /// Cancel the debounce and poll timers. Waits for a pass in progress.
    pub fn stop(&self) {
        self.poll.cancel();
        self.debounce.cancel();
        self.pending.store(false, Ordering::SeqCst);
        self.last_count.store(UNKNOWN_COUNT, Ordering::SeqCst);
    }

    pub fn set_quiet_window(&self, window: Duration) {
        self.quiet_window_ms.store(duration_ms(window), Ordering::SeqCst);
    }

    pub fn quiet_window(&self) -> Duration {
        Duration::from_millis(self.quiet_window_ms.load(Ordering::SeqCst))
    }

    pub fn is_refresh_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_polling(&self) -> bool {
        self.poll.is_pending()
    }

    /// Number of completed passes
    pub fn pass_count(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    pub fn tracker(&self) -> &Arc<PresenceTracker> {
        &self.tracker
    }

    pub fn enumerator(&self) -> &KeyboardEnumerator<D> {
        &self.enumerator
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, MockDeviceBackend, RawDevice};
    use crate::watcher::decision::{decide, Posture};
    use crossbeam_channel::{bounded, Receiver, Sender};
    use std::thread;
    use std::time::Instant;
    use tokio::time;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<PresenceEvent>>,
        known: Mutex<Vec<usize>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<PresenceEvent> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    impl PresenceSubscriber for Recorder {
        fn on_presence_event(&self, event: &PresenceEvent, _count: usize) {
            self.events.lock().unwrap().push(event.clone());
        }

        fn on_presence_known(&self, count: usize) {
            self.known.lock().unwrap().push(count);
        }
    }

    const WINDOW: Duration = Duration::from_millis(300);

    fn setup(
        backend: &MockDeviceBackend,
        exclusions: &[&str],
    ) -> (Arc<Reconciler<MockDeviceBackend>>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let reconciler = Reconciler::new(
            KeyboardEnumerator::new(backend.clone()),
            Arc::new(PresenceTracker::new()),
            exclusions.iter().collect(),
            recorder.clone(),
            WINDOW,
            Handle::current(),
        );
        (reconciler, recorder)
    }

    fn id(raw: &str) -> DeviceIdentity {
        DeviceIdentity::new(raw, "").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_notifications_runs_one_pass() {
        let backend = MockDeviceBackend::new();
        let (reconciler, recorder) = setup(&backend, &[]);

        backend.plug("HID\\KBD\\1", "USB Keyboard");
        for _ in 0..5 {
            reconciler.notify();
            time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(backend.scan_count(), 0);
        assert!(reconciler.is_refresh_pending());

        time::sleep(Duration::from_millis(400)).await;
        assert_eq!(reconciler.pass_count(), 1);
        assert_eq!(backend.scan_count(), 1);
        assert!(!reconciler.is_refresh_pending());
        assert_eq!(recorder.take(), vec![PresenceEvent::Connected(id("HID\\KBD\\1"))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_excluded_device_is_not_present() {
        let backend = MockDeviceBackend::with_devices(vec![
            RawDevice::new("HID\\A", "Keyboard A"),
            RawDevice::new("HID\\B", "Keyboard B"),
        ]);
        let (reconciler, _) = setup(&backend, &["hid\\b"]);

        let diff = reconciler.run_pass(PassTrigger::Startup).unwrap();
        let tracker = reconciler.tracker();
        assert_eq!(diff.count, 1);
        assert!(tracker.contains(&id("HID\\A")));
        assert!(!tracker.contains(&id("HID\\B")));
        assert_eq!(decide(tracker.count(), Posture::Tablet), Some(Posture::Desktop));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_notification_empties_presence() {
        let backend = MockDeviceBackend::with_devices(vec![RawDevice::new("HID\\A", "Keyboard A")]);
        let (reconciler, recorder) = setup(&backend, &[]);
        reconciler.run_pass(PassTrigger::Startup);
        recorder.take();

        backend.unplug("HID\\A");
        reconciler.notify();
        time::sleep(Duration::from_millis(350)).await;

        assert_eq!(reconciler.tracker().count(), 0);
        assert_eq!(recorder.take(), vec![PresenceEvent::Disconnected(id("HID\\A"))]);
        assert_eq!(decide(0, Posture::Desktop), Some(Posture::Tablet));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_failure_keeps_previous_presence() {
        let backend = MockDeviceBackend::with_devices(vec![RawDevice::new("HID\\A", "Keyboard A")]);
        let (reconciler, recorder) = setup(&backend, &[]);
        reconciler.run_pass(PassTrigger::Startup);
        recorder.take();

        backend.set_failing(true);
        reconciler.notify();
        time::sleep(Duration::from_millis(350)).await;

        assert_eq!(backend.scan_count(), 2);
        assert_eq!(reconciler.tracker().count(), 1);
        assert!(recorder.take().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_net_zero_burst_emits_nothing() {
        let backend = MockDeviceBackend::with_devices(vec![RawDevice::new("HID\\A", "Keyboard A")]);
        let (reconciler, recorder) = setup(&backend, &[]);
        reconciler.run_pass(PassTrigger::Startup);
        recorder.take();

        backend.unplug("HID\\A");
        reconciler.notify();
        time::sleep(Duration::from_millis(100)).await;
        backend.plug("HID\\A", "Keyboard A");
        reconciler.notify();
        time::sleep(Duration::from_millis(400)).await;

        assert_eq!(reconciler.pass_count(), 2);
        assert!(recorder.take().is_empty());
        assert_eq!(reconciler.tracker().count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_catches_silent_changes() {
        let backend = MockDeviceBackend::new();
        let (reconciler, recorder) = setup(&backend, &[]);
        reconciler.run_pass(PassTrigger::Startup);
        reconciler.start_polling(Duration::from_millis(2000));
        assert!(reconciler.is_polling());

        backend.plug("BTHENUM\\KBD\\1", "Bluetooth Keyboard");
        time::sleep(Duration::from_millis(1900)).await;
        assert!(recorder.take().is_empty());

        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(recorder.take(), vec![PresenceEvent::Connected(id("BTHENUM\\KBD\\1"))]);

        // Nothing changed since: later polls are no-ops
        time::sleep(Duration::from_millis(4000)).await;
        assert!(recorder.take().is_empty());
        assert_eq!(reconciler.tracker().count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exclusion_change_triggers_full_rescan() {
        let backend = MockDeviceBackend::with_devices(vec![
            RawDevice::new("HID\\A", "Keyboard A"),
            RawDevice::new("HID\\B", "Keyboard B"),
        ]);
        let (reconciler, recorder) = setup(&backend, &[]);
        reconciler.run_pass(PassTrigger::Startup);
        recorder.take();

        let diff = reconciler
            .set_exclusions(["HID\\A"].into_iter().collect())
            .unwrap();
        assert_eq!(diff.removed, vec![id("HID\\A")]);
        assert_eq!(recorder.take(), vec![PresenceEvent::Disconnected(id("HID\\A"))]);

        // Same list again: no rescan
        let scans = backend.scan_count();
        assert!(reconciler.set_exclusions(["hid\\a"].into_iter().collect()).is_none());
        assert_eq!(backend.scan_count(), scans);
    }

    #[tokio::test(start_paused = true)]
    async fn test_excluded_ids_never_enter_presence() {
        let backend = MockDeviceBackend::new();
        let (reconciler, _) = setup(&backend, &["HID\\X"]);

        let rounds: [&[&str]; 4] = [
            &["HID\\X"],
            &["HID\\A", "hid\\x"],
            &["HID\\X", "HID\\B", "ROOT\\X"],
            &[],
        ];
        for round in rounds {
            backend.set_devices(round.iter().map(|r| RawDevice::new(*r, "Keyboard")).collect());
            reconciler.run_pass(PassTrigger::Manual);
            assert!(!reconciler.tracker().contains(&id("HID\\X")));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_refresh_and_polling() {
        let backend = MockDeviceBackend::new();
        let (reconciler, _) = setup(&backend, &[]);
        reconciler.start_polling(Duration::from_millis(500));
        reconciler.notify();
        reconciler.stop();

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(backend.scan_count(), 0);
        assert!(!reconciler.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_good_pass_after_failed_startup_reports_presence() {
        let backend = MockDeviceBackend::new();
        let (reconciler, recorder) = setup(&backend, &[]);

        backend.set_failing(true);
        assert!(reconciler.run_pass(PassTrigger::Startup).is_none());
        assert!(recorder.known.lock().unwrap().is_empty());

        backend.set_failing(false);
        let diff = reconciler.run_pass(PassTrigger::Poll).unwrap();
        assert!(diff.added.is_empty() && diff.removed.is_empty());
        assert_eq!(*recorder.known.lock().unwrap(), vec![0]);

        // Only once
        reconciler.run_pass(PassTrigger::Poll);
        assert_eq!(recorder.known.lock().unwrap().len(), 1);
    }

    /// Hands out the listing, then holds the first scan until released
    struct HeldBackend {
        inner: MockDeviceBackend,
        gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
    }

    impl DeviceBackend for HeldBackend {
        fn keyboard_devices(&self) -> Result<Vec<RawDevice>, BackendError> {
            let listing = self.inner.keyboard_devices()?;
            let gate = self.gate.lock().unwrap().take();
            if let Some((entered, release)) = gate {
                entered.send(()).unwrap();
                release.recv_timeout(Duration::from_secs(5)).unwrap();
            }
            Ok(listing)
        }
    }

    #[test]
    fn test_notification_during_pass_is_not_lost() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .build()
            .unwrap();
        let (entered_tx, entered_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(1);
        let inner = MockDeviceBackend::new();
        let recorder = Arc::new(Recorder::default());
        let reconciler = Reconciler::new(
            KeyboardEnumerator::new(HeldBackend {
                inner: inner.clone(),
                gate: Mutex::new(Some((entered_tx, release_rx))),
            }),
            Arc::new(PresenceTracker::new()),
            ExclusionList::new(),
            recorder.clone(),
            Duration::from_millis(20),
            runtime.handle().clone(),
        );

        inner.plug("HID\\A", "Keyboard A");
        reconciler.notify();
        entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        // First pass has its listing; B arrives while it is still running.
        // notify() waits on the running debounce task, so send it from a thread.
        inner.plug("HID\\B", "Keyboard B");
        let late = {
            let reconciler = Arc::clone(&reconciler);
            thread::spawn(move || reconciler.notify())
        };
        let deadline = Instant::now() + Duration::from_secs(2);
        while !reconciler.is_refresh_pending() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(reconciler.is_refresh_pending());
        release_tx.send(()).unwrap();
        late.join().unwrap();

        let b_connected = PresenceEvent::Connected(id("HID\\B"));
        let deadline = Instant::now() + Duration::from_secs(2);
        while !recorder.events.lock().unwrap().contains(&b_connected) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(recorder.take().contains(&b_connected));
        assert!(reconciler.tracker().contains(&id("HID\\B")));
        assert!(reconciler.pass_count() >= 2);

        reconciler.stop();
    }
}
