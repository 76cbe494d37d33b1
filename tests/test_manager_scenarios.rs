//! End-to-end scenarios through the manager with mock backends and real time

use std::thread;
use std::time::{Duration, Instant};
use tabletmode_rs::backend::{
    DeviceSignal, ManualNotificationSource, MockDeviceBackend, MockPostureBackend, PostureBackend,
    RawDevice,
};
use tabletmode_rs::{AppEvent, AppSettings, Posture, TabletModeManager};

type Manager = TabletModeManager<MockDeviceBackend, MockPostureBackend>;

fn fast_settings() -> AppSettings {
    AppSettings {
        switch_delay_ms: 100,
        debounce_ms: 50,
        poll_interval_ms: 60_000,
        ..AppSettings::default()
    }
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn started(
    settings: AppSettings,
    devices: &MockDeviceBackend,
    posture: &MockPostureBackend,
    source: &ManualNotificationSource,
) -> Manager {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut manager = TabletModeManager::new(settings, devices.clone(), posture.clone())
        .unwrap()
        .with_notification_source(Box::new(source.clone()));
    manager.start().unwrap();
    manager
}

#[test]
fn test_plugging_a_keyboard_switches_to_desktop() {
    let devices = MockDeviceBackend::new();
    let posture = MockPostureBackend::starting_in(true);
    let source = ManualNotificationSource::new();
    let manager = started(fast_settings(), &devices, &posture, &source);
    assert!(posture.applied().is_empty());

    devices.plug("USB\\VID_046D&PID_C31C\\6&1", "USB Keyboard");
    assert!(source.trigger(DeviceSignal::Arrived));

    let mut events = Vec::new();
    while let Ok(event) = manager.event_receiver().recv_timeout(Duration::from_secs(2)) {
        let switched = matches!(event, AppEvent::ModeChanged(_));
        events.push(event);
        if switched {
            break;
        }
    }
    assert!(matches!(events[0], AppEvent::KeyboardConnected { count: 1, .. }));
    assert_eq!(events.last(), Some(&AppEvent::ModeChanged(Posture::Desktop)));

    assert_eq!(posture.applied(), vec![false]);
    assert_eq!(manager.status().keyboard_count, 1);
}

#[test]
fn test_unplugging_the_last_keyboard_switches_to_tablet() {
    let devices = MockDeviceBackend::with_devices(vec![RawDevice::new("HID\\A", "Keyboard A")]);
    let posture = MockPostureBackend::new();
    let source = ManualNotificationSource::new();
    let manager = started(fast_settings(), &devices, &posture, &source);
    assert_eq!(manager.status().keyboard_count, 1);

    devices.unplug("HID\\A");
    source.trigger(DeviceSignal::Removed);

    assert!(wait_until(Duration::from_secs(2), || posture
        .is_tablet_mode()
        .unwrap()));
    assert_eq!(manager.status().posture, Some(Posture::Tablet));
    assert_eq!(manager.status().keyboard_count, 0);
}

#[test]
fn test_burst_of_signals_runs_one_scan() {
    let devices = MockDeviceBackend::new();
    let posture = MockPostureBackend::new();
    let source = ManualNotificationSource::new();
    let settings = AppSettings {
        debounce_ms: 150,
        ..fast_settings()
    };
    let _manager = started(settings, &devices, &posture, &source);
    let after_start = devices.scan_count();

    devices.plug("HID\\A", "Keyboard A");
    for signal in [DeviceSignal::Arrived, DeviceSignal::Removed, DeviceSignal::Arrived] {
        source.trigger(signal);
    }

    assert!(wait_until(Duration::from_secs(2), || devices.scan_count() > after_start));
    thread::sleep(Duration::from_millis(400));
    assert_eq!(devices.scan_count(), after_start + 1);
}

#[test]
fn test_excluded_and_virtual_keyboards_do_not_count() {
    let devices = MockDeviceBackend::with_devices(vec![
        RawDevice::new("HID\\VID_1234&PID_0001\\1", "Cover Keyboard"),
        RawDevice::new("ROOT\\RDP_KBD\\0000", "Terminal Server Keyboard Driver"),
        RawDevice::new("HID\\VID_1234&PID_0002\\1", "Docked Keyboard"),
    ]);
    let posture = MockPostureBackend::new();
    let source = ManualNotificationSource::new();
    let settings = AppSettings {
        excluded_device_ids: vec!["hid\\vid_1234&pid_0002\\1".to_string()],
        ..fast_settings()
    };
    let mut manager = started(settings, &devices, &posture, &source);
    assert_eq!(manager.status().keyboard_count, 1);
    assert_eq!(manager.keyboard_devices().unwrap().len(), 3);

    // Excluding the cover keyboard too leaves nothing
    let mut settings = manager.settings().clone();
    settings
        .excluded_device_ids
        .push("HID\\VID_1234&PID_0001\\1".to_string());
    manager.apply_settings(&settings).unwrap();

    assert_eq!(manager.status().keyboard_count, 0);
    assert_eq!(manager.status().posture, Some(Posture::Tablet));
}

#[test]
fn test_poll_catches_changes_without_notifications() {
    let devices = MockDeviceBackend::new();
    let posture = MockPostureBackend::starting_in(true);
    let source = ManualNotificationSource::failing();
    let settings = AppSettings {
        poll_interval_ms: 250,
        ..fast_settings()
    };
    let manager = started(settings, &devices, &posture, &source);
    assert!(manager.is_running());
    assert!(!source.is_started());

    devices.plug("BTHENUM\\{00001124}\\KBD", "Bluetooth Keyboard");

    assert!(wait_until(Duration::from_secs(3), || manager.status().keyboard_count == 1));
    assert!(wait_until(Duration::from_secs(2), || !posture
        .is_tablet_mode()
        .unwrap()));
}

#[test]
fn test_scan_failure_keeps_last_known_presence() {
    let devices = MockDeviceBackend::with_devices(vec![RawDevice::new("HID\\A", "Keyboard A")]);
    let posture = MockPostureBackend::new();
    let source = ManualNotificationSource::new();
    let manager = started(fast_settings(), &devices, &posture, &source);

    devices.set_failing(true);
    assert!(manager.rescan().is_none());
    source.trigger(DeviceSignal::Removed);
    thread::sleep(Duration::from_millis(400));

    assert_eq!(manager.status().keyboard_count, 1);
    assert!(posture.applied().is_empty());
}

#[test]
fn test_stop_cancels_pending_work() {
    let devices = MockDeviceBackend::new();
    let posture = MockPostureBackend::new();
    let source = ManualNotificationSource::new();
    let settings = AppSettings {
        poll_interval_ms: 250,
        ..fast_settings()
    };
    let mut manager = started(settings, &devices, &posture, &source);
    let applied = posture.applied();

    devices.plug("HID\\A", "Keyboard A");
    source.trigger(DeviceSignal::Arrived);
    manager.stop();
    let scans = devices.scan_count();

    thread::sleep(Duration::from_millis(800));
    assert_eq!(devices.scan_count(), scans);
    assert_eq!(posture.applied(), applied);
    assert!(!source.trigger(DeviceSignal::Arrived));
}

#[test]
fn test_auto_switch_off_leaves_posture_alone() {
    let devices = MockDeviceBackend::new();
    let posture = MockPostureBackend::new();
    let source = ManualNotificationSource::new();
    let mut manager = started(fast_settings(), &devices, &posture, &source);
    // Initial sync moved us to tablet
    assert_eq!(posture.applied(), vec![true]);

    manager.set_auto_switch(false);
    devices.plug("HID\\A", "Keyboard A");
    source.trigger(DeviceSignal::Arrived);

    assert!(wait_until(Duration::from_secs(2), || manager.status().keyboard_count == 1));
    thread::sleep(Duration::from_millis(300));
    assert_eq!(posture.applied(), vec![true]);

    // Manual override still works
    assert!(manager.switch_to(Posture::Desktop).unwrap());
    assert!(!manager.switch_to(Posture::Desktop).unwrap());
}

#[test]
fn test_failed_startup_scan_recovers_through_polling() {
    let devices = MockDeviceBackend::new();
    devices.set_failing(true);
    let posture = MockPostureBackend::new();
    let source = ManualNotificationSource::new();
    let settings = AppSettings {
        poll_interval_ms: 250,
        ..fast_settings()
    };
    let manager = started(settings, &devices, &posture, &source);

    // Unknown presence is not "no keyboards"
    thread::sleep(Duration::from_millis(400));
    assert!(posture.applied().is_empty());

    // The first good poll finds nothing and settles into tablet
    devices.set_failing(false);
    assert!(wait_until(Duration::from_secs(3), || posture
        .is_tablet_mode()
        .unwrap()));
    assert_eq!(posture.applied(), vec![true]);
    assert_eq!(manager.status().keyboard_count, 0);
}

#[test]
fn test_settings_applied_after_stop_wait_for_restart() {
    let devices = MockDeviceBackend::with_devices(vec![RawDevice::new("HID\\A", "Keyboard A")]);
    let posture = MockPostureBackend::new();
    let source = ManualNotificationSource::new();
    let mut manager = started(fast_settings(), &devices, &posture, &source);
    manager.stop();
    let scans = devices.scan_count();

    let mut settings = manager.settings().clone();
    settings.excluded_device_ids.push("HID\\A".to_string());
    manager.apply_settings(&settings).unwrap();
    assert!(manager.rescan().is_none());
    thread::sleep(Duration::from_millis(300));

    assert_eq!(devices.scan_count(), scans);
    assert!(posture.applied().is_empty());
    assert_eq!(manager.status().keyboard_count, 0);
}
