//! Backend abstraction for the OS collaborators
//!
//! This module provides the interfaces the core uses to enumerate keyboards,
//! receive device-change notifications, read and write the tablet posture,
//! and register the app for launch at login. Windows implementations live
//! next to mock implementations used by tests and non-Windows builds.

pub mod mock_devices;
pub mod mock_notify;
pub mod mock_posture;
pub mod mock_startup;

#[cfg(windows)]
pub mod notify;
#[cfg(windows)]
pub mod registry;
#[cfg(windows)]
pub mod setupapi;
#[cfg(windows)]
pub mod startup;

#[cfg(windows)]
pub use notify::DeviceNotificationWindow;
#[cfg(windows)]
pub use registry::RegistryPostureBackend;
#[cfg(windows)]
pub use setupapi::SetupApiDeviceBackend;
#[cfg(windows)]
pub use startup::RunKeyStartupBackend;

pub use mock_devices::MockDeviceBackend;
pub use mock_notify::ManualNotificationSource;
pub use mock_posture::MockPostureBackend;
pub use mock_startup::MockStartupBackend;

use crossbeam_channel::Sender;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Device enumeration failed: {0}")]
    Enumeration(String),

    #[error("Failed to apply posture: {0}")]
    PostureApply(String),

    #[error("Failed to read posture: {0}")]
    PostureRead(String),

    #[error("Device notifications unavailable: {0}")]
    Notification(String),

    #[error("Startup registration failed: {0}")]
    Startup(String),

    #[error("Platform not supported")]
    PlatformNotSupported,
}

/// A keyboard-class device exactly as the OS reports it, before filtering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDevice {
    pub id: String,
    pub description: String,
}

impl RawDevice {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
        }
    }
}

/// Raw device-change signal. Only used as a trigger to rescan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSignal {
    Arrived,
    Removed,
}

/// Live keyboard device listing
pub trait DeviceBackend {
    /// List keyboard-class devices currently present (wired and Bluetooth)
    fn keyboard_devices(&self) -> Result<Vec<RawDevice>, BackendError>;
}

/// OS tablet posture flags
pub trait PostureBackend {
    /// Read the current posture from the OS (never cached)
    fn is_tablet_mode(&self) -> Result<bool, BackendError>;

    /// Persist the posture and notify the shell
    fn set_tablet_mode(&self, enable: bool) -> Result<(), BackendError>;

    /// Also toggle taskbar auto-hide when applying a posture
    fn set_alternate_method(&self, _enabled: bool) {}

    /// Restart the shell so it picks up the new flags
    fn restart_shell(&self) -> Result<(), BackendError> {
        Err(BackendError::PlatformNotSupported)
    }
}

/// Source of device arrival/removal notifications
pub trait NotificationSource: Send {
    /// Begin delivering signals to `signals`
    fn start(&mut self, signals: Sender<DeviceSignal>) -> Result<(), BackendError>;

    /// Stop delivering signals. Must be idempotent.
    fn stop(&mut self);
}

/// Launch-at-login registration
pub trait StartupBackend {
    fn set_enabled(&self, enable: bool) -> Result<(), BackendError>;

    fn is_enabled(&self) -> Result<bool, BackendError>;
}

/// Get the device backend for the current platform
#[cfg(windows)]
pub fn get_device_backend() -> SetupApiDeviceBackend {
    SetupApiDeviceBackend::new()
}

/// Get the posture backend for the current platform
#[cfg(windows)]
pub fn get_posture_backend() -> RegistryPostureBackend {
    RegistryPostureBackend::new()
}

/// Get the startup backend for the current platform
#[cfg(windows)]
pub fn get_startup_backend() -> RunKeyStartupBackend {
    RunKeyStartupBackend::new()
}

/// Get the notification source for the current platform
#[cfg(windows)]
pub fn get_notification_source() -> Box<dyn NotificationSource> {
    Box::new(DeviceNotificationWindow::new())
}

#[cfg(not(windows))]
pub fn get_device_backend() -> Result<MockDeviceBackend, BackendError> {
    Err(BackendError::PlatformNotSupported)
}

#[cfg(not(windows))]
pub fn get_posture_backend() -> Result<MockPostureBackend, BackendError> {
    Err(BackendError::PlatformNotSupported)
}
