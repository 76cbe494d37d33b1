//! tabletmode-rs: keyboard-driven tablet mode switching
//!
//! This library watches keyboard presence on Windows and flips the shell
//! between tablet and desktop posture: tablet when no physical keyboard is
//! attached, desktop as soon as one is.

pub mod backend;
pub mod keyboard;
pub mod manager;
pub mod settings;
pub mod watcher;

// Re-export commonly used items
pub use backend::{DeviceBackend, NotificationSource, PostureBackend, StartupBackend};
pub use keyboard::{DeviceIdentity, ExclusionList, KeyboardDevice, PresenceTracker};
pub use manager::{ManagerError, Status, TabletModeManager};
pub use settings::{AppSettings, ConfigError};
pub use watcher::{decide, AppEvent, Posture};
