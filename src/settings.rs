//! Persistent application settings
//!
//! Stored as JSON under the local application data directory. Keys use
//! PascalCase so files written by earlier releases keep loading. Loading
//! never fails: a missing, unreadable or corrupt file yields defaults, and
//! out-of-range numbers are clamped. Saving reports its error.

use crate::backend::{BackendError, StartupBackend};
use crate::keyboard::ExclusionList;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Directory under the local data dir
const APP_DIR: &str = "TabletModeSwitcher";
const SETTINGS_FILENAME: &str = "settings.json";

pub const MAX_SWITCH_DELAY_MS: u64 = 10_000;
pub const MAX_DEBOUNCE_MS: u64 = 10_000;
pub const MIN_POLL_INTERVAL_MS: u64 = 250;
pub const MAX_POLL_INTERVAL_MS: u64 = 60_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access settings file: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse settings file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid settings: {0}")]
    Invalid(String),
}

/// User settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AppSettings {
    /// Switch posture automatically on keyboard changes
    #[serde(default = "default_true")]
    pub auto_switch_enabled: bool,

    /// Delay between the last presence change and the switch
    #[serde(default = "default_switch_delay_ms")]
    pub switch_delay_ms: u64,

    /// Device ids that never count as keyboards (compared case-insensitively)
    #[serde(default)]
    pub excluded_device_ids: Vec<String>,

    #[serde(default = "default_true")]
    pub show_notifications: bool,

    #[serde(default)]
    pub run_at_startup: bool,

    #[serde(default = "default_true")]
    pub start_minimized: bool,

    /// Also toggle taskbar auto-hide when switching
    #[serde(rename = "UseTaskbarAutoHide", default)]
    pub use_alt_posture_method: bool,

    /// Quiet window for coalescing device notifications
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Period of the rescan fallback
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            auto_switch_enabled: true,
            switch_delay_ms: default_switch_delay_ms(),
            excluded_device_ids: Vec::new(),
            show_notifications: true,
            run_at_startup: false,
            start_minimized: true,
            use_alt_posture_method: false,
            debounce_ms: default_debounce_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_true() -> bool { true }
fn default_switch_delay_ms() -> u64 { 500 }
fn default_debounce_ms() -> u64 { 300 }
fn default_poll_interval_ms() -> u64 { 2_000 }

/// `<local data dir>/TabletModeSwitcher/settings.json`
pub fn default_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join(APP_DIR).join(SETTINGS_FILENAME))
}

impl AppSettings {
    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        match default_path() {
            Some(path) => Self::load_from(path),
            None => {
                warn!("No local data directory, using default settings");
                Self::default()
            }
        }
    }

    /// Load from `path`, falling back to defaults on any failure
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::try_load_from(path) {
            Ok(settings) => {
                debug!("Loaded settings from: {}", path.display());
                settings
            }
            Err(ConfigError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No settings file at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                warn!("{}; using default settings", e);
                Self::default()
            }
        }
    }

    /// Load, reporting why a file was rejected. Out-of-range numbers are
    /// clamped so the rest of the file is kept.
    pub fn try_load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&content)?;
        Ok(settings.clamped())
    }

    /// Pull numeric fields back into their valid ranges
    pub fn clamped(mut self) -> Self {
        let switch_delay_ms = self.switch_delay_ms.min(MAX_SWITCH_DELAY_MS);
        let debounce_ms = self.debounce_ms.clamp(1, MAX_DEBOUNCE_MS);
        let poll_interval_ms = self
            .poll_interval_ms
            .clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS);

        if switch_delay_ms != self.switch_delay_ms {
            warn!("SwitchDelayMs {} out of range, using {}", self.switch_delay_ms, switch_delay_ms);
        }
        if debounce_ms != self.debounce_ms {
            warn!("DebounceMs {} out of range, using {}", self.debounce_ms, debounce_ms);
        }
        if poll_interval_ms != self.poll_interval_ms {
            warn!("PollIntervalMs {} out of range, using {}", self.poll_interval_ms, poll_interval_ms);
        }

        self.switch_delay_ms = switch_delay_ms;
        self.debounce_ms = debounce_ms;
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    /// Save to the default location
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = default_path().ok_or_else(|| {
            ConfigError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "no local data directory",
            ))
        })?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;

        info!(
            "Saved settings to: {} ({} excluded device(s))",
            path.display(),
            self.excluded_device_ids.len()
        );
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.switch_delay_ms > MAX_SWITCH_DELAY_MS {
            return Err(ConfigError::Invalid(format!(
                "SwitchDelayMs must be at most {} (got {})",
                MAX_SWITCH_DELAY_MS, self.switch_delay_ms
            )));
        }
        if self.debounce_ms == 0 || self.debounce_ms > MAX_DEBOUNCE_MS {
            return Err(ConfigError::Invalid(format!(
                "DebounceMs must be between 1 and {} (got {})",
                MAX_DEBOUNCE_MS, self.debounce_ms
            )));
        }
        if !(MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&self.poll_interval_ms) {
            return Err(ConfigError::Invalid(format!(
                "PollIntervalMs must be between {} and {} (got {})",
                MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS, self.poll_interval_ms
            )));
        }
        Ok(())
    }

    pub fn exclusion_list(&self) -> ExclusionList {
        self.excluded_device_ids.iter().collect()
    }

    pub fn switch_delay(&self) -> Duration {
        Duration::from_millis(self.switch_delay_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Bring the launch-at-login registration in line with `run_at_startup`
    pub fn sync_startup_registration<S: StartupBackend>(
        &self,
        startup: &S,
    ) -> Result<(), BackendError> {
        if startup.is_enabled()? == self.run_at_startup {
            return Ok(());
        }
        startup.set_enabled(self.run_at_startup)
    }
}
