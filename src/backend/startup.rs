//! Launch-at-login through the per-user `Run` key.

use super::registry::RegKey;
use super::{BackendError, StartupBackend};
use log::info;
use windows::core::{w, PCWSTR};
use windows::Win32::System::Registry::{HKEY_CURRENT_USER, KEY_QUERY_VALUE, KEY_SET_VALUE};

const RUN_KEY: PCWSTR = w!("SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Run");
const VALUE_NAME: PCWSTR = w!("TabletModeSwitcher");

/// Startup backend writing `HKCU\...\Run\TabletModeSwitcher`
#[derive(Clone, Copy, Debug, Default)]
pub struct RunKeyStartupBackend;

impl RunKeyStartupBackend {
    pub fn new() -> Self {
        Self
    }

    fn command_line() -> Result<String, BackendError> {
        let exe = std::env::current_exe()
            .map_err(|e| BackendError::Startup(format!("current exe: {e}")))?;
        Ok(format!("\"{}\"", exe.display()))
    }
}

impl StartupBackend for RunKeyStartupBackend {
    fn set_enabled(&self, enable: bool) -> Result<(), BackendError> {
        let key = RegKey::open(HKEY_CURRENT_USER, RUN_KEY, KEY_SET_VALUE)
            .map_err(|e| BackendError::Startup(format!("Run key: {e}")))?;

        let result = if enable {
            let command = Self::command_line()?;
            key.set_string(VALUE_NAME, &command)
        } else {
            key.delete_value(VALUE_NAME)
        };
        result.map_err(|e| BackendError::Startup(e.to_string()))?;

        info!("Run at startup {}", if enable { "enabled" } else { "disabled" });
        Ok(())
    }

    fn is_enabled(&self) -> Result<bool, BackendError> {
        let key = RegKey::open(HKEY_CURRENT_USER, RUN_KEY, KEY_QUERY_VALUE)
            .map_err(|e| BackendError::Startup(format!("Run key: {e}")))?;
        let value = key
            .get_string(VALUE_NAME)
            .map_err(|e| BackendError::Startup(e.to_string()))?;
        Ok(value.is_some_and(|v| !v.is_empty()))
    }
}
