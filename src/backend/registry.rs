//! Registry-backed tablet posture.
//!
//! The shell reads its posture from two places:
//! - `HKLM\SYSTEM\CurrentControlSet\Control\PriorityControl\ConvertibleSlateMode`
//!   (`0` = tablet, `1` = desktop; absent reads as desktop)
//! - `HKCU\...\ImmersiveShell\TabletMode` and `TabletPostureTaskbar`
//!
//! After writing both, `WM_SETTINGCHANGE` is broadcast on a short-lived
//! thread so a hung top-level window cannot stall the caller. Writing the
//! HKLM value needs an elevated process; that failure is returned, while
//! failures on the per-user keys are only logged.

use super::{BackendError, PostureBackend};
use log::{debug, info, warn};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use windows::core::{w, PCWSTR};
use windows::Win32::Foundation::{ERROR_FILE_NOT_FOUND, LPARAM, WPARAM};
use windows::Win32::System::Registry::{
    RegCloseKey, RegCreateKeyExW, RegDeleteValueW, RegOpenKeyExW, RegQueryValueExW,
    RegSetValueExW, HKEY, HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE, KEY_QUERY_VALUE, KEY_SET_VALUE,
    REG_BINARY, REG_DWORD, REG_OPTION_NON_VOLATILE, REG_SAM_FLAGS, REG_SZ, REG_VALUE_TYPE,
};
use windows::Win32::UI::WindowsAndMessaging::{
    SendMessageTimeoutW, HWND_BROADCAST, SMTO_ABORTIFHUNG, WM_SETTINGCHANGE,
};

const PRIORITY_CONTROL: PCWSTR = w!("SYSTEM\\CurrentControlSet\\Control\\PriorityControl");
const IMMERSIVE_SHELL: PCWSTR = w!("SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\ImmersiveShell");
const STUCK_RECTS: PCWSTR =
    w!("SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Explorer\\StuckRects3");

const BROADCAST_TIMEOUT_MS: u32 = 500;

/// Byte of the `StuckRects3\Settings` blob holding the auto-hide flag
const AUTO_HIDE_OFFSET: usize = 8;
const AUTO_HIDE_ON: u8 = 0x03;
const AUTO_HIDE_OFF: u8 = 0x02;

/// Open registry key, closed on drop.
pub(crate) struct RegKey(HKEY);

impl RegKey {
    pub(crate) fn open(
        root: HKEY,
        path: PCWSTR,
        access: REG_SAM_FLAGS,
    ) -> windows::core::Result<Self> {
        let mut key = HKEY::default();
        unsafe { RegOpenKeyExW(root, path, 0, access, &mut key) }.ok()?;
        Ok(Self(key))
    }

    /// Open the key, creating it when missing
    pub(crate) fn create(
        root: HKEY,
        path: PCWSTR,
        access: REG_SAM_FLAGS,
    ) -> windows::core::Result<Self> {
        let mut key = HKEY::default();
        unsafe {
            RegCreateKeyExW(
                root,
                path,
                0,
                PCWSTR::null(),
                REG_OPTION_NON_VOLATILE,
                access,
                None,
                &mut key,
                None,
            )
        }
        .ok()?;
        Ok(Self(key))
    }

    /// Raw value bytes, `None` when the value does not exist
    fn query(&self, name: PCWSTR) -> windows::core::Result<Option<(REG_VALUE_TYPE, Vec<u8>)>> {
        let mut kind = REG_VALUE_TYPE::default();
        let mut size = 0u32;
        let status =
            unsafe { RegQueryValueExW(self.0, name, None, Some(&mut kind), None, Some(&mut size)) };
        if status == ERROR_FILE_NOT_FOUND {
            return Ok(None);
        }
        status.ok()?;

        let mut data = vec![0u8; size as usize];
        unsafe {
            RegQueryValueExW(
                self.0,
                name,
                None,
                Some(&mut kind),
                Some(data.as_mut_ptr()),
                Some(&mut size),
            )
        }
        .ok()?;
        data.truncate(size as usize);
        Ok(Some((kind, data)))
    }

    pub(crate) fn get_dword(&self, name: PCWSTR) -> windows::core::Result<Option<u32>> {
        Ok(self.query(name)?.and_then(|(kind, data)| {
            let bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
            (kind == REG_DWORD).then(|| u32::from_le_bytes(bytes))
        }))
    }

    pub(crate) fn set_dword(&self, name: PCWSTR, value: u32) -> windows::core::Result<()> {
        unsafe { RegSetValueExW(self.0, name, 0, REG_DWORD, Some(&value.to_le_bytes())) }.ok()
    }

    pub(crate) fn get_binary(&self, name: PCWSTR) -> windows::core::Result<Option<Vec<u8>>> {
        Ok(self
            .query(name)?
            .and_then(|(kind, data)| (kind == REG_BINARY).then_some(data)))
    }

    pub(crate) fn set_binary(&self, name: PCWSTR, data: &[u8]) -> windows::core::Result<()> {
        unsafe { RegSetValueExW(self.0, name, 0, REG_BINARY, Some(data)) }.ok()
    }

    pub(crate) fn get_string(&self, name: PCWSTR) -> windows::core::Result<Option<String>> {
        Ok(self.query(name)?.and_then(|(kind, data)| {
            if kind != REG_SZ {
                return None;
            }
            let wide: Vec<u16> = data
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .take_while(|&c| c != 0)
                .collect();
            Some(String::from_utf16_lossy(&wide))
        }))
    }

    pub(crate) fn set_string(&self, name: PCWSTR, value: &str) -> windows::core::Result<()> {
        let bytes: Vec<u8> = value
            .encode_utf16()
            .chain(std::iter::once(0))
            .flat_map(u16::to_le_bytes)
            .collect();
        unsafe { RegSetValueExW(self.0, name, 0, REG_SZ, Some(&bytes)) }.ok()
    }

    /// Delete a value; a missing value is not an error
    pub(crate) fn delete_value(&self, name: PCWSTR) -> windows::core::Result<()> {
        let status = unsafe { RegDeleteValueW(self.0, name) };
        if status == ERROR_FILE_NOT_FOUND {
            return Ok(());
        }
        status.ok()
    }
}

impl Drop for RegKey {
    fn drop(&mut self) {
        let _ = unsafe { RegCloseKey(self.0) };
    }
}

/// Posture backend writing the shell's registry flags
#[derive(Clone, Debug, Default)]
pub struct RegistryPostureBackend {
    alternate: Arc<AtomicBool>,
}

impl RegistryPostureBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_slate_mode(enable: bool) -> windows::core::Result<()> {
        let key = RegKey::open(HKEY_LOCAL_MACHINE, PRIORITY_CONTROL, KEY_SET_VALUE)?;
        key.set_dword(w!("ConvertibleSlateMode"), if enable { 0 } else { 1 })
    }

    fn write_immersive_shell(enable: bool) -> windows::core::Result<()> {
        let key = RegKey::create(HKEY_CURRENT_USER, IMMERSIVE_SHELL, KEY_SET_VALUE)?;
        let flag = u32::from(enable);
        key.set_dword(w!("TabletMode"), flag)?;
        key.set_dword(w!("TabletPostureTaskbar"), flag)
    }

    fn write_taskbar_auto_hide(auto_hide: bool) -> windows::core::Result<()> {
        let key = RegKey::open(HKEY_CURRENT_USER, STUCK_RECTS, KEY_QUERY_VALUE | KEY_SET_VALUE)?;
        let Some(mut settings) = key.get_binary(w!("Settings"))? else {
            debug!("StuckRects3 has no Settings blob, auto-hide untouched");
            return Ok(());
        };
        if settings.len() <= AUTO_HIDE_OFFSET {
            debug!("StuckRects3 Settings blob too short ({} bytes)", settings.len());
            return Ok(());
        }
        settings[AUTO_HIDE_OFFSET] = if auto_hide { AUTO_HIDE_ON } else { AUTO_HIDE_OFF };
        key.set_binary(w!("Settings"), &settings)
    }

    /// Tell top-level windows the posture keys changed
    fn broadcast_change() {
        let spawned = thread::Builder::new()
            .name("settings-broadcast".to_string())
            .spawn(|| {
                for area in [w!("ConvertibleSlateMode"), w!("ImmersiveShell")] {
                    unsafe {
                        SendMessageTimeoutW(
                            HWND_BROADCAST,
                            WM_SETTINGCHANGE,
                            WPARAM(0),
                            LPARAM(area.as_ptr() as isize),
                            SMTO_ABORTIFHUNG,
                            BROADCAST_TIMEOUT_MS,
                            None,
                        );
                    }
                }
                debug!("WM_SETTINGCHANGE broadcast done");
            });
        if let Err(e) = spawned {
            warn!("Failed to spawn settings broadcast thread: {}", e);
        }
    }
}

impl PostureBackend for RegistryPostureBackend {
    fn is_tablet_mode(&self) -> Result<bool, BackendError> {
        let key = RegKey::open(HKEY_LOCAL_MACHINE, PRIORITY_CONTROL, KEY_QUERY_VALUE)
            .map_err(|e| BackendError::PostureRead(format!("PriorityControl: {e}")))?;
        let value = key
            .get_dword(w!("ConvertibleSlateMode"))
            .map_err(|e| BackendError::PostureRead(format!("ConvertibleSlateMode: {e}")))?;
        Ok(value == Some(0))
    }

    fn set_tablet_mode(&self, enable: bool) -> Result<(), BackendError> {
        Self::write_slate_mode(enable)
            .map_err(|e| BackendError::PostureApply(format!("ConvertibleSlateMode: {e}")))?;

        if let Err(e) = Self::write_immersive_shell(enable) {
            warn!("Failed to update ImmersiveShell flags: {}", e);
        }

        if self.alternate.load(Ordering::SeqCst) {
            if let Err(e) = Self::write_taskbar_auto_hide(enable) {
                warn!("Failed to update taskbar auto-hide: {}", e);
            }
        }

        Self::broadcast_change();
        Ok(())
    }

    fn set_alternate_method(&self, enabled: bool) {
        self.alternate.store(enabled, Ordering::SeqCst);
    }

    fn restart_shell(&self) -> Result<(), BackendError> {
        thread::Builder::new()
            .name("shell-restart".to_string())
            .spawn(|| {
                info!("Restarting explorer");
                if let Err(e) = Command::new("taskkill")
                    .args(["/F", "/IM", "explorer.exe"])
                    .status()
                {
                    warn!("Failed to stop explorer: {}", e);
                }
                thread::sleep(Duration::from_millis(500));
                if let Err(e) = Command::new("explorer.exe").spawn() {
                    warn!("Failed to start explorer: {}", e);
                }
            })
            .map(|_| ())
            .map_err(|e| BackendError::PostureApply(format!("shell restart: {e}")))
    }
}
