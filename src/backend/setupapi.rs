//! SetupAPI keyboard enumeration.
//!
//! Lists every present device of the keyboard setup class. Wired, USB and
//! Bluetooth HID keyboards all register under this class, so one query
//! covers them. Filtering of virtual devices happens later in
//! [`crate::keyboard::classify`].
//!
//! # Safety Notes
//! - The device information set is owned by [`DeviceInfoSet`] and destroyed
//!   on drop, including on early error returns.
//! - Property buffers are fixed-size; values that do not fit are skipped
//!   and the device falls back to its description or an empty one.

use super::{BackendError, DeviceBackend, RawDevice};
use log::{debug, trace};
use windows::core::{GUID, PCWSTR};
use windows::Win32::Devices::DeviceAndDriverInstallation::{
    SetupDiDestroyDeviceInfoList, SetupDiEnumDeviceInfo, SetupDiGetClassDevsW,
    SetupDiGetDeviceInstanceIdW, SetupDiGetDeviceRegistryPropertyW, DIGCF_PRESENT, HDEVINFO,
    SETUP_DI_REGISTRY_PROPERTY, SPDRP_DEVICEDESC, SPDRP_FRIENDLYNAME, SP_DEVINFO_DATA,
};
use windows::Win32::Foundation::{ERROR_NO_MORE_ITEMS, HWND};

/// Keyboard device setup class {4D36E96B-E325-11CE-BFC1-08002BE10318}
pub const GUID_DEVCLASS_KEYBOARD: GUID = GUID::from_u128(0x4d36e96b_e325_11ce_bfc1_08002be10318);

const INSTANCE_ID_CHARS: usize = 512;
const PROPERTY_BYTES: usize = 1024;

/// Device backend backed by SetupAPI
#[derive(Clone, Copy, Debug, Default)]
pub struct SetupApiDeviceBackend;

impl SetupApiDeviceBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Owned device information set
struct DeviceInfoSet(HDEVINFO);

impl DeviceInfoSet {
    fn keyboards() -> Result<Self, BackendError> {
        let handle = unsafe {
            SetupDiGetClassDevsW(
                Some(&GUID_DEVCLASS_KEYBOARD),
                PCWSTR::null(),
                HWND::default(),
                DIGCF_PRESENT,
            )
        }
        .map_err(|e| BackendError::Enumeration(format!("SetupDiGetClassDevsW: {e}")))?;
        Ok(Self(handle))
    }

    fn device(&self, index: u32) -> Option<SP_DEVINFO_DATA> {
        let mut data = SP_DEVINFO_DATA {
            cbSize: std::mem::size_of::<SP_DEVINFO_DATA>() as u32,
            ..Default::default()
        };
        match unsafe { SetupDiEnumDeviceInfo(self.0, index, &mut data) } {
            Ok(()) => Some(data),
            Err(e) => {
                if e.code() != ERROR_NO_MORE_ITEMS.to_hresult() {
                    debug!("Device enumeration stopped at index {}: {}", index, e);
                }
                None
            }
        }
    }

    fn instance_id(&self, data: &SP_DEVINFO_DATA) -> Option<String> {
        let mut buffer = [0u16; INSTANCE_ID_CHARS];
        unsafe { SetupDiGetDeviceInstanceIdW(self.0, data, Some(&mut buffer), None) }.ok()?;
        Some(wide_to_string(&buffer))
    }

    fn string_property(
        &self,
        data: &SP_DEVINFO_DATA,
        property: SETUP_DI_REGISTRY_PROPERTY,
    ) -> Option<String> {
        let mut buffer = [0u8; PROPERTY_BYTES];
        unsafe {
            SetupDiGetDeviceRegistryPropertyW(self.0, data, property, None, Some(&mut buffer), None)
        }
        .ok()?;

        let wide: Vec<u16> = buffer
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let value = wide_to_string(&wide);
        (!value.trim().is_empty()).then_some(value)
    }
}

impl Drop for DeviceInfoSet {
    fn drop(&mut self) {
        let _ = unsafe { SetupDiDestroyDeviceInfoList(self.0) };
    }
}

fn wide_to_string(buffer: &[u16]) -> String {
    let len = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());
    String::from_utf16_lossy(&buffer[..len])
}

impl DeviceBackend for SetupApiDeviceBackend {
    fn keyboard_devices(&self) -> Result<Vec<RawDevice>, BackendError> {
        let set = DeviceInfoSet::keyboards()?;
        let mut devices = Vec::new();

        let mut index = 0;
        while let Some(data) = set.device(index) {
            index += 1;

            let Some(id) = set.instance_id(&data) else {
                continue;
            };
            let description = set
                .string_property(&data, SPDRP_FRIENDLYNAME)
                .or_else(|| set.string_property(&data, SPDRP_DEVICEDESC))
                .unwrap_or_default();

            trace!("SetupAPI keyboard: {} ({})", description, id);
            devices.push(RawDevice::new(id, description));
        }

        Ok(devices)
    }
}
