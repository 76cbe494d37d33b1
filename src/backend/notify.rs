//! Device-change notifications through a message-only window.
//!
//! A hidden `HWND_MESSAGE` window on its own thread registers for keyboard
//! interface arrival/removal and forwards each one as a [`DeviceSignal`].
//! Signals carry no device data; they only tell the reconciler to rescan.

use super::{BackendError, DeviceSignal, NotificationSource};
use crossbeam_channel::{bounded, Sender};
use log::{debug, info, warn};
use std::cell::RefCell;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use windows::core::{w, GUID};
use windows::Win32::Foundation::{HANDLE, HINSTANCE, HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetMessageW,
    PostThreadMessageW, RegisterClassW, RegisterDeviceNotificationW, UnregisterDeviceNotification,
    DBT_DEVTYP_DEVICEINTERFACE, DEVICE_NOTIFY_WINDOW_HANDLE, DEV_BROADCAST_DEVICEINTERFACE_W,
    HMENU, HWND_MESSAGE, MSG, WINDOW_EX_STYLE, WINDOW_STYLE, WM_DEVICECHANGE, WM_QUIT, WNDCLASSW,
};

/// Keyboard device interface class {884B96C3-56EF-11D1-BC8C-00A0C91405DD}
pub const GUID_DEVINTERFACE_KEYBOARD: GUID = GUID::from_u128(0x884b96c3_56ef_11d1_bc8c_00a0c91405dd);

const DBT_DEVICEARRIVAL: u32 = 0x8000;
const DBT_DEVICEREMOVECOMPLETE: u32 = 0x8004;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(2);

thread_local! {
    static SIGNAL_SENDER: RefCell<Option<Sender<DeviceSignal>>> = const { RefCell::new(None) };
}

/// Notification source backed by `RegisterDeviceNotificationW`
#[derive(Debug, Default)]
pub struct DeviceNotificationWindow {
    thread: Option<JoinHandle<()>>,
    thread_id: u32,
}

impl DeviceNotificationWindow {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NotificationSource for DeviceNotificationWindow {
    fn start(&mut self, signals: Sender<DeviceSignal>) -> Result<(), BackendError> {
        if self.thread.is_some() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = bounded::<Result<u32, String>>(1);
        let handle = thread::Builder::new()
            .name("device-notify".to_string())
            .spawn(move || run_message_loop(signals, ready_tx))
            .map_err(|e| BackendError::Notification(format!("spawn: {e}")))?;

        match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(Ok(thread_id)) => {
                info!("✓ Listening for keyboard arrival/removal");
                self.thread = Some(handle);
                self.thread_id = thread_id;
                Ok(())
            }
            Ok(Err(reason)) => {
                let _ = handle.join();
                Err(BackendError::Notification(reason))
            }
            Err(_) => Err(BackendError::Notification(
                "notification window did not start".to_string(),
            )),
        }
    }

    fn stop(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        if let Err(e) = unsafe { PostThreadMessageW(self.thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) }
        {
            warn!("Failed to stop notification thread: {}", e);
            return;
        }
        if handle.join().is_err() {
            warn!("Notification thread panicked");
        }
        debug!("Device notifications stopped");
    }
}

impl Drop for DeviceNotificationWindow {
    fn drop(&mut self) {
        self.stop();
    }
}

unsafe extern "system" fn window_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    if msg == WM_DEVICECHANGE {
        let signal = match wparam.0 as u32 {
            DBT_DEVICEARRIVAL => Some(DeviceSignal::Arrived),
            DBT_DEVICEREMOVECOMPLETE => Some(DeviceSignal::Removed),
            _ => None,
        };
        if let Some(signal) = signal {
            SIGNAL_SENDER.with(|sender| {
                if let Some(ref s) = *sender.borrow() {
                    let _ = s.try_send(signal);
                }
            });
        }
        return LRESULT(1);
    }
    DefWindowProcW(hwnd, msg, wparam, lparam)
}

/// Create the window, report readiness, then pump messages until WM_QUIT
fn run_message_loop(signals: Sender<DeviceSignal>, ready: Sender<Result<u32, String>>) {
    SIGNAL_SENDER.with(|sender| *sender.borrow_mut() = Some(signals));

    let hwnd = match create_window() {
        Ok(hwnd) => hwnd,
        Err(e) => {
            let _ = ready.send(Err(format!("CreateWindowExW: {e}")));
            return;
        }
    };

    let mut filter = DEV_BROADCAST_DEVICEINTERFACE_W {
        dbcc_size: std::mem::size_of::<DEV_BROADCAST_DEVICEINTERFACE_W>() as u32,
        dbcc_devicetype: DBT_DEVTYP_DEVICEINTERFACE.0,
        dbcc_classguid: GUID_DEVINTERFACE_KEYBOARD,
        ..Default::default()
    };
    let registration = unsafe {
        RegisterDeviceNotificationW(
            HANDLE(hwnd.0),
            &mut filter as *mut _ as *const std::ffi::c_void,
            DEVICE_NOTIFY_WINDOW_HANDLE,
        )
    };
    let registration = match registration {
        Ok(registration) => registration,
        Err(e) => {
            let _ = unsafe { DestroyWindow(hwnd) };
            let _ = ready.send(Err(format!("RegisterDeviceNotificationW: {e}")));
            return;
        }
    };

    let _ = ready.send(Ok(unsafe { GetCurrentThreadId() }));

    let mut msg = MSG::default();
    while unsafe { GetMessageW(&mut msg, HWND::default(), 0, 0) }.0 > 0 {
        unsafe {
            DispatchMessageW(&msg);
        }
    }

    unsafe {
        let _ = UnregisterDeviceNotification(registration);
        let _ = DestroyWindow(hwnd);
    }
    SIGNAL_SENDER.with(|sender| *sender.borrow_mut() = None);
}

fn create_window() -> windows::core::Result<HWND> {
    let class_name = w!("TabletModeSwitcherDeviceWatcher");
    let module = unsafe { GetModuleHandleW(None) }?;
    let instance = HINSTANCE(module.0);

    let class = WNDCLASSW {
        lpfnWndProc: Some(window_proc),
        hInstance: instance,
        lpszClassName: class_name,
        ..Default::default()
    };
    // Fails harmlessly when an earlier start already registered the class
    unsafe { RegisterClassW(&class) };

    unsafe {
        CreateWindowExW(
            WINDOW_EX_STYLE::default(),
            class_name,
            w!(""),
            WINDOW_STYLE::default(),
            0,
            0,
            0,
            0,
            HWND_MESSAGE,
            HMENU::default(),
            instance,
            None,
        )
    }
}
