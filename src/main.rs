//! Tablet Mode Switcher - background service
//!
//! Watches for physical keyboards and switches the shell to desktop posture
//! when one is attached, and back to tablet posture when the last one goes.
//! Status events are written to the log; set `RUST_LOG=debug` for scan
//! detail.
//!
//! Press Ctrl+C to stop.

use anyhow::Context;
use crossbeam_channel::{bounded, select};
use log::{debug, info, warn};
use tabletmode_rs::backend::{
    get_device_backend, get_posture_backend, DeviceBackend, NotificationSource, PostureBackend,
};
use tabletmode_rs::{AppEvent, AppSettings, TabletModeManager};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    run()
}

#[cfg(windows)]
fn run() -> anyhow::Result<()> {
    use tabletmode_rs::backend::{get_notification_source, get_startup_backend};

    let Some(_instance) = single_instance::acquire()? else {
        single_instance::show_already_running();
        return Ok(());
    };

    let settings = AppSettings::load();
    if let Err(e) = settings.sync_startup_registration(&get_startup_backend()) {
        warn!("{}", e);
    }

    serve(
        settings,
        get_device_backend(),
        get_posture_backend(),
        Some(get_notification_source()),
    )
}

#[cfg(not(windows))]
fn run() -> anyhow::Result<()> {
    let devices = get_device_backend()?;
    let posture = get_posture_backend()?;
    serve(AppSettings::load(), devices, posture, None)
}

/// Run the manager until Ctrl+C
fn serve<D, P>(
    settings: AppSettings,
    devices: D,
    posture: P,
    notifications: Option<Box<dyn NotificationSource>>,
) -> anyhow::Result<()>
where
    D: DeviceBackend + Send + Sync + 'static,
    P: PostureBackend + Send + Sync + 'static,
{
    info!("=== Tablet Mode Switcher ===");

    let mut manager = TabletModeManager::new(settings, devices, posture)?;
    if let Some(source) = notifications {
        manager = manager.with_notification_source(source);
    }
    manager.start().context("failed to start the manager")?;

    let status = manager.status();
    match status.posture {
        Some(posture) => info!("Currently in {} with {} keyboard(s)", posture, status.keyboard_count),
        None => info!("{} keyboard(s) connected", status.keyboard_count),
    }

    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .context("failed to install Ctrl+C handler")?;

    info!("Press Ctrl+C to stop");

    loop {
        select! {
            recv(manager.event_receiver()) -> event => match event {
                Ok(event) => report(&event, manager.settings().show_notifications),
                Err(_) => break,
            },
            recv(shutdown_rx) -> _ => break,
        }
    }

    manager.stop();
    Ok(())
}

fn report(event: &AppEvent, notify: bool) {
    let message = match event {
        AppEvent::KeyboardConnected { device, count } => {
            format!("Keyboard connected: {} ({} total)", device.description(), count)
        }
        AppEvent::KeyboardDisconnected { device, count } => {
            format!("Keyboard disconnected: {} ({} remaining)", device.description(), count)
        }
        AppEvent::ModeChanged(posture) => format!("Switched to {}", posture),
        AppEvent::ModeSwitchFailed { target, reason } => {
            warn!("Could not switch to {}: {}", target, reason);
            return;
        }
    };

    if notify {
        info!("{}", message);
    } else {
        debug!("{}", message);
    }
}

#[cfg(windows)]
mod single_instance {
    use windows::core::w;
    use windows::Win32::Foundation::{CloseHandle, GetLastError, ERROR_ALREADY_EXISTS, HANDLE};
    use windows::Win32::System::Threading::CreateMutexW;
    use windows::Win32::UI::WindowsAndMessaging::{MessageBoxW, MB_ICONINFORMATION, MB_OK};

    /// Holds the named mutex for the life of the process
    pub struct InstanceGuard(HANDLE);

    impl Drop for InstanceGuard {
        fn drop(&mut self) {
            let _ = unsafe { CloseHandle(self.0) };
        }
    }

    /// `None` when another instance already holds the mutex
    pub fn acquire() -> windows::core::Result<Option<InstanceGuard>> {
        let handle = unsafe { CreateMutexW(None, false, w!("TabletModeSwitcher_SingleInstance")) }?;
        let guard = InstanceGuard(handle);
        if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
            return Ok(None);
        }
        Ok(Some(guard))
    }

    pub fn show_already_running() {
        unsafe {
            let _ = MessageBoxW(
                None,
                w!("Tablet Mode Switcher is already running."),
                w!("Tablet Mode Switcher"),
                MB_OK | MB_ICONINFORMATION,
            );
        }
    }
}
