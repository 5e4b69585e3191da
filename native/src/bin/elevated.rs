// Elevated worker process: hosts the affinity controller and the hardware
// monitor behind the command pipe. Runs as administrator so affinity can
// be applied to every process on the system.

extern crate energy_performance;

use log::{error, info};
use once_cell::sync::OnceCell;
use std::sync::mpsc;

/// Sender used by the console ctrl handler to request shutdown.
static SHUTDOWN_TX: OnceCell<mpsc::Sender<()>> = OnceCell::new();

fn main() {
    // Load or ignore .env file
    let _ = dotenvy::dotenv();

    energy_performance::logging::init_logger();
    energy_performance::logging::init_crash_logger();

    info!(
        "[ELEVATED] Energy Performance elevated worker v{}",
        energy_performance::get_version()
    );

    #[cfg(windows)]
    run();

    #[cfg(not(windows))]
    error!("[ELEVATED] This worker manages Windows process affinity and only runs on Windows");
}

#[cfg(windows)]
const ELEVATED_INSTANCE_MUTEX: &str = "Global\\EnergyPerformance_Elevated";

#[cfg(windows)]
fn run() {
    use energy_performance::affinity::{
        AffinityController, WindowsProcessSink, WindowsTopologyProvider,
    };
    use energy_performance::ipc::{CpuHandler, MonitorHandler, PipeServer};
    use energy_performance::monitor::NoSensorBackend;
    use std::time::Duration;

    // A second elevated worker would race this one for the pipe name.
    let _single_instance_guard = match SingleInstanceGuard::acquire(ELEVATED_INSTANCE_MUTEX) {
        Ok(guard) => guard,
        Err(SingleInstanceError::AlreadyRunning) => {
            info!("[ELEVATED] Another instance is already running - exiting");
            return;
        }
        Err(err) => {
            error!("[ELEVATED] Failed to check for a running instance: {}", err);
            return;
        }
    };

    let config = energy_performance::config::load();

    let mut controller = AffinityController::new(
        Box::new(WindowsTopologyProvider),
        Box::new(WindowsProcessSink),
    );
    controller.set_some_efficiency_core_count(config.some_efficiency_core_count);

    let mut server = PipeServer::new(config.pipe_name.clone());
    server.set_accept_poll(Duration::from_millis(config.accept_poll_ms));
    // Handle CPU affinity commands.
    server.add_message_handler(Box::new(CpuHandler::new(controller)));
    // Handle hardware monitor commands.
    server.add_message_handler(Box::new(MonitorHandler::new(Box::new(NoSensorBackend))));

    if let Err(e) = server.start() {
        error!("[ELEVATED] Failed to start pipe server: {}", e);
        return;
    }
    info!("[ELEVATED] Serving on {}", config.pipe_name);

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    let _ = SHUTDOWN_TX.set(shutdown_tx);
    if let Err(e) = install_ctrl_handler() {
        error!("[ELEVATED] Failed to install console ctrl handler: {}", e);
    }

    // Block until a console ctrl event asks us to stop.
    let _ = shutdown_rx.recv();
    info!("[ELEVATED] Shutdown requested");
    server.stop();
    info!("[ELEVATED] Shutdown complete");
}

#[cfg(windows)]
fn install_ctrl_handler() -> Result<(), String> {
    use windows::Win32::System::Console::SetConsoleCtrlHandler;

    unsafe { SetConsoleCtrlHandler(Some(console_ctrl_handler), true).map_err(|e| e.to_string()) }
}

#[cfg(windows)]
unsafe extern "system" fn console_ctrl_handler(
    _ctrl_type: u32,
) -> windows::Win32::Foundation::BOOL {
    if let Some(tx) = SHUTDOWN_TX.get() {
        let _ = tx.send(());
    }
    windows::Win32::Foundation::TRUE
}

#[cfg(windows)]
struct SingleInstanceGuard {
    handle: windows::Win32::Foundation::HANDLE,
}

#[cfg(windows)]
impl SingleInstanceGuard {
    fn acquire(name: &str) -> Result<Self, SingleInstanceError> {
        use windows::core::PCWSTR;
        use windows::Win32::Foundation::{CloseHandle, GetLastError, ERROR_ALREADY_EXISTS};
        use windows::Win32::System::Threading::CreateMutexW;

        let wide_name = to_wide(name);

        unsafe {
            let handle = CreateMutexW(None, true.into(), PCWSTR(wide_name.as_ptr()))
                .map_err(SingleInstanceError::CreateFailed)?;

            let last_error = GetLastError();
            if last_error == ERROR_ALREADY_EXISTS {
                let _ = CloseHandle(handle);
                return Err(SingleInstanceError::AlreadyRunning);
            }

            Ok(Self { handle })
        }
    }
}

#[cfg(windows)]
impl Drop for SingleInstanceGuard {
    fn drop(&mut self) {
        use windows::Win32::Foundation::{CloseHandle, HANDLE};
        use windows::Win32::System::Threading::ReleaseMutex;

        unsafe {
            if self.handle.is_invalid() {
                return;
            }
            let _ = ReleaseMutex(self.handle);
            let _ = CloseHandle(self.handle);
            self.handle = HANDLE::default();
        }
    }
}

#[cfg(windows)]
#[derive(Debug)]
enum SingleInstanceError {
    AlreadyRunning,
    CreateFailed(windows::core::Error),
}

#[cfg(windows)]
impl std::fmt::Display for SingleInstanceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SingleInstanceError::AlreadyRunning => write!(f, "instance already running"),
            SingleInstanceError::CreateFailed(err) => write!(f, "system error: {}", err),
        }
    }
}

#[cfg(windows)]
fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}
