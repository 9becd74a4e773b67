//! Windows process management for kernel processes

mod windows_process_manager;

pub use windows_process_manager::{WindowsProcessHandle, WindowsProcessManager};

use kernel_bridge_core::{ProcessManager, ProcessManagerFactory};

/// Creates the taskkill-based manager used on Windows hosts
pub struct WindowsProcessManagerFactory;

impl ProcessManagerFactory for WindowsProcessManagerFactory {
    fn create_process_manager() -> Box<dyn ProcessManager> {
        Box::new(WindowsProcessManager::new())
    }

    fn platform_name() -> &'static str {
        "Windows"
    }
}
