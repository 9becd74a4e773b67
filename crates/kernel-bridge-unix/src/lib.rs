mod unix_process_manager;

pub use unix_process_manager::{UnixProcessHandle, UnixProcessManager};

#[cfg(unix)]
pub struct UnixProcessManagerFactory;

#[cfg(unix)]
impl kernel_bridge_core::ProcessManagerFactory for UnixProcessManagerFactory {
    fn create_process_manager() -> Box<dyn kernel_bridge_core::ProcessManager> {
        use kernel_bridge_core::ProcessManager;
        Box::new(UnixProcessManager::new())
    }

    fn platform_name() -> &'static str {
        "Unix"
    }
}
