use kernel_bridge_core::{ProcessManager, ProcessManagerFactory};

/// Platform-independent factory that selects the appropriate implementation at compile time
pub struct PlatformProcessManagerFactory;

impl ProcessManagerFactory for PlatformProcessManagerFactory {
    fn create_process_manager() -> Box<dyn ProcessManager> {
        #[cfg(unix)]
        return kernel_bridge_unix::UnixProcessManagerFactory::create_process_manager();

        #[cfg(windows)]
        return kernel_bridge_windows::WindowsProcessManagerFactory::create_process_manager();

        #[cfg(not(any(unix, windows)))]
        compile_error!("Unsupported platform: only Unix and Windows are currently supported");
    }

    fn platform_name() -> &'static str {
        #[cfg(unix)]
        return kernel_bridge_unix::UnixProcessManagerFactory::platform_name();

        #[cfg(windows)]
        return kernel_bridge_windows::WindowsProcessManagerFactory::platform_name();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_detection() {
        let platform = PlatformProcessManagerFactory::platform_name();
        #[cfg(unix)]
        assert_eq!(platform, "Unix");
        #[cfg(windows)]
        assert_eq!(platform, "Windows");

        let _process_manager = PlatformProcessManagerFactory::create_process_manager();
    }
}
