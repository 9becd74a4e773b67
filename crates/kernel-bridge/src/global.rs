//! The process-wide kernel.
//!
//! [`init`] installs it once; every later call, from any thread, gets the
//! same instance and the configuration passed by the first caller wins.

use crate::blocking::KernelRuntime;
use kernel_bridge_core::{BridgeError, KernelConfig, Result};
use std::sync::OnceLock;
use tracing::debug;

static GLOBAL_RUNTIME: OnceLock<KernelRuntime> = OnceLock::new();

/// Install the global kernel runtime, or return the one already installed.
///
/// The kernel itself starts on the first operation.
pub fn init(config: KernelConfig) -> Result<&'static KernelRuntime> {
    if let Some(runtime) = GLOBAL_RUNTIME.get() {
        debug!("Global kernel runtime already installed, ignoring {}", config.name);
        return Ok(runtime);
    }

    // A racing loser's runtime is dropped before it ever spawns a kernel
    let candidate = KernelRuntime::new(config)?;
    Ok(GLOBAL_RUNTIME.get_or_init(|| candidate))
}

pub fn get() -> Option<&'static KernelRuntime> {
    GLOBAL_RUNTIME.get()
}

/// The installed runtime, or a configuration error if [`init`] was never called
pub fn runtime() -> Result<&'static KernelRuntime> {
    get().ok_or_else(|| BridgeError::configuration("global kernel runtime is not initialized"))
}
