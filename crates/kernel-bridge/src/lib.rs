//! Drive an out-of-process kernel over a line-delimited JSON conversation on
//! its standard streams.
//!
//! [`KernelClient`] owns one spawned kernel. [`KernelRuntime`] starts it lazily
//! and exactly once for any number of concurrent callers. [`blocking`] and
//! [`global`] provide the same operations to synchronous code.

pub mod blocking;
mod client;
pub mod global;
mod platform;
mod runtime;

pub use client::KernelClient;
pub use platform::PlatformProcessManagerFactory;
pub use runtime::KernelRuntime;

// Re-export core functionality
pub use kernel_bridge_core::*;
