//! Kernel Bridge Core - Platform-independent abstractions and configurations
//!
//! This crate provides the wire protocol, process traits, configuration and
//! error types shared by the platform crates and the client façade.

pub mod api;
mod config;
mod error;
mod process;
pub mod protocol;
mod stderr;
mod transport;

pub use api::*;
pub use config::*;
pub use error::*;
pub use process::*;
pub use stderr::StderrBuffer;
pub use transport::{KernelTransport, call};
