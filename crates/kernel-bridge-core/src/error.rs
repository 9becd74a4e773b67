use std::sync::Arc;
use thiserror::Error;

/// Core error types for kernel bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Failed to spawn kernel process: {0}")]
    Spawn(String),

    #[error("Failed to materialize kernel artifact: {0}")]
    Artifact(#[source] std::io::Error),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Unable to parse runtime version from greeting {greeting:?}")]
    VersionParse { greeting: String },

    #[error("Failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Failed to decode response: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Kernel stream error: {0}")]
    Io(#[from] std::io::Error),

    /// Text the kernel wrote to stderr instead of producing a response.
    #[error("{0}")]
    KernelStderr(String),

    #[error("Kernel error: {message}")]
    Kernel {
        message: String,
        stack: Option<String>,
    },

    #[error("No response from kernel")]
    NoResponse,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Kernel stream is desynchronized: {0}")]
    Poisoned(String),

    #[error("Kernel client is closed")]
    Closed,

    #[error("Kernel initialization failed: {0}")]
    Initialization(#[source] Arc<BridgeError>),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Result alias used throughout the bridge
pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    pub fn spawn(message: impl Into<String>) -> Self {
        Self::Spawn(message.into())
    }

    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake(message.into())
    }

    pub fn poisoned(message: impl Into<String>) -> Self {
        Self::Poisoned(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Check if this error means no further request can succeed on the same client
    pub fn is_fatal(&self) -> bool {
        match self {
            BridgeError::Spawn(_)
            | BridgeError::Artifact(_)
            | BridgeError::Handshake(_)
            | BridgeError::VersionParse { .. }
            | BridgeError::Poisoned(_)
            | BridgeError::Closed
            | BridgeError::Initialization(_)
            | BridgeError::Configuration(_) => true,
            _ => false,
        }
    }

    /// Check if the kernel itself explained the failure
    pub fn is_kernel_reported(&self) -> bool {
        matches!(
            self,
            BridgeError::KernelStderr(_) | BridgeError::Kernel { .. }
        )
    }
}
