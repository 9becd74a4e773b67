use crate::error::{BridgeError, Result};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Timing configuration for the kernel conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutConfig {
    /// How long to wait for the kernel's greeting after spawn (in milliseconds)
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// How long to wait for the response to a single request (in milliseconds)
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// How long stdout is still awaited once stderr output shows up (in milliseconds)
    #[serde(default = "default_stderr_grace_ms")]
    pub stderr_grace_ms: u64,

    /// How long `close` waits for the kernel to exit on its own (in milliseconds)
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Upper bound on retained stderr text; older bytes are dropped first
    #[serde(default = "default_max_stderr_bytes")]
    pub max_stderr_bytes: usize,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            stderr_grace_ms: default_stderr_grace_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            max_stderr_bytes: default_max_stderr_bytes(),
        }
    }
}

impl TimeoutConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generous limits for kernels that load large bundles on slow machines
    pub fn patient() -> Self {
        Self {
            handshake_timeout_ms: 120_000,
            response_timeout_ms: 300_000,
            stderr_grace_ms: 250,
            shutdown_grace_ms: 5_000,
            max_stderr_bytes: default_max_stderr_bytes(),
        }
    }

    /// Tight limits, mostly useful against local test kernels
    pub fn eager() -> Self {
        Self {
            handshake_timeout_ms: 5_000,
            response_timeout_ms: 2_000,
            stderr_grace_ms: 50,
            shutdown_grace_ms: 500,
            max_stderr_bytes: 16 * 1024,
        }
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> Result<()> {
        if self.handshake_timeout_ms == 0 {
            return Err(BridgeError::configuration(
                "handshake_timeout_ms must be greater than zero",
            ));
        }

        if self.response_timeout_ms == 0 {
            return Err(BridgeError::configuration(
                "response_timeout_ms must be greater than zero",
            ));
        }

        if self.stderr_grace_ms > self.response_timeout_ms {
            return Err(BridgeError::configuration(
                "stderr_grace_ms cannot be greater than response_timeout_ms",
            ));
        }

        if self.max_stderr_bytes == 0 {
            return Err(BridgeError::configuration(
                "max_stderr_bytes must be greater than zero",
            ));
        }

        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn stderr_grace(&self) -> Duration {
        Duration::from_millis(self.stderr_grace_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// The self-contained program the kernel interpreter loads
#[derive(Debug, Clone, PartialEq)]
pub enum KernelArtifact {
    /// Bundle contents, written to a uniquely named temp file for each spawn
    Embedded {
        bytes: Cow<'static, [u8]>,
        suffix: String,
    },
    /// Bundle already on disk; the bridge never deletes it
    Path(PathBuf),
}

impl KernelArtifact {
    pub fn embedded(bytes: impl Into<Cow<'static, [u8]>>, suffix: impl Into<String>) -> Self {
        Self::Embedded {
            bytes: bytes.into(),
            suffix: suffix.into(),
        }
    }

    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }
}

impl From<PathBuf> for KernelArtifact {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&'static [u8]> for KernelArtifact {
    fn from(bytes: &'static [u8]) -> Self {
        Self::embedded(bytes, ".js")
    }
}

/// Main kernel launch configuration
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(setter(into, strip_option))]
pub struct KernelConfig {
    pub name: String,
    #[builder(default = "default_program()")]
    pub program: String,
    #[builder(default)]
    #[builder(setter(custom))]
    pub args: Vec<String>,
    #[builder(default)]
    #[builder(setter(custom))]
    pub env: HashMap<String, String>,
    pub artifact: KernelArtifact,
    #[builder(default)]
    pub working_directory: Option<PathBuf>,
    #[builder(default)]
    pub timeouts: TimeoutConfig,
}

impl KernelConfig {
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(BridgeError::configuration("program must not be empty"));
        }

        if let KernelArtifact::Embedded { bytes, .. } = &self.artifact {
            if bytes.is_empty() {
                return Err(BridgeError::configuration(
                    "embedded kernel artifact is empty",
                ));
            }
        }

        self.timeouts.validate()
    }

    /// Arguments handed to `program`: the configured args followed by the artifact path
    pub fn launch_args(&self, artifact_path: &Path) -> Vec<String> {
        let mut args = self.args.clone();
        args.push(artifact_path.to_string_lossy().into_owned());
        args
    }
}

impl KernelConfigBuilder {
    pub fn args<S: ToString, I: IntoIterator<Item = S>>(&mut self, iter: I) -> &mut Self {
        let args: Vec<String> = iter.into_iter().map(|s| s.to_string()).collect();
        self.args = Some(args);
        self
    }

    pub fn env<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let map = self.env.get_or_insert_with(HashMap::new);
        map.insert(key.to_string(), value.to_string());
        self
    }

    pub fn env_multi<T: ToString, I: IntoIterator<Item = (T, T)>>(&mut self, iter: I) -> &mut Self {
        let env = self.env.get_or_insert_with(HashMap::new);
        for (key, value) in iter {
            env.insert(key.to_string(), value.to_string());
        }
        self
    }
}

fn default_program() -> String {
    "node".to_string()
}

// Default value functions for serde
fn default_handshake_timeout_ms() -> u64 {
    30_000
}
fn default_response_timeout_ms() -> u64 {
    30_000
}
fn default_stderr_grace_ms() -> u64 {
    100
}
fn default_shutdown_grace_ms() -> u64 {
    2_000
}
fn default_max_stderr_bytes() -> usize {
    64 * 1024
}
