#![allow(dead_code)]

use kernel_bridge::{KernelArtifact, KernelConfig, TimeoutConfig};
use serde_json::{Value, json};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .with_line_number(true)
        .try_init();
}

/// Timeouts short enough to keep failure-path tests quick
pub fn test_timeouts() -> TimeoutConfig {
    TimeoutConfig {
        handshake_timeout_ms: 5_000,
        response_timeout_ms: 400,
        stderr_grace_ms: 100,
        shutdown_grace_ms: 1_000,
        max_stderr_bytes: 4096,
    }
}

pub fn mock_config_with(name: &str, manifest: Value) -> KernelConfig {
    KernelConfig::builder()
        .name(name)
        .program(env!("CARGO_BIN_EXE_kernel-bridge-mock"))
        .artifact(KernelArtifact::embedded(
            serde_json::to_vec(&manifest).unwrap(),
            ".json",
        ))
        .timeouts(test_timeouts())
        .build()
        .unwrap()
}

pub fn mock_config(name: &str) -> KernelConfig {
    mock_config_with(name, json!({}))
}
