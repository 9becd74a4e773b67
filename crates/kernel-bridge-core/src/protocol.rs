//! Line framing and reply envelopes for the kernel's stdio conversation.
//!
//! Requests go out as one compact JSON document followed by a newline.
//! Replies come back one per line and are unwrapped here.

use crate::api::KernelRequest;
use crate::error::{BridgeError, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

/// Shape of a reply line before its payload is extracted
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    Ok {
        ok: Value,
    },
    Fault {
        error: String,
        #[serde(default)]
        stack: Option<String>,
    },
    Bare(Value),
}

impl Envelope {
    /// Payload of a successful reply, or the kernel's own error
    pub fn into_payload(self) -> Result<Value> {
        match self {
            Envelope::Ok { ok } => Ok(ok),
            Envelope::Fault { error, stack } => Err(BridgeError::Kernel {
                message: error,
                stack,
            }),
            Envelope::Bare(value) => Ok(value),
        }
    }
}

/// Serialize a request as a single newline-terminated line
pub fn encode_request(request: &KernelRequest) -> Result<Vec<u8>> {
    let mut line = serde_json::to_vec(request).map_err(BridgeError::Encode)?;
    line.push(b'\n');
    Ok(line)
}

/// Parse one reply line. A line that is not JSON at all is reported as `Decode`.
pub fn decode_line(line: &str) -> Result<Envelope> {
    serde_json::from_str(line.trim()).map_err(BridgeError::Decode)
}

/// Convert an unwrapped payload into the type an operation expects
pub fn decode_payload<T: DeserializeOwned>(payload: Value) -> Result<T> {
    serde_json::from_value(payload).map_err(BridgeError::Decode)
}

/// Extract the runtime version from a greeting such as `@scope/runtime@1.2.3`.
///
/// The version is whatever follows the last `@` and must not be empty.
/// Versions that are not semver are accepted with a warning.
pub fn parse_version(greeting: &str) -> Result<String> {
    let failed = || BridgeError::VersionParse {
        greeting: greeting.to_string(),
    };

    let (_, tail) = greeting.rsplit_once('@').ok_or_else(failed)?;
    let version = tail.trim();
    if version.is_empty() {
        return Err(failed());
    }

    if semver::Version::parse(version).is_err() {
        warn!("Kernel runtime version {:?} is not semver", version);
    }
    Ok(version.to_string())
}
