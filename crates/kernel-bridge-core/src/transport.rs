use crate::api::{KernelOperation, KernelRequest};
use crate::error::Result;
use crate::protocol::decode_payload;
use async_trait::async_trait;
use serde_json::Value;

/// A live conversation with one kernel process
#[async_trait]
pub trait KernelTransport: Send + Sync {
    /// Send one request and wait for its reply payload.
    ///
    /// Implementations serialize concurrent callers so that each reply
    /// is matched to the request that produced it.
    async fn request(&self, request: KernelRequest) -> Result<Value>;

    /// Version reported by the kernel during the handshake
    fn runtime_version(&self) -> &str;

    /// Stop the kernel and release its resources. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// Run a typed operation over any transport
pub async fn call<Op: KernelOperation>(
    transport: &dyn KernelTransport,
    operation: Op,
) -> Result<Op::Response> {
    let payload = transport.request(operation.into()).await?;
    decode_payload(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{GetRequest, ObjRef};
    use crate::error::BridgeError;
    use serde_json::json;
    use std::sync::Mutex;

    struct Recording {
        seen: Mutex<Vec<&'static str>>,
        reply: Value,
    }

    #[async_trait]
    impl KernelTransport for Recording {
        async fn request(&self, request: KernelRequest) -> Result<Value> {
            self.seen.lock().unwrap().push(request.api());
            Ok(self.reply.clone())
        }

        fn runtime_version(&self) -> &str {
            "0.0.0"
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn get_count() -> GetRequest {
        GetRequest {
            obj_ref: ObjRef::new("Counter@1"),
            property: "count".to_string(),
        }
    }

    #[tokio::test]
    async fn test_call_decodes_typed_response() {
        let transport = Recording {
            seen: Mutex::new(Vec::new()),
            reply: json!({"value": 7}),
        };

        let response = call(&transport, get_count()).await.unwrap();
        assert_eq!(response.value, json!(7));
        assert_eq!(*transport.seen.lock().unwrap(), vec!["get"]);
    }

    #[tokio::test]
    async fn test_call_reports_shape_mismatch() {
        let transport = Recording {
            seen: Mutex::new(Vec::new()),
            reply: json!("not an object"),
        };

        let result = call(&transport, get_count()).await;
        assert!(matches!(result, Err(BridgeError::Decode(_))));
    }
}
