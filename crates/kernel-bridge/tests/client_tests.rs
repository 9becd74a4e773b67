mod common;

use common::{init_tracing, mock_config, mock_config_with};
use kernel_bridge::{
    BridgeError, CreateRequest, GetRequest, InvokeRequest, KernelArtifact, KernelClient,
    KernelRequest, ObjRef, SetRequest, StaticInvokeRequest, call,
};
use serde_json::{Value, json};

fn invoke(obj_ref: &ObjRef, method: &str) -> InvokeRequest {
    InvokeRequest {
        obj_ref: obj_ref.clone(),
        method: method.to_string(),
        args: Vec::new(),
    }
}

async fn create(client: &KernelClient, args: Vec<Value>) -> ObjRef {
    call(
        client,
        CreateRequest {
            fqn: "calc.Counter".to_string(),
            args,
        },
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_handshake_negotiates_runtime_version() {
    init_tracing();

    let client = KernelClient::spawn(mock_config("handshake")).await.unwrap();
    assert_eq!(client.runtime_version(), "1.2.3");
    assert_eq!(client.greeting(), "@kernel-bridge/mock@1.2.3");
    assert!(client.pid().is_some());
    assert!(client.is_running().await);

    client.close().await.unwrap();
    assert!(!client.is_running().await);
}

#[tokio::test]
async fn test_create_then_invoke_doubles_value() {
    init_tracing();
    let client = KernelClient::spawn(mock_config("double")).await.unwrap();

    let counter = create(&client, vec![json!(10)]).await;
    assert!(counter.id.starts_with("calc.Counter@"));

    let response = call(&client, invoke(&counter, "double")).await.unwrap();
    assert_eq!(response.result, json!(20));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_set_then_get_round_trips_value() {
    init_tracing();
    let client = KernelClient::spawn(mock_config("properties")).await.unwrap();
    let obj = create(&client, Vec::new()).await;

    call(
        &client,
        SetRequest {
            obj_ref: obj.clone(),
            property: "label".to_string(),
            value: json!({"text": "hello", "size": 3}),
        },
    )
    .await
    .unwrap();

    let response = call(
        &client,
        GetRequest {
            obj_ref: obj.clone(),
            property: "label".to_string(),
        },
    )
    .await
    .unwrap();
    assert_eq!(response.value, json!({"text": "hello", "size": 3}));

    // Unknown properties come back as null
    let missing = call(
        &client,
        GetRequest {
            obj_ref: obj,
            property: "nothing".to_string(),
        },
    )
    .await
    .unwrap();
    assert_eq!(missing.value, Value::Null);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_stderr_text_becomes_the_error_message() {
    init_tracing();
    let client = KernelClient::spawn(mock_config("stderr")).await.unwrap();
    let obj = create(&client, vec![json!(1)]).await;

    let error = call(&client, invoke(&obj, "fail")).await.unwrap_err();
    assert!(matches!(error, BridgeError::KernelStderr(_)));
    assert_eq!(error.to_string(), "boom");

    // No reply ever followed the stderr text, so the stream cannot be trusted
    let next = call(&client, invoke(&obj, "double")).await.unwrap_err();
    assert!(matches!(next, BridgeError::Poisoned(_)));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_late_reply_after_stderr_is_not_given_to_next_call() {
    init_tracing();
    let client = KernelClient::spawn(mock_config("late-reply")).await.unwrap();
    let obj = create(&client, Vec::new()).await;

    let error = call(&client, invoke(&obj, "slow")).await.unwrap_err();
    assert_eq!(error.to_string(), "warning: slow path");

    let response = call(
        &client,
        InvokeRequest {
            obj_ref: obj.clone(),
            method: "echo".to_string(),
            args: vec![json!("second")],
        },
    )
    .await
    .unwrap();
    assert_eq!(response.result, json!("second"));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_close_cancels_pending_request() {
    init_tracing();
    let client = std::sync::Arc::new(KernelClient::spawn(mock_config("cancel")).await.unwrap());
    let obj = create(&client, Vec::new()).await;

    let pending = {
        let client = client.clone();
        let request = invoke(&obj, "mute");
        tokio::spawn(async move { call(client.as_ref(), request).await })
    };
    // Let the request reach the kernel before closing
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    client.close().await.unwrap();

    let error = pending.await.unwrap().unwrap_err();
    assert!(matches!(error, BridgeError::Cancelled));

    let next = call(client.as_ref(), invoke(&obj, "echo")).await.unwrap_err();
    assert!(matches!(next, BridgeError::Closed));
}

#[tokio::test]
async fn test_silent_kernel_is_distinguished_from_stderr_failure() {
    init_tracing();
    let client = KernelClient::spawn(mock_config("silent")).await.unwrap();
    let obj = create(&client, Vec::new()).await;

    let error = call(&client, invoke(&obj, "mute")).await.unwrap_err();
    assert!(matches!(error, BridgeError::NoResponse));
    assert!(!error.is_kernel_reported());

    // The stream may still deliver a late reply, so the client refuses further calls
    let next = call(&client, invoke(&obj, "double")).await.unwrap_err();
    assert!(matches!(next, BridgeError::Poisoned(_)));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_stdout_reply_wins_over_stderr_noise() {
    init_tracing();
    let client = KernelClient::spawn(mock_config("noisy")).await.unwrap();
    let obj = create(&client, Vec::new()).await;

    let response = call(&client, invoke(&obj, "noisy")).await.unwrap();
    assert_eq!(response.result, json!("done"));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_error_envelope_is_a_kernel_error() {
    init_tracing();
    let client = KernelClient::spawn(mock_config("throw")).await.unwrap();
    let obj = create(&client, Vec::new()).await;

    match call(&client, invoke(&obj, "throw")).await {
        Err(BridgeError::Kernel { message, stack }) => {
            assert!(message.starts_with("TypeError"));
            assert!(stack.is_some());
        }
        other => panic!("expected kernel error, got {other:?}"),
    }

    // Still synchronized
    assert!(call(&client, invoke(&obj, "echo")).await.is_ok());
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_shape_mismatch_does_not_poison() {
    init_tracing();
    let client = KernelClient::spawn(mock_config("mismatch")).await.unwrap();
    let obj = create(&client, vec![json!(4)]).await;

    let error = call(&client, invoke(&obj, "mismatch")).await.unwrap_err();
    assert!(matches!(error, BridgeError::Decode(_)));

    let response = call(&client, invoke(&obj, "double")).await.unwrap();
    assert_eq!(response.result, json!(8));
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_unparseable_output_poisons_client() {
    init_tracing();
    let client = KernelClient::spawn(mock_config("garbage")).await.unwrap();
    let obj = create(&client, Vec::new()).await;

    let error = call(&client, invoke(&obj, "garbage")).await.unwrap_err();
    assert!(matches!(error, BridgeError::Poisoned(_)));
    assert!(error.is_fatal());

    let next = client
        .request(KernelRequest::Invoke(invoke(&obj, "echo")))
        .await
        .unwrap_err();
    assert!(matches!(next, BridgeError::Poisoned(_)));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_kernel_crash_reports_stderr_then_closed() {
    init_tracing();
    let client = KernelClient::spawn(mock_config("crash")).await.unwrap();
    let obj = create(&client, Vec::new()).await;

    let error = call(&client, invoke(&obj, "crash")).await.unwrap_err();
    assert_eq!(error.to_string(), "fatal: kernel crashed");

    let next = call(&client, invoke(&obj, "echo")).await.unwrap_err();
    assert!(matches!(next, BridgeError::Closed));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_temp_artifact_removed_after_handshake() {
    init_tracing();
    let client = KernelClient::spawn(mock_config("artifact")).await.unwrap();

    let response = call(
        &client,
        StaticInvokeRequest {
            fqn: "mock.Kernel".to_string(),
            method: "artifactExists".to_string(),
            args: Vec::new(),
        },
    )
    .await
    .unwrap();
    assert_eq!(response.result, json!(false));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_artifact_on_disk_is_left_in_place() {
    init_tracing();
    let manifest = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    std::fs::write(manifest.path(), b"{}").unwrap();

    let mut config = mock_config("on-disk");
    config.artifact = KernelArtifact::path(manifest.path());
    let client = KernelClient::spawn(config).await.unwrap();

    let response = call(
        &client,
        StaticInvokeRequest {
            fqn: "mock.Kernel".to_string(),
            method: "artifactExists".to_string(),
            args: Vec::new(),
        },
    )
    .await
    .unwrap();
    assert_eq!(response.result, json!(true));

    client.close().await.unwrap();
    assert!(manifest.path().exists());
}

#[tokio::test]
async fn test_greeting_without_version_fails_handshake() {
    init_tracing();
    let config = mock_config_with("bad-greeting", json!({"greeting": "mock-kernel"}));

    match KernelClient::spawn(config).await {
        Err(BridgeError::VersionParse { greeting }) => assert_eq!(greeting, "mock-kernel"),
        Err(other) => panic!("expected version parse error, got {other}"),
        Ok(_) => panic!("handshake should fail"),
    }
}

#[tokio::test]
async fn test_missing_greeting_times_out() {
    init_tracing();
    let mut config = mock_config_with("no-greeting", json!({"skipGreeting": true}));
    config.timeouts.handshake_timeout_ms = 300;

    let error = KernelClient::spawn(config).await.err().expect("spawn should fail");
    assert!(matches!(error, BridgeError::Handshake(_)));
    assert!(error.is_fatal());
}

#[tokio::test]
async fn test_unstartable_program_is_a_spawn_error() {
    init_tracing();
    let mut config = mock_config("missing-program");
    config.program = "/nonexistent/kernel-interpreter".to_string();

    let error = KernelClient::spawn(config).await.err().expect("spawn should fail");
    assert!(matches!(error, BridgeError::Spawn(_)));
}

#[tokio::test]
async fn test_startup_stderr_is_not_blamed_on_first_call() {
    init_tracing();
    let config = mock_config_with(
        "startup-noise",
        json!({"startupStderr": "Debugger attached."}),
    );
    let client = KernelClient::spawn(config).await.unwrap();
    // Let the banner reach the capture buffer
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let obj = create(&client, vec![json!(3)]).await;
    let response = call(&client, invoke(&obj, "double")).await.unwrap();
    assert_eq!(response.result, json!(6));

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_close_is_idempotent_and_final() {
    init_tracing();
    let client = KernelClient::spawn(mock_config("close")).await.unwrap();

    client.close().await.unwrap();
    client.close().await.unwrap();

    let error = client
        .request(KernelRequest::StaticInvoke(StaticInvokeRequest {
            fqn: "mock.Kernel".to_string(),
            method: "add".to_string(),
            args: vec![json!(1), json!(2)],
        }))
        .await
        .unwrap_err();
    assert!(matches!(error, BridgeError::Closed));
}

#[tokio::test]
async fn test_concurrent_requests_are_serialized() {
    init_tracing();
    let client = std::sync::Arc::new(KernelClient::spawn(mock_config("concurrent")).await.unwrap());

    let mut tasks = Vec::new();
    for i in 0..16i64 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let response = call(
                client.as_ref(),
                StaticInvokeRequest {
                    fqn: "mock.Kernel".to_string(),
                    method: "add".to_string(),
                    args: vec![json!(i), json!(1000)],
                },
            )
            .await
            .unwrap();
            (i, response.result)
        }));
    }

    for task in tasks {
        let (i, result) = task.await.unwrap();
        assert_eq!(result, json!(i + 1000));
    }

    client.close().await.unwrap();
}
