mod common;

use common::{init_tracing, mock_config};
use kernel_bridge::{
    BridgeError, CreateRequest, GetRequest, InvokeRequest, SetRequest, StaticInvokeRequest,
    blocking, global,
};
use serde_json::json;

#[test]
fn test_blocking_runtime_round_trip() {
    init_tracing();
    let runtime = blocking::KernelRuntime::new(mock_config("blocking")).unwrap();

    let obj = runtime
        .create(CreateRequest {
            fqn: "calc.Counter".to_string(),
            args: vec![json!(21)],
        })
        .unwrap();
    runtime
        .set(SetRequest {
            obj_ref: obj.clone(),
            property: "name".to_string(),
            value: json!("answer"),
        })
        .unwrap();

    let name = runtime
        .get(GetRequest {
            obj_ref: obj.clone(),
            property: "name".to_string(),
        })
        .unwrap();
    assert_eq!(name.value, json!("answer"));

    let doubled = runtime
        .invoke(InvokeRequest {
            obj_ref: obj,
            method: "double".to_string(),
            args: Vec::new(),
        })
        .unwrap();
    assert_eq!(doubled.result, json!(42));

    runtime.close().unwrap();
    runtime.close().unwrap();
}

#[test]
fn test_global_runtime_is_installed_once_across_threads() {
    init_tracing();
    assert!(matches!(
        global::runtime(),
        Err(BridgeError::Configuration(_))
    ));

    let handles: Vec<_> = (0..4)
        .map(|i| {
            std::thread::spawn(move || {
                let runtime = global::init(mock_config(&format!("global-{i}"))).unwrap();
                runtime
                    .static_invoke(StaticInvokeRequest {
                        fqn: "mock.Kernel".to_string(),
                        method: "add".to_string(),
                        args: vec![json!(i), json!(1)],
                    })
                    .unwrap();
                runtime as *const blocking::KernelRuntime as usize
            })
        })
        .collect();

    let addresses: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(addresses.windows(2).all(|pair| pair[0] == pair[1]));

    let runtime = global::runtime().unwrap();
    // Objects created by any thread live in the single shared kernel
    runtime
        .create(CreateRequest {
            fqn: "calc.Counter".to_string(),
            args: Vec::new(),
        })
        .unwrap();
    let count = runtime
        .static_invoke(StaticInvokeRequest {
            fqn: "mock.Kernel".to_string(),
            method: "objectCount".to_string(),
            args: Vec::new(),
        })
        .unwrap();
    assert_eq!(count.result, json!(1));

    runtime.close().unwrap();
}
