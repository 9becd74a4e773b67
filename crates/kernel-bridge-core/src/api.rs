//! Typed requests and responses understood by the kernel.
//!
//! Every request is a JSON object tagged with an `api` field naming the
//! operation. Successful replies carry the operation's payload, which is
//! decoded into the matching `Response` type of [`KernelOperation`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Opaque handle to an object living inside the kernel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjRef {
    #[serde(rename = "$jsii.byref")]
    pub id: String,
}

impl ObjRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadRequest {
    pub name: String,
    pub version: String,
    pub tarball: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub fqn: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetRequest {
    #[serde(rename = "objref")]
    pub obj_ref: ObjRef,
    pub property: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetRequest {
    #[serde(rename = "objref")]
    pub obj_ref: ObjRef,
    pub property: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeRequest {
    #[serde(rename = "objref")]
    pub obj_ref: ObjRef,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticInvokeRequest {
    pub fqn: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// Release a kernel object that is no longer referenced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelRequest {
    #[serde(rename = "objref")]
    pub obj_ref: ObjRef,
}

/// Any request the bridge can put on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "api", rename_all = "lowercase")]
pub enum KernelRequest {
    Load(LoadRequest),
    Create(CreateRequest),
    Get(GetRequest),
    Set(SetRequest),
    Invoke(InvokeRequest),
    #[serde(rename = "sinvoke")]
    StaticInvoke(StaticInvokeRequest),
    Del(DelRequest),
}

impl KernelRequest {
    /// Wire name of the operation, used for logging
    pub fn api(&self) -> &'static str {
        match self {
            KernelRequest::Load(_) => "load",
            KernelRequest::Create(_) => "create",
            KernelRequest::Get(_) => "get",
            KernelRequest::Set(_) => "set",
            KernelRequest::Invoke(_) => "invoke",
            KernelRequest::StaticInvoke(_) => "sinvoke",
            KernelRequest::Del(_) => "del",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadResponse {
    pub assembly: String,
    pub types: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetResponse {
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetResponse {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeResponse {
    #[serde(default)]
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelResponse {}

/// The first line the kernel prints after it starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloResponse {
    pub hello: String,
}

/// A request whose reply has a known shape
pub trait KernelOperation: Into<KernelRequest> + Send {
    type Response: DeserializeOwned + Send + 'static;
}

macro_rules! kernel_operation {
    ($($request:ident => $variant:ident, $response:ty;)*) => {
        $(
            impl From<$request> for KernelRequest {
                fn from(request: $request) -> Self {
                    KernelRequest::$variant(request)
                }
            }

            impl KernelOperation for $request {
                type Response = $response;
            }
        )*
    };
}

kernel_operation! {
    LoadRequest => Load, LoadResponse;
    CreateRequest => Create, ObjRef;
    GetRequest => Get, GetResponse;
    SetRequest => Set, SetResponse;
    InvokeRequest => Invoke, InvokeResponse;
    StaticInvokeRequest => StaticInvoke, InvokeResponse;
    DelRequest => Del, DelResponse;
}
