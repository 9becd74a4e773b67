//! Synchronous access to a kernel for callers without an async runtime.
//!
//! [`KernelRuntime`] owns a small dedicated tokio runtime. Its methods block
//! the calling thread and must not be called from inside another tokio runtime.

use crate::runtime::KernelRuntime as AsyncKernelRuntime;
use kernel_bridge_core::{
    CreateRequest, DelRequest, DelResponse, GetRequest, GetResponse, InvokeRequest,
    InvokeResponse, KernelConfig, KernelOperation, LoadRequest, LoadResponse, ObjRef, Result,
    SetRequest, SetResponse, StaticInvokeRequest,
};
use tokio::runtime::{Builder, Runtime};

pub struct KernelRuntime {
    // Dropped before the runtime that drives it
    inner: AsyncKernelRuntime,
    runtime: Runtime,
}

impl KernelRuntime {
    pub fn new(config: KernelConfig) -> Result<Self> {
        Self::from_async(AsyncKernelRuntime::new(config))
    }

    /// Drive an existing async runtime from synchronous code
    pub fn from_async(inner: AsyncKernelRuntime) -> Result<Self> {
        // One worker keeps draining kernel stderr between calls
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("kernel-bridge")
            .enable_all()
            .build()?;
        Ok(Self { inner, runtime })
    }

    pub fn start(&self) -> Result<()> {
        self.runtime.block_on(self.inner.start())
    }

    pub fn runtime_version(&self) -> Result<String> {
        self.runtime.block_on(self.inner.runtime_version())
    }

    pub fn call<Op: KernelOperation>(&self, operation: Op) -> Result<Op::Response> {
        self.runtime.block_on(self.inner.call(operation))
    }

    pub fn load(&self, request: LoadRequest) -> Result<LoadResponse> {
        self.call(request)
    }

    pub fn create(&self, request: CreateRequest) -> Result<ObjRef> {
        self.call(request)
    }

    pub fn get(&self, request: GetRequest) -> Result<GetResponse> {
        self.call(request)
    }

    pub fn set(&self, request: SetRequest) -> Result<SetResponse> {
        self.call(request)
    }

    pub fn invoke(&self, request: InvokeRequest) -> Result<InvokeResponse> {
        self.call(request)
    }

    pub fn static_invoke(&self, request: StaticInvokeRequest) -> Result<InvokeResponse> {
        self.call(request)
    }

    pub fn del(&self, request: DelRequest) -> Result<DelResponse> {
        self.call(request)
    }

    pub fn close(&self) -> Result<()> {
        self.runtime.block_on(self.inner.close())
    }
}
