use crate::client::KernelClient;
use kernel_bridge_core::{
    BridgeError, CreateRequest, DelRequest, DelResponse, GetRequest, GetResponse, InvokeRequest,
    InvokeResponse, KernelConfig, KernelOperation, KernelTransport, LoadRequest, LoadResponse,
    ObjRef, Result, SetRequest, SetResponse, StaticInvokeRequest,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::OnceCell;
use tracing::{error, info};

type TransportFuture = Pin<Box<dyn Future<Output = Result<Arc<dyn KernelTransport>>> + Send>>;
type TransportFactory = Box<dyn Fn() -> TransportFuture + Send + Sync>;
type TransportSlot = std::result::Result<Arc<dyn KernelTransport>, Arc<BridgeError>>;

/// Lazily started kernel shared by every caller.
///
/// The kernel is spawned by the first operation. Concurrent first callers wait
/// on the same start-up; if it fails, every caller (now and later) receives
/// the same failure wrapped in [`BridgeError::Initialization`] and the kernel
/// is never spawned again.
pub struct KernelRuntime {
    factory: TransportFactory,
    transport: OnceCell<TransportSlot>,
    closed: AtomicBool,
}

impl KernelRuntime {
    pub fn new(config: KernelConfig) -> Self {
        Self::with_factory(move || {
            let config = config.clone();
            async move {
                let client = KernelClient::spawn(config).await?;
                Ok(Arc::new(client) as Arc<dyn KernelTransport>)
            }
        })
    }

    /// Build a runtime around any way of producing a transport
    pub fn with_factory<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn KernelTransport>>> + Send + 'static,
    {
        Self {
            factory: Box::new(move || -> TransportFuture { Box::pin(factory()) }),
            transport: OnceCell::new(),
            closed: AtomicBool::new(false),
        }
    }

    async fn transport(&self) -> Result<Arc<dyn KernelTransport>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::Closed);
        }

        let slot = self
            .transport
            .get_or_init(|| async {
                match (self.factory)().await {
                    Ok(transport) => {
                        info!("Kernel runtime {} started", transport.runtime_version());
                        Ok(transport)
                    }
                    Err(e) => {
                        error!("Kernel runtime failed to start: {}", e);
                        Err(Arc::new(e))
                    }
                }
            })
            .await;

        match slot {
            Ok(transport) => Ok(transport.clone()),
            Err(cause) if matches!(**cause, BridgeError::Closed) => Err(BridgeError::Closed),
            Err(cause) => Err(BridgeError::Initialization(cause.clone())),
        }
    }

    /// Start the kernel now instead of on first use
    pub async fn start(&self) -> Result<()> {
        self.transport().await.map(|_| ())
    }

    pub async fn runtime_version(&self) -> Result<String> {
        Ok(self.transport().await?.runtime_version().to_string())
    }

    pub fn is_started(&self) -> bool {
        matches!(self.transport.get(), Some(Ok(_)))
    }

    /// Run any typed operation against the kernel
    pub async fn call<Op: KernelOperation>(&self, operation: Op) -> Result<Op::Response> {
        let transport = self.transport().await?;
        kernel_bridge_core::call(transport.as_ref(), operation).await
    }

    pub async fn load(&self, request: LoadRequest) -> Result<LoadResponse> {
        self.call(request).await
    }

    pub async fn create(&self, request: CreateRequest) -> Result<ObjRef> {
        self.call(request).await
    }

    pub async fn get(&self, request: GetRequest) -> Result<GetResponse> {
        self.call(request).await
    }

    pub async fn set(&self, request: SetRequest) -> Result<SetResponse> {
        self.call(request).await
    }

    pub async fn invoke(&self, request: InvokeRequest) -> Result<InvokeResponse> {
        self.call(request).await
    }

    pub async fn static_invoke(&self, request: StaticInvokeRequest) -> Result<InvokeResponse> {
        self.call(request).await
    }

    pub async fn del(&self, request: DelRequest) -> Result<DelResponse> {
        self.call(request).await
    }

    /// Terminate the kernel. Closing before first use never spawns one.
    pub async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);

        let slot = self
            .transport
            .get_or_init(|| async { Err(Arc::new(BridgeError::Closed)) })
            .await;

        match slot {
            Ok(transport) => transport.close().await,
            Err(_) => Ok(()),
        }
    }
}
