//! The process client: one spawned kernel and the conversation with it.

use crate::platform::PlatformProcessManagerFactory;
use async_trait::async_trait;
use kernel_bridge_core::protocol::{decode_line, decode_payload, encode_request, parse_version};
use kernel_bridge_core::{
    BridgeError, HelloResponse, KernelArtifact, KernelConfig, KernelRequest, KernelTransport,
    ProcessHandle, ProcessId, ProcessManager, ProcessManagerFactory, Result, StderrBuffer,
    TerminationResult, TimeoutConfig,
};
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::TempPath;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const TEMP_ARTIFACT_PREFIX: &str = "kernel-bridge-runtime.";
const PREVIEW_CHARS: usize = 120;

/// A running kernel process and the serialized request/response channel to it.
///
/// Requests from concurrent callers are queued on an internal lock, so each
/// reply is always paired with the request that produced it.
pub struct KernelClient {
    name: String,
    greeting: String,
    runtime_version: String,
    pid: Option<ProcessId>,
    timeouts: TimeoutConfig,
    session: Mutex<Session>,
    process: Mutex<Option<Box<dyn ProcessHandle>>>,
    process_manager: Arc<dyn ProcessManager>,
    stderr: StderrBuffer,
    stderr_task: JoinHandle<()>,
    cancellation_token: CancellationToken,
    closed: AtomicBool,
}

struct Session {
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
    state: SessionState,
}

enum SessionState {
    Ready,
    /// A call gave up on stdout after stderr output; its reply may still arrive
    ReplyOutstanding,
    Poisoned(String),
    Exited,
}

impl Session {
    fn ensure_usable(&self) -> Result<()> {
        match &self.state {
            SessionState::Ready | SessionState::ReplyOutstanding => Ok(()),
            SessionState::Poisoned(reason) => Err(BridgeError::poisoned(reason.clone())),
            SessionState::Exited => Err(BridgeError::Closed),
        }
    }

    fn poison(&mut self, reason: String) -> BridgeError {
        error!("Kernel stream poisoned: {}", reason);
        self.state = SessionState::Poisoned(reason.clone());
        BridgeError::Poisoned(reason)
    }

    /// Interpret one non-empty stdout line as the reply to the pending request
    fn accept(&mut self, line: &str) -> Result<Value> {
        match decode_line(line) {
            Ok(envelope) => envelope.into_payload(),
            Err(_) => Err(self.poison(format!("unparseable kernel output: {}", preview(line)))),
        }
    }
}

/// The artifact path handed to the kernel, kept alive until the handshake completes
enum StagedArtifact {
    Temp(TempPath),
    Existing(PathBuf),
}

impl StagedArtifact {
    fn stage(artifact: &KernelArtifact) -> Result<Self> {
        match artifact {
            KernelArtifact::Path(path) => {
                std::fs::metadata(path).map_err(BridgeError::Artifact)?;
                Ok(Self::Existing(path.clone()))
            }
            KernelArtifact::Embedded { bytes, suffix } => {
                let mut file = tempfile::Builder::new()
                    .prefix(TEMP_ARTIFACT_PREFIX)
                    .suffix(suffix.as_str())
                    .tempfile()
                    .map_err(BridgeError::Artifact)?;
                file.write_all(bytes).map_err(BridgeError::Artifact)?;
                file.flush().map_err(BridgeError::Artifact)?;
                let path = file.into_temp_path();
                debug!("Staged kernel artifact at {}", path.display());
                Ok(Self::Temp(path))
            }
        }
    }

    fn path(&self) -> &Path {
        match self {
            Self::Temp(path) => path.as_ref(),
            Self::Existing(path) => path.as_path(),
        }
    }

    fn release(self) {
        if let Self::Temp(path) = self {
            let shown = path.to_path_buf();
            if let Err(e) = path.close() {
                warn!("Failed to remove kernel artifact {}: {}", shown.display(), e);
            }
        }
    }
}

struct Handshake {
    session: Session,
    stderr_task: JoinHandle<()>,
    greeting: String,
    runtime_version: String,
}

impl KernelClient {
    /// Spawn a kernel with the platform process manager and complete the handshake
    pub async fn spawn(config: KernelConfig) -> Result<Self> {
        let process_manager: Arc<dyn ProcessManager> =
            Arc::from(PlatformProcessManagerFactory::create_process_manager());
        Self::spawn_with(config, process_manager).await
    }

    /// Spawn a kernel through a caller-supplied process manager
    pub async fn spawn_with(
        config: KernelConfig,
        process_manager: Arc<dyn ProcessManager>,
    ) -> Result<Self> {
        config.validate()?;

        let artifact = StagedArtifact::stage(&config.artifact)?;
        let args = config.launch_args(artifact.path());

        let mut handle = process_manager
            .spawn_process(
                &config.program,
                &args,
                config.working_directory.as_deref(),
                &config.env,
            )
            .await
            .map_err(|e| BridgeError::spawn(format!("{e:#}")))?;
        let pid = handle.get_pid();
        debug!(
            "Kernel {} launched: {} {:?}",
            config.name,
            handle.get_command(),
            handle.get_args()
        );

        let stderr = StderrBuffer::new(config.timeouts.max_stderr_bytes);
        let handshake = match Self::handshake(&config, handle.as_mut(), &stderr).await {
            Ok(handshake) => handshake,
            Err(e) => {
                warn!("Kernel {} failed to start: {}", config.name, e);
                match process_manager.force_kill(handle.as_mut()).await {
                    TerminationResult::Success | TerminationResult::ProcessNotFound => {}
                    other => error!("Failed to kill half-started kernel: {:?}", other),
                }
                return Err(e);
            }
        };

        // The kernel has loaded the artifact by the time it greets us
        artifact.release();

        info!(
            "Kernel {} ready: runtime {} (PID: {:?})",
            config.name, handshake.runtime_version, pid
        );

        Ok(Self {
            name: config.name,
            greeting: handshake.greeting,
            runtime_version: handshake.runtime_version,
            pid,
            timeouts: config.timeouts,
            session: Mutex::new(handshake.session),
            process: Mutex::new(Some(handle)),
            process_manager,
            stderr,
            stderr_task: handshake.stderr_task,
            cancellation_token: CancellationToken::new(),
            closed: AtomicBool::new(false),
        })
    }

    async fn handshake(
        config: &KernelConfig,
        handle: &mut dyn ProcessHandle,
        stderr: &StderrBuffer,
    ) -> Result<Handshake> {
        let pipes = handle
            .take_pipes()
            .ok_or_else(|| BridgeError::spawn("kernel process has no stdio pipes"))?;

        let stderr_task = tokio::spawn(stderr.clone().capture(pipes.stderr, config.name.clone()));
        let mut stdout = BufReader::new(pipes.stdout).lines();

        let wait = Self::read_greeting(&mut stdout, stderr, config.timeouts.stderr_grace());
        let greeting = match timeout(config.timeouts.handshake_timeout(), wait).await {
            Ok(Ok(greeting)) => greeting,
            Ok(Err(e)) => {
                stderr_task.abort();
                return Err(e);
            }
            Err(_) => {
                stderr_task.abort();
                return Err(BridgeError::handshake(format!(
                    "no greeting within {}ms",
                    config.timeouts.handshake_timeout_ms
                )));
            }
        };

        let runtime_version = match parse_version(&greeting) {
            Ok(version) => version,
            Err(e) => {
                stderr_task.abort();
                return Err(e);
            }
        };

        Ok(Handshake {
            session: Session {
                stdin: Some(pipes.stdin),
                stdout,
                state: SessionState::Ready,
            },
            stderr_task,
            greeting,
            runtime_version,
        })
    }

    async fn read_greeting(
        stdout: &mut Lines<BufReader<ChildStdout>>,
        stderr: &StderrBuffer,
        grace: std::time::Duration,
    ) -> Result<String> {
        loop {
            let line = stdout
                .next_line()
                .await
                .map_err(|e| BridgeError::handshake(format!("failed to read greeting: {e}")))?;

            match line {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => {
                    let envelope = decode_line(&line).map_err(|_| {
                        BridgeError::handshake(format!("unexpected greeting: {}", preview(&line)))
                    })?;
                    let payload = envelope
                        .into_payload()
                        .map_err(|e| BridgeError::handshake(e.to_string()))?;
                    let hello: HelloResponse = decode_payload(payload).map_err(|_| {
                        BridgeError::handshake(format!("unexpected greeting: {}", preview(&line)))
                    })?;
                    debug!("Kernel greeting: {}", hello.hello);
                    return Ok(hello.hello);
                }
                None => {
                    sleep(grace).await;
                    let text = stderr.take().await;
                    return Err(if text.is_empty() {
                        BridgeError::handshake("kernel exited before greeting")
                    } else {
                        BridgeError::handshake(format!("kernel exited before greeting: {text}"))
                    });
                }
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw greeting string the kernel sent on startup
    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    pub fn runtime_version(&self) -> &str {
        &self.runtime_version
    }

    pub fn pid(&self) -> Option<ProcessId> {
        self.pid
    }

    pub async fn is_running(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        match self.process.lock().await.as_ref() {
            Some(handle) => handle.is_running().await,
            None => false,
        }
    }

    /// Send one request and wait for the reply payload
    pub async fn request(&self, request: KernelRequest) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::Closed);
        }

        let api = request.api();
        let line = encode_request(&request)?;

        let mut session = tokio::select! {
            _ = self.cancellation_token.cancelled() => return Err(BridgeError::Closed),
            session = self.session.lock() => session,
        };
        session.ensure_usable()?;
        if matches!(session.state, SessionState::ReplyOutstanding) {
            self.discard_late_reply(&mut session).await?;
        }

        self.stderr.clear().await;
        debug!("[{}] -> {}", self.name, api);

        if let Err(e) = Self::write_line(&mut session, &line).await {
            debug!("[{}] Failed to write request: {}", self.name, e);
            return Err(self.kernel_exited(&mut session).await);
        }

        let result = self.read_reply(&mut session).await;
        match &result {
            Ok(_) => debug!("[{}] <- {}", self.name, api),
            Err(e) => debug!("[{}] <- {} failed: {}", self.name, api, e),
        }
        result
    }

    async fn write_line(session: &mut Session, line: &[u8]) -> std::io::Result<()> {
        let stdin = session
            .stdin
            .as_mut()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::BrokenPipe))?;
        stdin.write_all(line).await?;
        stdin.flush().await
    }

    /// Wait for the next stdout line, falling back to stderr text and then to `NoResponse`
    async fn read_reply(&self, session: &mut Session) -> Result<Value> {
        let deadline = Instant::now() + self.timeouts.response_timeout();
        let mut stderr_deadline: Option<Instant> = None;

        loop {
            let grace_at = stderr_deadline;
            let stderr_grace = async move {
                match grace_at {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;

                _ = self.cancellation_token.cancelled() => {
                    session.poison("request cancelled by close".to_string());
                    return Err(BridgeError::Cancelled);
                }

                line = session.stdout.next_line() => match line {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => return session.accept(&line),
                    Ok(None) => return Err(self.kernel_exited(session).await),
                    Err(e) => {
                        session.poison(format!("failed to read kernel stdout: {e}"));
                        return Err(BridgeError::Io(e));
                    }
                },

                _ = self.stderr.notified(), if stderr_deadline.is_none() => {
                    if !self.stderr.is_empty().await {
                        stderr_deadline = Some(Instant::now() + self.timeouts.stderr_grace());
                    }
                }

                _ = stderr_grace => {
                    let text = self.stderr.take().await;
                    if text.is_empty() {
                        stderr_deadline = None;
                        continue;
                    }
                    warn!("[{}] Kernel reported: {}", self.name, text);
                    session.state = SessionState::ReplyOutstanding;
                    return Err(BridgeError::KernelStderr(text));
                }

                _ = sleep_until(deadline) => {
                    session.poison(format!(
                        "no response within {}ms",
                        self.timeouts.response_timeout_ms
                    ));
                    return Err(BridgeError::NoResponse);
                }
            }
        }
    }

    /// Consume the reply to an earlier call that failed on stderr output.
    ///
    /// Without request ids a late line would otherwise be read as the answer to
    /// the next request. If nothing arrives within the response timeout the
    /// stream cannot be trusted and the client is poisoned.
    async fn discard_late_reply(&self, session: &mut Session) -> Result<()> {
        let deadline = Instant::now() + self.timeouts.response_timeout();

        loop {
            tokio::select! {
                biased;

                _ = self.cancellation_token.cancelled() => {
                    session.poison("request cancelled by close".to_string());
                    return Err(BridgeError::Cancelled);
                }

                line = session.stdout.next_line() => match line {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => {
                        warn!(
                            "[{}] Discarding late reply to an earlier request: {}",
                            self.name,
                            preview(&line)
                        );
                        session.state = SessionState::Ready;
                        return Ok(());
                    }
                    Ok(None) => return Err(self.kernel_exited(session).await),
                    Err(e) => {
                        session.poison(format!("failed to read kernel stdout: {e}"));
                        return Err(BridgeError::Io(e));
                    }
                },

                _ = sleep_until(deadline) => {
                    return Err(session.poison(
                        "reply to an earlier request never arrived".to_string(),
                    ));
                }
            }
        }
    }

    /// The kernel closed stdout. Report whatever it said on stderr.
    async fn kernel_exited(&self, session: &mut Session) -> BridgeError {
        session.state = SessionState::Exited;
        session.stdin = None;

        sleep(self.timeouts.stderr_grace()).await;
        let text = self.stderr.take().await;
        warn!("Kernel {} exited unexpectedly", self.name);

        if text.is_empty() {
            BridgeError::NoResponse
        } else {
            BridgeError::KernelStderr(text)
        }
    }

    /// Stop the kernel: close its stdin, give it `shutdown_grace` to exit, then terminate it.
    ///
    /// Calling `close` again is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("Closing kernel {}", self.name);
        self.cancellation_token.cancel();

        {
            let mut session = self.session.lock().await;
            session.stdin = None;
            session.state = SessionState::Exited;
        }

        let Some(mut handle) = self.process.lock().await.take() else {
            return Ok(());
        };

        let grace = self.timeouts.shutdown_grace();
        match self
            .process_manager
            .wait_for_exit(handle.as_mut(), Some(grace))
            .await
        {
            Ok(status) => debug!("Kernel {} exited: {:?}", self.name, status),
            Err(_) => {
                info!(
                    "Kernel {} ({}) did not exit on EOF, terminating",
                    self.name,
                    handle.get_command()
                );
                match self
                    .process_manager
                    .terminate_completely(handle.as_mut(), grace)
                    .await
                {
                    TerminationResult::Success | TerminationResult::ProcessNotFound => {}
                    other => warn!("Kernel {} termination: {:?}", self.name, other),
                }
            }
        }

        self.process_manager.cleanup().await?;
        info!("Kernel {} closed", self.name);
        Ok(())
    }
}

impl Drop for KernelClient {
    fn drop(&mut self) {
        self.stderr_task.abort();
    }
}

#[async_trait]
impl KernelTransport for KernelClient {
    async fn request(&self, request: KernelRequest) -> Result<Value> {
        KernelClient::request(self, request).await
    }

    fn runtime_version(&self) -> &str {
        &self.runtime_version
    }

    async fn close(&self) -> Result<()> {
        KernelClient::close(self).await
    }
}

fn preview(line: &str) -> String {
    let trimmed = line.trim();
    if trimmed.chars().count() > PREVIEW_CHARS {
        let head: String = trimmed.chars().take(PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        trimmed.to_string()
    }
}
