use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};
use tracing::{info, warn};

/// Unique identifier for a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

impl From<u32> for ProcessId {
    fn from(pid: u32) -> Self {
        Self(pid)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a process after termination
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessStatus {
    /// Process is currently running
    Running,
    /// Process exited with status information
    Exited(std::process::ExitStatus),
    /// Process was terminated by a signal (Unix) or forcibly terminated (Windows)
    Terminated,
    /// Process status is unknown
    Unknown,
}

/// Result of a process termination operation
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationResult {
    /// Process was successfully terminated
    Success,
    /// Process was not found (already exited)
    ProcessNotFound,
    /// Permission denied (insufficient privileges)
    AccessDenied,
    /// Operation timed out
    Timeout,
    /// Operation failed with specific error message
    Failed(String),
}

/// The three standard streams of a kernel process, owned by whoever takes them
pub struct KernelPipes {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Trait representing a handle to a running process
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Get the process ID (None if process has exited)
    fn get_pid(&self) -> Option<ProcessId>;

    /// Get the command that started this process
    fn get_command(&self) -> &str;

    /// Get the arguments passed to this process
    fn get_args(&self) -> &[String];

    /// Move the piped standard streams out of the handle; `None` once taken
    fn take_pipes(&mut self) -> Option<KernelPipes>;

    /// Check if the process is still running (non-blocking)
    async fn is_running(&self) -> bool;

    /// Try to get exit status without blocking
    async fn try_wait(&mut self) -> Result<Option<ProcessStatus>>;

    /// Wait for the process to exit
    async fn wait(&mut self) -> Result<ProcessStatus>;

    /// Kill the process and reap it
    async fn kill(&mut self) -> Result<()>;
}

/// Core trait for process lifecycle management
#[async_trait]
pub trait ProcessLifecycle: Send + Sync {
    /// Spawn a new process with stdin, stdout and stderr wired to pipes.
    ///
    /// The child must be killed if the returned handle is dropped.
    async fn spawn_process(
        &self,
        command: &str,
        args: &[String],
        working_dir: Option<&Path>,
        env: &HashMap<String, String>,
    ) -> Result<Box<dyn ProcessHandle>>;

    /// Wait for a process to exit with optional timeout
    async fn wait_for_exit(
        &self,
        handle: &mut dyn ProcessHandle,
        timeout: Option<Duration>,
    ) -> Result<ProcessStatus> {
        match timeout {
            Some(duration) => tokio::time::timeout(duration, handle.wait())
                .await
                .map_err(|_| anyhow::anyhow!("Timeout waiting for process exit"))?,
            None => handle.wait().await,
        }
    }
}

/// Trait for comprehensive process termination including process trees
#[async_trait]
pub trait ProcessTermination: Send + Sync {
    /// Ask a process (and its group where supported) to exit
    async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult;

    /// Force kill a process (and its group where supported)
    async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult;

    /// Find all descendant processes of a given process
    async fn find_child_processes(&self, pid: ProcessId) -> Result<Vec<ProcessId>>;

    /// Terminate one process that is not necessarily our direct child
    async fn terminate_pid(&self, pid: ProcessId) -> TerminationResult;

    /// Terminate an entire process tree (parent and all descendants)
    async fn terminate_process_tree(&self, root_pid: ProcessId) -> TerminationResult {
        let children = match self.find_child_processes(root_pid).await {
            Ok(children) => children,
            Err(e) => {
                warn!("Failed to find child processes for PID {}: {}", root_pid, e);
                return TerminationResult::Failed(format!("Failed to enumerate children: {e}"));
            }
        };

        // Children are listed deepest first
        for child in &children {
            match self.terminate_pid(*child).await {
                TerminationResult::Success | TerminationResult::ProcessNotFound => {}
                other => warn!("Failed to terminate child process {}: {:?}", child, other),
            }
        }

        self.terminate_pid(root_pid).await
    }

    /// Complete termination strategy: graceful request, bounded wait, then force kill.
    ///
    /// Descendants are collected before the root goes away, since they are
    /// reparented once it exits.
    async fn terminate_completely(
        &self,
        handle: &mut dyn ProcessHandle,
        grace: Duration,
    ) -> TerminationResult {
        let Some(pid) = handle.get_pid() else {
            return TerminationResult::ProcessNotFound;
        };

        let descendants = self.find_child_processes(pid).await.unwrap_or_else(|e| {
            warn!("Failed to enumerate children of {}: {}", pid, e);
            Vec::new()
        });

        let result = match self.terminate_gracefully(handle).await {
            TerminationResult::ProcessNotFound => TerminationResult::ProcessNotFound,
            TerminationResult::Success => {
                match tokio::time::timeout(grace, handle.wait()).await {
                    Ok(_) => TerminationResult::Success,
                    Err(_) => {
                        info!("Process {} ignored graceful termination, killing", pid);
                        self.force_kill(handle).await
                    }
                }
            }
            _ => self.force_kill(handle).await,
        };

        for child in &descendants {
            match self.terminate_pid(*child).await {
                TerminationResult::Success | TerminationResult::ProcessNotFound => {}
                other => warn!("Failed to terminate descendant {}: {:?}", child, other),
            }
        }

        result
    }
}

/// High-level process manager trait that combines lifecycle and termination
#[async_trait]
pub trait ProcessManager: ProcessLifecycle + ProcessTermination {
    /// Create a new process manager instance
    fn new() -> Self
    where
        Self: Sized;

    /// Cleanup any resources held by the process manager
    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

/// Factory trait for creating platform-specific process managers
pub trait ProcessManagerFactory {
    /// Create a process manager for the current platform
    fn create_process_manager() -> Box<dyn ProcessManager>;

    /// Get the platform name for logging and debugging
    fn platform_name() -> &'static str;
}
