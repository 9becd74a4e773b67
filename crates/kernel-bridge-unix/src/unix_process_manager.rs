use anyhow::Result;
use async_trait::async_trait;
use kernel_bridge_core::{
    KernelPipes, ProcessHandle, ProcessId, ProcessLifecycle, ProcessManager, ProcessStatus,
    ProcessTermination, TerminationResult,
};
use std::collections::HashMap;
use std::path::Path;

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    use std::process::Stdio;
    use std::time::Duration;
    use sysinfo::System;
    use tokio::process::{Child, Command};
    use tracing::{debug, info, warn};

    const SINGLE_PROCESS_GRACE: Duration = Duration::from_millis(500);
    const LIVENESS_POLL: Duration = Duration::from_millis(25);

    /// Unix-specific process handle implementation
    pub struct UnixProcessHandle {
        child: Child,
        command: String,
        args: Vec<String>,
    }

    impl UnixProcessHandle {
        pub fn new(child: Child, command: String, args: Vec<String>) -> Self {
            Self {
                child,
                command,
                args,
            }
        }
    }

    #[async_trait]
    impl ProcessHandle for UnixProcessHandle {
        fn get_pid(&self) -> Option<ProcessId> {
            self.child.id().map(ProcessId::from)
        }

        fn get_command(&self) -> &str {
            &self.command
        }

        fn get_args(&self) -> &[String] {
            &self.args
        }

        fn take_pipes(&mut self) -> Option<KernelPipes> {
            let stdin = self.child.stdin.take()?;
            let stdout = self.child.stdout.take()?;
            let stderr = self.child.stderr.take()?;
            Some(KernelPipes {
                stdin,
                stdout,
                stderr,
            })
        }

        async fn is_running(&self) -> bool {
            match self.get_pid() {
                // Signal 0 only checks that the process exists
                Some(pid) => signal::kill(NixPid::from_raw(pid.0 as i32), None).is_ok(),
                None => {
                    debug!("Unix process handle has no PID - process has been reaped");
                    false
                }
            }
        }

        async fn try_wait(&mut self) -> Result<Option<ProcessStatus>> {
            match self.child.try_wait()? {
                Some(status) => Ok(Some(ProcessStatus::Exited(status))),
                None => Ok(None),
            }
        }

        async fn wait(&mut self) -> Result<ProcessStatus> {
            let status = self.child.wait().await?;
            Ok(ProcessStatus::Exited(status))
        }

        async fn kill(&mut self) -> Result<()> {
            self.child
                .kill()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to kill process: {}", e))
        }
    }

    /// Unix-specific process manager. Kernels run in their own process group.
    pub struct UnixProcessManager {
        system: std::sync::Mutex<System>,
    }

    impl Default for UnixProcessManager {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ProcessLifecycle for UnixProcessManager {
        async fn spawn_process(
            &self,
            command: &str,
            args: &[String],
            working_dir: Option<&Path>,
            env: &HashMap<String, String>,
        ) -> Result<Box<dyn ProcessHandle>> {
            let mut cmd = Command::new(command);
            cmd.args(args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            if let Some(dir) = working_dir {
                cmd.current_dir(dir);
            }

            for (key, value) in env {
                cmd.env(key, value);
            }

            // New process group so the whole kernel tree can be signalled at once
            cmd.process_group(0);

            let child = cmd
                .spawn()
                .map_err(|e| anyhow::anyhow!("Failed to spawn {}: {}", command, e))?;

            if let Some(pid) = child.id() {
                info!(
                    "Spawned Unix process: {} (PID: {}) with args: {:?}",
                    command, pid, args
                );
            }

            Ok(Box::new(UnixProcessHandle::new(
                child,
                command.to_string(),
                args.to_vec(),
            )))
        }
    }

    #[async_trait]
    impl ProcessTermination for UnixProcessManager {
        async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
            match handle.get_pid() {
                Some(pid) => Self::signal_group(pid, Signal::SIGTERM),
                None => TerminationResult::ProcessNotFound,
            }
        }

        async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
            let Some(pid) = handle.get_pid() else {
                return TerminationResult::ProcessNotFound;
            };

            let result = Self::signal_group(pid, Signal::SIGKILL);
            // Reap the root so it does not linger as a zombie
            if let Err(e) = handle.kill().await {
                debug!("Handle kill cleanup for {} failed: {}", pid, e);
            }
            result
        }

        async fn find_child_processes(&self, parent_pid: ProcessId) -> Result<Vec<ProcessId>> {
            let mut system = self
                .system
                .lock()
                .map_err(|_| anyhow::anyhow!("process table lock poisoned"))?;
            system.refresh_processes_specifics(
                sysinfo::ProcessesToUpdate::All,
                true,
                sysinfo::ProcessRefreshKind::default(),
            );

            let mut children = Vec::new();
            Self::find_children_recursive(&system, parent_pid.0, &mut children);

            Ok(children.into_iter().map(ProcessId::from).collect())
        }

        async fn terminate_pid(&self, pid: ProcessId) -> TerminationResult {
            let nix_pid = NixPid::from_raw(pid.0 as i32);

            match signal::kill(nix_pid, Signal::SIGTERM) {
                Ok(()) => {
                    debug!("Sent SIGTERM to process {}", pid);
                }
                Err(Errno::ESRCH) => return TerminationResult::ProcessNotFound,
                Err(Errno::EPERM) => {
                    warn!("Permission denied to terminate process {}", pid);
                    return TerminationResult::AccessDenied;
                }
                Err(e) => {
                    warn!("Failed to send SIGTERM to process {}: {}", pid, e);
                    return TerminationResult::Failed(format!("SIGTERM failed: {e}"));
                }
            }

            let deadline = tokio::time::Instant::now() + SINGLE_PROCESS_GRACE;
            while tokio::time::Instant::now() < deadline {
                if signal::kill(nix_pid, None).is_err() {
                    return TerminationResult::Success;
                }
                tokio::time::sleep(LIVENESS_POLL).await;
            }

            match signal::kill(nix_pid, Signal::SIGKILL) {
                Ok(()) => {
                    info!("Sent SIGKILL to process {}", pid);
                    TerminationResult::Success
                }
                Err(Errno::ESRCH) => TerminationResult::Success,
                Err(e) => {
                    warn!("Failed to kill process {}: {}", pid, e);
                    TerminationResult::Failed(format!("SIGKILL failed: {e}"))
                }
            }
        }
    }

    impl UnixProcessManager {
        /// Signal the process group led by `pid`, falling back to the single process
        fn signal_group(pid: ProcessId, sig: Signal) -> TerminationResult {
            let nix_pid = NixPid::from_raw(pid.0 as i32);

            let outcome = match signal::killpg(nix_pid, sig) {
                Err(Errno::ESRCH) => signal::kill(nix_pid, sig),
                other => other,
            };

            match outcome {
                Ok(()) => {
                    debug!("Sent {:?} to process group {}", sig, pid);
                    TerminationResult::Success
                }
                Err(Errno::ESRCH) => {
                    debug!("Process {} not found (already terminated)", pid);
                    TerminationResult::ProcessNotFound
                }
                Err(Errno::EPERM) => {
                    warn!("Permission denied to signal process {}", pid);
                    TerminationResult::AccessDenied
                }
                Err(e) => {
                    warn!("Failed to send {:?} to process {}: {}", sig, pid, e);
                    TerminationResult::Failed(format!("{sig:?} failed: {e}"))
                }
            }
        }

        /// Recursively find all child processes, deepest first
        fn find_children_recursive(system: &System, parent_pid: u32, result: &mut Vec<u32>) {
            for (pid, process) in system.processes() {
                if process.parent().is_some_and(|ppid| ppid.as_u32() == parent_pid) {
                    let child_pid = pid.as_u32();
                    Self::find_children_recursive(system, child_pid, result);
                    result.push(child_pid);
                }
            }
        }
    }

    #[async_trait]
    impl ProcessManager for UnixProcessManager {
        fn new() -> Self {
            debug!("Initializing Unix process manager");
            Self {
                system: std::sync::Mutex::new(System::new()),
            }
        }
    }

}

#[cfg(unix)]
pub use unix_impl::{UnixProcessHandle, UnixProcessManager};

#[cfg(not(unix))]
pub struct UnixProcessHandle;

#[cfg(not(unix))]
pub struct UnixProcessManager;
