use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use sysinfo::System;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use kernel_bridge_core::*;

/// Windows-specific process handle implementation
pub struct WindowsProcessHandle {
    child: Child,
    command: String,
    args: Vec<String>,
}

impl WindowsProcessHandle {
    pub fn new(child: Child, command: String, args: Vec<String>) -> Self {
        Self {
            child,
            command,
            args,
        }
    }
}

#[async_trait]
impl ProcessHandle for WindowsProcessHandle {
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
            Some(pid) => process_exists(pid.0),
            None => {
                debug!("Windows process handle has no PID - process has exited");
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

/// Windows-specific process manager with process tree management
pub struct WindowsProcessManager {
    system: std::sync::Mutex<System>,
}

impl Default for WindowsProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessLifecycle for WindowsProcessManager {
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

        // Kernels run in the background; never pop up a console
        #[cfg(windows)]
        cmd.creation_flags(windows::Win32::System::Threading::CREATE_NO_WINDOW.0);

        let child = cmd
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to spawn {}: {}", command, e))?;

        if let Some(pid) = child.id() {
            info!(
                pid = %pid,
                command = %command,
                args = ?args,
                "Spawned Windows process"
            );
        }

        Ok(Box::new(WindowsProcessHandle::new(
            child,
            command.to_string(),
            args.to_vec(),
        )))
    }
}

#[async_trait]
impl ProcessTermination for WindowsProcessManager {
    async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        let Some(pid) = handle.get_pid() else {
            return TerminationResult::ProcessNotFound;
        };

        match taskkill(pid.0, false, true).await {
            Ok(true) => {
                debug!(pid = %pid, "Sent graceful termination to process tree");
                TerminationResult::Success
            }
            Ok(false) => TerminationResult::ProcessNotFound,
            Err(e) => {
                warn!(pid = %pid, error = %e, "Failed to gracefully terminate process");
                TerminationResult::Failed(format!("Graceful termination failed: {e}"))
            }
        }
    }

    async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        let Some(pid) = handle.get_pid() else {
            return TerminationResult::ProcessNotFound;
        };

        let result = match taskkill(pid.0, true, true).await {
            Ok(true) => {
                info!(pid = %pid, "Force killed process tree");
                TerminationResult::Success
            }
            Ok(false) => TerminationResult::ProcessNotFound,
            Err(e) => {
                warn!(pid = %pid, error = %e, "Failed to force kill process");
                TerminationResult::Failed(format!("Force kill failed: {e}"))
            }
        };

        if let Err(e) = handle.kill().await {
            debug!(error = %e, "Handle kill cleanup failed");
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
        match taskkill(pid.0, true, false).await {
            Ok(true) => TerminationResult::Success,
            Ok(false) => TerminationResult::ProcessNotFound,
            Err(e) => {
                warn!(pid = %pid, error = %e, "Failed to terminate process");
                TerminationResult::Failed(format!("taskkill failed: {e}"))
            }
        }
    }

    async fn terminate_process_tree(&self, root_pid: ProcessId) -> TerminationResult {
        match taskkill(root_pid.0, true, true).await {
            Ok(true) => {
                info!(root_pid = %root_pid, "Terminated process tree");
                TerminationResult::Success
            }
            Ok(false) => TerminationResult::ProcessNotFound,
            Err(e) => {
                warn!(root_pid = %root_pid, error = %e, "taskkill /T failed");
                TerminationResult::Failed(format!("Tree termination failed: {e}"))
            }
        }
    }
}

impl WindowsProcessManager {
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
impl ProcessManager for WindowsProcessManager {
    fn new() -> Self {
        debug!("Initializing Windows process manager");
        Self {
            system: std::sync::Mutex::new(System::new()),
        }
    }
}

/// Run taskkill; `Ok(false)` means the process was not found
async fn taskkill(pid: u32, force: bool, tree: bool) -> Result<bool> {
    let pid_string = pid.to_string();
    let mut args = vec!["/PID", pid_string.as_str()];
    if tree {
        args.push("/T");
    }
    if force {
        args.push("/F");
    }

    let mut cmd = Command::new("taskkill");
    cmd.args(&args).stdout(Stdio::null()).stderr(Stdio::null());
    #[cfg(windows)]
    cmd.creation_flags(windows::Win32::System::Threading::CREATE_NO_WINDOW.0);

    let status = cmd.status().await?;
    Ok(status.success())
}

fn process_exists(pid: u32) -> bool {
    let mut system = System::new();
    let target = sysinfo::Pid::from_u32(pid);
    system.refresh_processes_specifics(
        sysinfo::ProcessesToUpdate::Some(&[target]),
        true,
        sysinfo::ProcessRefreshKind::default(),
    );
    system.process(target).is_some()
}
