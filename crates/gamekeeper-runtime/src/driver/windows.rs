//! Windows process control.
//!
//! The child handle returned by process creation is kept inside the owned
//! `Child` and used for handle-based termination; when that fails the
//! external kill tool is the fallback. Affinity and priority tuning have
//! no portable API here and degrade to logged no-ops.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use gamekeeper_core::{ChildProcess, ProcessError, SpawnSpec};

use super::cmdline::command_line;

/// `CREATE_NEW_CONSOLE`: the game server gets its own console window.
const CREATE_NEW_CONSOLE: u32 = 0x0000_0010;

pub(super) async fn spawn(spec: &SpawnSpec) -> Result<Box<dyn ChildProcess>, ProcessError> {
    use std::os::windows::process::CommandExt as _;

    // Log the exact command line the OS will unparse; quoting here matches
    // the conventional rules the runtime applies.
    info!(port = spec.port, cmdline = %command_line(&spec.executable, &spec.args),
        "windows create-process command line");

    let mut std_cmd = std::process::Command::new(&spec.executable);
    std_cmd
        .args(&spec.args)
        .current_dir(&spec.work_dir)
        .stdin(Stdio::null())
        .creation_flags(CREATE_NEW_CONSOLE);
    for (key, value) in &spec.env_overrides {
        std_cmd.env(key, value);
    }

    let mut cmd = Command::from(std_cmd);
    let child = cmd.spawn().map_err(|err| ProcessError::SpawnFailed {
        executable: spec.executable.display().to_string(),
        reason: err.to_string(),
    })?;

    let pid = child.id().ok_or_else(|| ProcessError::SpawnFailed {
        executable: spec.executable.display().to_string(),
        reason: "child has no pid".to_string(),
    })?;

    info!(port = spec.port, pid, "game server process started");

    Ok(Box::new(WindowsChild {
        pid,
        child,
        exit_code: None,
    }))
}

/// Best-effort orphan cleanup via the external kill tool; there is no
/// handle to terminate through for a pid from a previous run.
pub(super) async fn kill_orphan(pid: u32) -> Result<(), ProcessError> {
    taskkill(pid).await;
    Ok(())
}

async fn taskkill(pid: u32) {
    // /T takes the child process tree down with it.
    let result = Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .output()
        .await;
    if let Err(err) = result {
        warn!(pid, error = %err, "taskkill failed");
    }
}

#[derive(Debug)]
struct WindowsChild {
    pid: u32,
    child: Child,
    exit_code: Option<i32>,
}

impl WindowsChild {
    fn note_exit(&mut self, status: std::process::ExitStatus) {
        if self.exit_code.is_none() {
            self.exit_code = status.code();
        }
    }
}

#[async_trait]
impl ChildProcess for WindowsChild {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.note_exit(status);
                false
            }
            Ok(None) => true,
            Err(err) => {
                warn!(pid = self.pid, error = %err, "error probing process");
                false
            }
        }
    }

    fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    async fn terminate(&mut self, grace: Duration) -> Result<(), ProcessError> {
        if !self.is_alive().await {
            return Ok(());
        }

        // Handle-based termination through the owned child handle; the
        // game server has no graceful signal on this family.
        match self.child.kill().await {
            Ok(()) => {}
            Err(err) => {
                warn!(pid = self.pid, error = %err,
                    "handle-based terminate failed, falling back to taskkill");
                taskkill(self.pid).await;
            }
        }

        match timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.note_exit(status);
                debug!(pid = self.pid, "process terminated");
            }
            Ok(Err(err)) => return Err(ProcessError::Io(err)),
            Err(_) => warn!(pid = self.pid, "process did not exit after terminate"),
        }
        self.exit_code.get_or_insert(-1);
        Ok(())
    }

    async fn kill(&mut self) -> Result<(), ProcessError> {
        self.terminate(Duration::from_secs(2)).await
    }

    fn set_affinity(&self, cores: &[usize]) -> Result<(), ProcessError> {
        debug!(pid = self.pid, cores = ?cores, "cpu affinity not applied on this platform");
        Err(ProcessError::Unsupported("cpu affinity"))
    }

    fn set_priority(&self, high: bool) -> Result<(), ProcessError> {
        debug!(pid = self.pid, high, "priority tuning not applied on this platform");
        Err(ProcessError::Unsupported("process priority"))
    }
}
