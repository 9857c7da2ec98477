//! Unix process control: spawn in a new session, SIGINT → SIGKILL
//! termination, affinity via `sched_setaffinity`, priority via `nice`.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use gamekeeper_core::{ChildProcess, ProcessError, SpawnSpec};

use super::cmdline::command_line;

pub(super) async fn spawn(spec: &SpawnSpec) -> Result<Box<dyn ChildProcess>, ProcessError> {
    debug!(port = spec.port, cmdline = %command_line(&spec.executable, &spec.args),
        "spawning game server process");

    let mut cmd = Command::new(&spec.executable);
    cmd.args(&spec.args)
        .current_dir(&spec.work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    // Per-instance data isolation: overridden entries replace the
    // inherited ones, everything else passes through.
    for (key, value) in &spec.env_overrides {
        cmd.env(key, value);
    }

    // Detach into a fresh session so signals aimed at the manager do not
    // cascade into the fleet.
    unsafe {
        cmd.pre_exec(|| {
            let _ = nix::unistd::setsid();
            Ok(())
        });
    }

    let child = cmd.spawn().map_err(|err| ProcessError::SpawnFailed {
        executable: spec.executable.display().to_string(),
        reason: err.to_string(),
    })?;

    let pid = child.id().ok_or_else(|| ProcessError::SpawnFailed {
        executable: spec.executable.display().to_string(),
        reason: "child has no pid".to_string(),
    })?;

    info!(port = spec.port, pid, "game server process started");

    Ok(Box::new(UnixChild {
        pid,
        child,
        exit_code: None,
    }))
}

/// Kill an orphaned pid with SIGTERM → SIGKILL escalation, polling for
/// exit after each signal. Safe on dead or recycled pids: the kill call is
/// best-effort and ESRCH counts as success.
pub(super) async fn kill_orphan(pid: u32) -> Result<(), ProcessError> {
    let target = Pid::from_raw(pid as i32);

    match signal::kill(target, Signal::SIGTERM) {
        Ok(()) => {}
        Err(Errno::ESRCH) => return Ok(()),
        Err(err) => return Err(ProcessError::Io(std::io::Error::other(err))),
    }

    if poll_gone(target, Duration::from_secs(2)).await {
        return Ok(());
    }

    match signal::kill(target, Signal::SIGKILL) {
        Ok(()) => {}
        Err(Errno::ESRCH) => return Ok(()),
        Err(err) => return Err(ProcessError::Io(std::io::Error::other(err))),
    }

    if poll_gone(target, Duration::from_secs(2)).await {
        return Ok(());
    }
    warn!(pid, "orphan did not exit after SIGKILL");
    Ok(())
}

async fn poll_gone(pid: Pid, total: Duration) -> bool {
    let interval = Duration::from_millis(100);
    let rounds = (total.as_millis() / interval.as_millis()).max(1);
    for _ in 0..rounds {
        sleep(interval).await;
        // Signal 0 probes existence without delivering anything.
        match signal::kill(pid, None) {
            Err(Errno::ESRCH) => return true,
            Ok(()) | Err(_) => {}
        }
    }
    false
}

#[derive(Debug)]
struct UnixChild {
    pid: u32,
    child: Child,
    exit_code: Option<i32>,
}

impl UnixChild {
    fn note_exit(&mut self, status: std::process::ExitStatus) {
        if self.exit_code.is_none() {
            self.exit_code = status.code();
        }
    }
}

#[async_trait]
impl ChildProcess for UnixChild {
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

        // SIGINT lets the game server flush replays and say goodbye to its
        // master service. SIGKILL only after the grace period.
        match signal::kill(Pid::from_raw(self.pid as i32), Signal::SIGINT) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => {
                warn!(pid = self.pid, error = %err, "graceful signal failed, force killing");
                return self.kill().await;
            }
        }

        match timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.note_exit(status);
                debug!(pid = self.pid, "process stopped gracefully");
                Ok(())
            }
            Ok(Err(err)) => Err(ProcessError::Io(err)),
            Err(_) => {
                warn!(pid = self.pid, grace = ?grace, "process ignored SIGINT, force killing");
                self.kill().await
            }
        }
    }

    async fn kill(&mut self) -> Result<(), ProcessError> {
        match self.child.kill().await {
            Ok(()) => {}
            // Already reaped.
            Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(err) => return Err(ProcessError::Io(err)),
        }
        if let Ok(Some(status)) = self.child.try_wait() {
            self.note_exit(status);
        }
        self.exit_code.get_or_insert(-1);
        Ok(())
    }

    fn set_affinity(&self, cores: &[usize]) -> Result<(), ProcessError> {
        if cores.is_empty() {
            return Ok(());
        }
        let mut set = nix::sched::CpuSet::new();
        for &core in cores {
            set.set(core)
                .map_err(|err| ProcessError::Io(std::io::Error::other(err)))?;
        }
        nix::sched::sched_setaffinity(Pid::from_raw(self.pid as i32), &set)
            .map_err(|err| ProcessError::Io(std::io::Error::other(err)))?;
        debug!(pid = self.pid, cores = ?cores, "cpu affinity set");
        Ok(())
    }

    fn set_priority(&self, high: bool) -> Result<(), ProcessError> {
        // nice -5 during a live match, back to 0 when it ends.
        let nice = if high { -5 } else { 0 };
        let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, self.pid, nice) };
        if rc != 0 {
            return Err(ProcessError::Io(std::io::Error::last_os_error()));
        }
        debug!(pid = self.pid, nice, "process priority set");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamekeeper_core::ProcessDriver;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn sleep_spec(seconds: &str) -> SpawnSpec {
        SpawnSpec {
            executable: PathBuf::from("/bin/sleep"),
            args: vec![seconds.to_string()],
            work_dir: PathBuf::from("/"),
            env_overrides: HashMap::new(),
            port: 11235,
        }
    }

    #[tokio::test]
    async fn spawns_and_terminates_a_real_process() {
        let mut child = spawn(&sleep_spec("30")).await.unwrap();
        assert!(child.is_alive().await);
        assert!(child.pid() > 0);

        child.terminate(Duration::from_secs(5)).await.unwrap();
        assert!(!child.is_alive().await);
    }

    #[tokio::test]
    async fn terminate_is_idempotent_on_dead_process() {
        let mut child = spawn(&sleep_spec("0")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!child.is_alive().await);
        child.terminate(Duration::from_secs(1)).await.unwrap();
        assert_eq!(child.exit_code(), Some(0));
    }

    #[tokio::test]
    async fn spawn_failure_reports_executable() {
        let spec = SpawnSpec {
            executable: PathBuf::from("/nonexistent/gamebinary"),
            ..sleep_spec("1")
        };
        let err = spawn(&spec).await.unwrap_err();
        assert!(err.to_string().contains("gamebinary"));
    }

    #[tokio::test]
    async fn kill_orphan_tolerates_missing_pid() {
        let driver = super::super::NativeDriver::new();
        driver.kill_orphan(999_999).await.unwrap();
    }

    #[tokio::test]
    async fn kill_orphan_terminates_a_real_process() {
        let mut child = spawn(&sleep_spec("60")).await.unwrap();
        let pid = child.pid();

        kill_orphan(pid).await.unwrap();

        // Reap through the handle we still own.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!child.is_alive().await);
    }
}
