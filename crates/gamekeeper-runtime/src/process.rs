//! Supervisor for one game-server OS process.
//!
//! Wraps a driver-spawned child with a faithful running/stopped flag: a
//! background monitor polls liveness every two seconds and flips `running`
//! the first time the OS reports the process gone. All state lives behind
//! a mutex scoped to this process; the instance lock is never taken while
//! holding it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use gamekeeper_core::{ChildProcess, ProcessDriver, ProcessError, SpawnSpec};

/// How long a graceful stop waits before force-killing.
pub const STOP_GRACE: Duration = Duration::from_secs(10);

/// Liveness poll interval for the background monitor.
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Default)]
struct ProcState {
    child: Option<Box<dyn ChildProcess>>,
    pid: u32,
    running: bool,
    started_at: Option<Instant>,
    exit_code: Option<i32>,
}

/// One supervised OS process.
pub struct Process {
    port: u16,
    driver: Arc<dyn ProcessDriver>,
    monitor_interval: Duration,
    state: Arc<Mutex<ProcState>>,
}

impl Process {
    pub fn new(port: u16, driver: Arc<dyn ProcessDriver>) -> Self {
        Self {
            port,
            driver,
            monitor_interval: MONITOR_INTERVAL,
            state: Arc::new(Mutex::new(ProcState::default())),
        }
    }

    /// Override the monitor poll interval (tests).
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    /// Spawn the process and start its liveness monitor.
    pub async fn start(&self, spec: SpawnSpec) -> Result<(), ProcessError> {
        let mut state = self.state.lock().await;
        if state.running {
            return Err(ProcessError::AlreadyRunning { pid: state.pid });
        }

        let child = self.driver.spawn(&spec).await?;
        let pid = child.pid();

        state.child = Some(child);
        state.pid = pid;
        state.running = true;
        state.started_at = Some(Instant::now());
        state.exit_code = None;
        drop(state);

        info!(port = self.port, pid, "game server process under supervision");

        let monitor_state = Arc::clone(&self.state);
        let port = self.port;
        let interval = self.monitor_interval;
        tokio::spawn(async move {
            monitor(monitor_state, port, interval).await;
        });

        Ok(())
    }

    /// Graceful stop: ask nicely, escalate after [`STOP_GRACE`]. Stopping
    /// an already-stopped process succeeds and changes nothing.
    pub async fn stop(&self) -> Result<(), ProcessError> {
        self.shutdown(false).await
    }

    /// Forced stop: no grace period.
    pub async fn kill(&self) -> Result<(), ProcessError> {
        self.shutdown(true).await
    }

    async fn shutdown(&self, force: bool) -> Result<(), ProcessError> {
        let mut state = self.state.lock().await;
        if !state.running && state.child.is_none() {
            return Ok(());
        }

        let pid = state.pid;
        info!(port = self.port, pid, force, "stopping game server process");

        if let Some(mut child) = state.child.take() {
            let result = if force {
                child.kill().await
            } else {
                child.terminate(STOP_GRACE).await
            };
            if let Err(err) = &result {
                warn!(port = self.port, pid, error = %err, "error while stopping process");
            }
            if state.exit_code.is_none() {
                state.exit_code = child.exit_code();
            }
            // Dropping the child releases the platform handle, exactly once.
        }

        state.running = false;
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }

    /// Pid of the supervised process, zero when never started.
    pub async fn pid(&self) -> u32 {
        self.state.lock().await.pid
    }

    /// Exit code captured after the process was observed dead.
    pub async fn exit_code(&self) -> Option<i32> {
        self.state.lock().await.exit_code
    }

    /// Time since start, zero when not running.
    pub async fn uptime(&self) -> Duration {
        let state = self.state.lock().await;
        if !state.running {
            return Duration::ZERO;
        }
        state.started_at.map(|at| at.elapsed()).unwrap_or_default()
    }

    /// Pin the process to `cores`. Failures are the caller's to log.
    pub async fn set_affinity(&self, cores: &[usize]) -> Result<(), ProcessError> {
        let state = self.state.lock().await;
        match &state.child {
            Some(child) => child.set_affinity(cores),
            None => Err(ProcessError::NotRunning),
        }
    }

    /// Toggle elevated scheduling priority.
    pub async fn set_priority(&self, high: bool) -> Result<(), ProcessError> {
        let state = self.state.lock().await;
        match &state.child {
            Some(child) => child.set_priority(high),
            None => Err(ProcessError::NotRunning),
        }
    }
}

async fn monitor(state: Arc<Mutex<ProcState>>, port: u16, interval: Duration) {
    loop {
        sleep(interval).await;

        let mut guard = state.lock().await;
        if !guard.running {
            return;
        }
        let Some(child) = guard.child.as_mut() else {
            return;
        };

        if !child.is_alive().await {
            let pid = child.pid();
            let exit_code = child.exit_code();
            guard.running = false;
            if guard.exit_code.is_none() {
                guard.exit_code = exit_code;
            }
            debug!(port, pid, exit_code = ?exit_code, "game server process exited");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamekeeper_core::MockDriver;

    fn mock_process() -> (Arc<MockDriver>, Process) {
        let driver = Arc::new(MockDriver::new());
        let process = Process::new(11235, Arc::clone(&driver) as Arc<dyn ProcessDriver>)
            .with_monitor_interval(Duration::from_millis(20));
        (driver, process)
    }

    #[tokio::test]
    async fn start_records_pid_and_running() {
        let (_driver, process) = mock_process();
        process.start(SpawnSpec::default()).await.unwrap();
        assert!(process.is_running().await);
        assert!(process.pid().await >= 1000);
        assert!(process.uptime().await > Duration::ZERO || process.is_running().await);
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let (_driver, process) = mock_process();
        process.start(SpawnSpec::default()).await.unwrap();
        assert!(matches!(
            process.start(SpawnSpec::default()).await,
            Err(ProcessError::AlreadyRunning { .. })
        ));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (driver, process) = mock_process();
        process.start(SpawnSpec::default()).await.unwrap();

        process.stop().await.unwrap();
        assert!(!process.is_running().await);
        assert!(!driver.last_child().unwrap().is_alive());

        // Second stop on an already-stopped process succeeds unchanged.
        process.stop().await.unwrap();
        assert!(!process.is_running().await);
        assert_eq!(process.uptime().await, Duration::ZERO);
    }

    #[tokio::test]
    async fn monitor_flips_running_after_external_exit() {
        let (driver, process) = mock_process();
        process.start(SpawnSpec::default()).await.unwrap();

        driver.last_child().unwrap().exit();

        // Must converge within two poll cycles.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!process.is_running().await);
        assert_eq!(process.exit_code().await, Some(0));
    }

    #[tokio::test]
    async fn restart_after_exit_gets_fresh_pid() {
        let (driver, process) = mock_process();
        process.start(SpawnSpec::default()).await.unwrap();
        let first_pid = process.pid().await;

        process.stop().await.unwrap();
        process.start(SpawnSpec::default()).await.unwrap();
        assert_ne!(process.pid().await, first_pid);
        assert_eq!(driver.spawned().len(), 2);
    }

    #[tokio::test]
    async fn spawn_failure_leaves_process_stopped() {
        let (driver, process) = mock_process();
        driver.fail_next_spawn();
        assert!(process.start(SpawnSpec::default()).await.is_err());
        assert!(!process.is_running().await);
        assert_eq!(process.pid().await, 0);
    }
}
