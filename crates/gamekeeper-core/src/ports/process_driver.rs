//! Process driver port.
//!
//! Spawning and terminating game server processes differs meaningfully
//! between the supported OS families (handle-based termination and command
//! line quoting on one, signals and argv pass-through on the other). This
//! port keeps the rest of the supervisor platform-agnostic; the native
//! implementation lives in the runtime crate and a [`MockDriver`] double
//! lives beside this trait for tests.
//!
//! [`MockDriver`]: super::MockDriver

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from process control operations.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn {executable}: {reason}")]
    SpawnFailed { executable: String, reason: String },

    #[error("process is not running")]
    NotRunning,

    #[error("process already running (pid: {pid})")]
    AlreadyRunning { pid: u32 },

    #[error("operation not supported on this platform: {0}")]
    Unsupported(&'static str),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything needed to launch one game server process.
///
/// This expresses intent; how the command line is assembled and quoted is
/// the driver's business.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnSpec {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub work_dir: PathBuf,
    /// Environment entries rewritten for per-instance isolation; all other
    /// entries are inherited from the manager.
    pub env_overrides: HashMap<String, String>,
    /// Game port, for logging only.
    pub port: u16,
}

/// Handle to one spawned OS process.
///
/// The handle owns whatever platform resource makes termination reliable
/// (a process handle, a reapable child); dropping it releases that
/// resource exactly once.
#[async_trait]
pub trait ChildProcess: Send + std::fmt::Debug {
    /// OS process id.
    fn pid(&self) -> u32;

    /// Probe liveness without blocking. Also reaps the child when it has
    /// exited, capturing the exit code.
    async fn is_alive(&mut self) -> bool;

    /// Exit code, once the process has been observed dead. `None` while
    /// running or when the platform could not report one.
    fn exit_code(&self) -> Option<i32>;

    /// Ask the process to stop, escalating to a forced kill after `grace`.
    /// Idempotent: terminating an already-dead process succeeds.
    async fn terminate(&mut self, grace: Duration) -> Result<(), ProcessError>;

    /// Kill immediately without a grace period.
    async fn kill(&mut self) -> Result<(), ProcessError>;

    /// Pin the process to a set of CPU cores. Must be called after spawn —
    /// the process has to exist.
    fn set_affinity(&self, cores: &[usize]) -> Result<(), ProcessError>;

    /// Switch between normal and elevated scheduling priority.
    fn set_priority(&self, high: bool) -> Result<(), ProcessError>;
}

/// Spawns processes and cleans up strays for one OS family.
#[async_trait]
pub trait ProcessDriver: Send + Sync {
    /// Launch a process per `spec` and return its handle.
    async fn spawn(&self, spec: &SpawnSpec) -> Result<Box<dyn ChildProcess>, ProcessError>;

    /// Best-effort termination of a pid we no longer hold a handle for
    /// (orphans from a previous manager run). Succeeds if the pid is
    /// already gone.
    async fn kill_orphan(&self, pid: u32) -> Result<(), ProcessError>;
}
