//! Native process driver.
//!
//! Spawn and termination differ meaningfully between the supported OS
//! families: Unix launches through the standard process API in a fresh
//! session and terminates with SIGINT → SIGKILL escalation; Windows keeps
//! the process handle from creation for reliable handle-based termination
//! and falls back to the external kill tool. Everything above this module
//! talks to the [`ProcessDriver`] port and never sees the split.

pub mod cmdline;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

use async_trait::async_trait;

use gamekeeper_core::{ChildProcess, ProcessDriver, ProcessError, SpawnSpec};

/// [`ProcessDriver`] backed by the host OS.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeDriver;

impl NativeDriver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessDriver for NativeDriver {
    async fn spawn(&self, spec: &SpawnSpec) -> Result<Box<dyn ChildProcess>, ProcessError> {
        #[cfg(unix)]
        {
            unix::spawn(spec).await
        }
        #[cfg(windows)]
        {
            windows::spawn(spec).await
        }
        #[cfg(not(any(unix, windows)))]
        {
            let _ = spec;
            Err(ProcessError::Unsupported("process spawn"))
        }
    }

    async fn kill_orphan(&self, pid: u32) -> Result<(), ProcessError> {
        #[cfg(unix)]
        {
            unix::kill_orphan(pid).await
        }
        #[cfg(windows)]
        {
            windows::kill_orphan(pid).await
        }
        #[cfg(not(any(unix, windows)))]
        {
            let _ = pid;
            Err(ProcessError::Unsupported("orphan cleanup"))
        }
    }
}
