//! In-memory process driver for tests.
//!
//! `MockDriver` hands out children that are "alive" until terminated,
//! records every spawn and orphan kill, and can be told to fail the next
//! spawn. Kept outside `#[cfg(test)]` so downstream crates can drive their
//! own supervisor tests with it.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{ChildProcess, ProcessDriver, ProcessError, SpawnSpec};

/// Shared view into one mock child, for assertions after the supervisor
/// has taken ownership of the boxed handle.
#[derive(Clone)]
pub struct MockChild {
    pid: u32,
    alive: Arc<AtomicBool>,
}

impl MockChild {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Simulate the process dying on its own.
    pub fn exit(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct MockChildHandle {
    pid: u32,
    alive: Arc<AtomicBool>,
    exit_code: Option<i32>,
}

#[async_trait]
impl ChildProcess for MockChildHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    async fn is_alive(&mut self) -> bool {
        let alive = self.alive.load(Ordering::SeqCst);
        if !alive && self.exit_code.is_none() {
            self.exit_code = Some(0);
        }
        alive
    }

    fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    async fn terminate(&mut self, _grace: Duration) -> Result<(), ProcessError> {
        self.alive.store(false, Ordering::SeqCst);
        self.exit_code.get_or_insert(0);
        Ok(())
    }

    async fn kill(&mut self) -> Result<(), ProcessError> {
        self.alive.store(false, Ordering::SeqCst);
        self.exit_code.get_or_insert(-9);
        Ok(())
    }

    fn set_affinity(&self, _cores: &[usize]) -> Result<(), ProcessError> {
        Ok(())
    }

    fn set_priority(&self, _high: bool) -> Result<(), ProcessError> {
        Ok(())
    }
}

/// Test double for [`ProcessDriver`].
#[derive(Default)]
pub struct MockDriver {
    next_pid: AtomicU32,
    fail_next_spawn: AtomicBool,
    spawned: Mutex<Vec<(SpawnSpec, MockChild)>>,
    orphans_killed: Mutex<Vec<u32>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            ..Self::default()
        }
    }

    /// Make the next `spawn` call fail.
    pub fn fail_next_spawn(&self) {
        self.fail_next_spawn.store(true, Ordering::SeqCst);
    }

    /// Specs passed to `spawn`, in order, with their children.
    pub fn spawned(&self) -> Vec<(SpawnSpec, MockChild)> {
        self.spawned.lock().expect("mock lock").clone()
    }

    /// The most recently spawned child.
    pub fn last_child(&self) -> Option<MockChild> {
        self.spawned
            .lock()
            .expect("mock lock")
            .last()
            .map(|(_, child)| child.clone())
    }

    /// Pids passed to `kill_orphan`.
    pub fn orphans_killed(&self) -> Vec<u32> {
        self.orphans_killed.lock().expect("mock lock").clone()
    }
}

#[async_trait]
impl ProcessDriver for MockDriver {
    async fn spawn(&self, spec: &SpawnSpec) -> Result<Box<dyn ChildProcess>, ProcessError> {
        if self.fail_next_spawn.swap(false, Ordering::SeqCst) {
            return Err(ProcessError::SpawnFailed {
                executable: spec.executable.display().to_string(),
                reason: "mock spawn failure".to_string(),
            });
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let alive = Arc::new(AtomicBool::new(true));
        let child = MockChild {
            pid,
            alive: Arc::clone(&alive),
        };
        self.spawned
            .lock()
            .expect("mock lock")
            .push((spec.clone(), child));

        Ok(Box::new(MockChildHandle {
            pid,
            alive,
            exit_code: None,
        }))
    }

    async fn kill_orphan(&self, pid: u32) -> Result<(), ProcessError> {
        self.orphans_killed.lock().expect("mock lock").push(pid);
        Ok(())
    }
}
