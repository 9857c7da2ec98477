//! Capability traits that decouple the supervisor from the host OS.

mod mock;
mod process_driver;

pub use mock::{MockChild, MockDriver};
pub use process_driver::{ChildProcess, ProcessDriver, ProcessError, SpawnSpec};
