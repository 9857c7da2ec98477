//! Host-binary plumbing for gamekeeper.
//!
//! The binary itself is a thin dispatcher; everything it wires together
//! lives here so integration tests can compose the same application
//! without spawning a process.

pub mod bootstrap;
pub mod cli;
pub mod sinks;

pub use bootstrap::{AppContext, bootstrap, run_supervisor};
pub use cli::{Cli, Commands, ConfigCommand};
pub use sinks::DiscordNotifier;
