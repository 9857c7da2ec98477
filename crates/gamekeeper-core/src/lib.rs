//! Domain types, event bus, and configuration for the gamekeeper fleet
//! manager.
//!
//! This crate is the dependency root for the rest of the workspace: it owns
//! the status/phase vocabulary, the event taxonomy and the asynchronous
//! [`events::EventBus`] that binds the listener, the supervisor, and the
//! notification sinks together, the persistent configuration document, the
//! pid pin-file, and the [`ports`] that abstract OS process control.

pub mod config;
pub mod events;
pub mod pinfile;
pub mod ports;
pub mod status;

pub use config::{AppData, Config, ConfigError, ConfigHandle, HonData};
pub use events::{
    AdminNotice, Event, EventBus, EventPayload, EventType, FleetHeartbeat, ServerCommand,
};
pub use ports::{ChildProcess, MockDriver, ProcessDriver, ProcessError, SpawnSpec};
pub use status::{GamePhase, GameStatus, ReplayState};
