//! Event taxonomy for the fleet manager.
//!
//! Everything that happens in the system — a frame arriving on the control
//! channel, an operator command, a lifecycle change — is expressed as an
//! [`Event`] published on the [`EventBus`]. Payloads are a tagged sum so
//! handlers can pattern-match and return early on a kind they do not
//! expect; a misdirected event is not an error.

mod bus;

pub use bus::{EventBus, HandlerFuture};

use serde::Serialize;

use gamekeeper_proto::{
    ForkResponse, GamePacket, LobbyCreated, LongFrame, PlayerConnection, ReplayUpdate,
    StatusReport,
};

/// Discriminant for event routing and subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Control-channel traffic
    ServerAnnounce,
    ServerClosed,
    ServerStatus,
    LongFrame,
    LobbyCreated,
    LobbyClosed,
    PlayerConnection,
    ForkResponse,
    ReplayStatus,

    // Operator commands
    ShutdownServer,
    WakeServer,
    SleepServer,
    MessageServer,
    CommandServer,

    // Lifecycle
    ConfigChanged,
    PatchServer,
    Shutdown,

    // Notification sinks
    NotifyDiscordAdmin,
    NotifyMqtt,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ServerAnnounce => "server_announce",
            Self::ServerClosed => "server_closed",
            Self::ServerStatus => "server_status",
            Self::LongFrame => "long_frame",
            Self::LobbyCreated => "lobby_created",
            Self::LobbyClosed => "lobby_closed",
            Self::PlayerConnection => "player_connection",
            Self::ForkResponse => "fork_response",
            Self::ReplayStatus => "replay_status",
            Self::ShutdownServer => "cmd_shutdown_server",
            Self::WakeServer => "cmd_wake_server",
            Self::SleepServer => "cmd_sleep_server",
            Self::MessageServer => "cmd_message_server",
            Self::CommandServer => "cmd_command_server",
            Self::ConfigChanged => "config_changed",
            Self::PatchServer => "patch_server",
            Self::Shutdown => "shutdown",
            Self::NotifyDiscordAdmin => "notify_discord_admin",
            Self::NotifyMqtt => "notify_mqtt",
        };
        f.write_str(s)
    }
}

/// Operator command addressed to one instance by port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommand {
    pub port: u16,
    pub command: String,
    pub args: Vec<String>,
}

/// Payload for an admin notification sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminNotice {
    pub title: String,
    pub message: String,
    /// `info`, `warning`, `error`, or `critical`.
    pub level: String,
}

/// Fleet-wide heartbeat published for telemetry sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FleetHeartbeat {
    pub total_servers: usize,
    pub running: usize,
    pub occupied: usize,
    pub timestamp: i64,
}

/// Type-specific payload of an [`Event`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// No payload (e.g. `shutdown`).
    None,
    /// A bare game port (announce, closed, lobby closed, wake, sleep).
    Port(u16),
    Status(StatusReport),
    LongFrame(LongFrame),
    LobbyCreated(LobbyCreated),
    PlayerConnection(PlayerConnection),
    ForkResponse(ForkResponse),
    ReplayStatus(ReplayUpdate),
    Command(ServerCommand),
    Notice(AdminNotice),
    Heartbeat(FleetHeartbeat),
    /// A configuration section/key that changed.
    ConfigKey { section: String, key: String },
}

impl EventPayload {
    /// Game port addressed by this payload, when it has one.
    pub fn port(&self) -> Option<u16> {
        match self {
            Self::Port(port) => Some(*port),
            Self::Status(s) => Some(s.port),
            Self::LongFrame(l) => Some(l.port),
            Self::LobbyCreated(l) => Some(l.port),
            Self::PlayerConnection(p) => Some(p.port),
            Self::ForkResponse(f) => Some(f.port),
            Self::ReplayStatus(u) => Some(u.port),
            Self::Command(c) => Some(c.port),
            Self::None | Self::Notice(_) | Self::Heartbeat(_) | Self::ConfigKey { .. } => None,
        }
    }
}

/// Immutable value dispatched through the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub event_type: EventType,
    /// Where the event came from, for diagnostics (`game_server:11235`,
    /// `health_check`, `api`, …).
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(event_type: EventType, source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            event_type,
            source: source.into(),
            payload,
        }
    }

    /// Event with no payload.
    pub fn signal(event_type: EventType, source: impl Into<String>) -> Self {
        Self::new(event_type, source, EventPayload::None)
    }

    /// Conventional source string for a game server connection.
    pub fn server_source(port: u16) -> String {
        format!("game_server:{port}")
    }

    /// Map a decoded control-channel packet to its bus event.
    pub fn from_packet(packet: GamePacket) -> Self {
        let source = Self::server_source(packet.port());
        let (event_type, payload) = match packet {
            GamePacket::Announce { port } => (EventType::ServerAnnounce, EventPayload::Port(port)),
            GamePacket::Closed { port } => (EventType::ServerClosed, EventPayload::Port(port)),
            GamePacket::Status(s) => (EventType::ServerStatus, EventPayload::Status(s)),
            GamePacket::LongFrame(l) => (EventType::LongFrame, EventPayload::LongFrame(l)),
            GamePacket::LobbyCreated(l) => {
                (EventType::LobbyCreated, EventPayload::LobbyCreated(l))
            }
            GamePacket::LobbyClosed { port } => (EventType::LobbyClosed, EventPayload::Port(port)),
            GamePacket::PlayerConnection(p) => {
                (EventType::PlayerConnection, EventPayload::PlayerConnection(p))
            }
            GamePacket::ForkResponse(f) => {
                (EventType::ForkResponse, EventPayload::ForkResponse(f))
            }
            GamePacket::ReplayStatus(u) => (EventType::ReplayStatus, EventPayload::ReplayStatus(u)),
        };
        Self::new(event_type, source, payload)
    }

    /// A synthetic `server_closed` for a port whose connection went away
    /// without the server saying goodbye.
    pub fn synthesized_close(port: u16) -> Self {
        Self::new(
            EventType::ServerClosed,
            Self::server_source(port),
            EventPayload::Port(port),
        )
    }
}
