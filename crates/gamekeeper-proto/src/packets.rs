//! Command bytes and size limits for the control-channel protocol.

/// Maximum allowed size of a single frame payload, in bytes.
pub const MAX_PACKET_SIZE: usize = 65_535;

/// Size of the frame length prefix, in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Inbound commands (game server → manager).
pub mod inbound {
    /// Server hello carrying the instance's game port.
    pub const SERVER_ANNOUNCE: u8 = 0x40;
    /// Server is shutting down.
    pub const SERVER_CLOSED: u8 = 0x41;
    /// Telemetry: uptime, CPU, players, phase, match id, pings.
    pub const SERVER_STATUS: u8 = 0x42;
    /// Lag event: one frame took too long.
    pub const LONG_FRAME: u8 = 0x43;
    /// Match lobby created (match id, map, mode).
    pub const LOBBY_CREATED: u8 = 0x44;
    /// Match lobby closed.
    pub const LOBBY_CLOSED: u8 = 0x45;
    /// Player connected or disconnected.
    pub const PLAYER_CONNECTION: u8 = 0x47;
    /// Fork response from a pre-forked master process.
    pub const FORK_RESPONSE: u8 = 0x49;
    /// Replay upload status update.
    pub const REPLAY_STATUS: u8 = 0x4A;
}

/// Outbound commands (manager → game server).
pub mod outbound {
    /// Execute a console command on the game server.
    pub const MANAGER_COMMAND: u8 = 0x50;
    /// Kick a player by id.
    pub const MANAGER_KICK: u8 = 0x51;
    /// Show an in-game message to all players.
    pub const MANAGER_MESSAGE: u8 = 0x52;
}

/// Chat-service channel command words (2-byte LE).
pub mod chat {
    /// Handshake with session cookie and server id.
    pub const HANDSHAKE: u16 = 0x1600;
    /// Server info: region, IP, name, version.
    pub const SERVER_INFO: u16 = 0x1602;
    /// Replay status update pushed to the chat service.
    pub const REPLAY_STATUS: u16 = 0x1603;
    /// Shutdown notice from the chat service.
    pub const SHUTDOWN: u16 = 0x0400;
    /// Keepalive heartbeat.
    pub const KEEPALIVE: u16 = 0x0200;
    /// Replay request relayed from a player.
    pub const REPLAY_REQUEST: u16 = 0x1704;
}

/// Magic byte carried by UDP auto-ping probes.
pub const AUTOPING_MAGIC: u8 = 0xCA;
