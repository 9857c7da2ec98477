//! Typed decoding of inbound game-server packets.

use std::collections::HashMap;

use tracing::{trace, warn};

use crate::error::DecodeError;
use crate::packets::inbound;
use crate::reader::PayloadReader;

/// Telemetry carried by a status packet (`0x42`).
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub port: u16,
    /// Seconds since the game server process started.
    pub uptime: u32,
    /// CPU usage as a fraction reported by the server itself.
    pub cpu_usage: f32,
    pub player_count: u8,
    /// Raw match-phase byte; interpretation is owned by the state layer.
    pub phase: u8,
    pub match_id: u32,
    /// Per-player ping samples. May hold fewer entries than `player_count`
    /// when the sender truncated the list.
    pub player_pings: HashMap<String, u16>,
}

/// Lag event from a long frame packet (`0x43`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LongFrame {
    pub port: u16,
    pub duration_ms: u32,
}

/// Match lobby announcement (`0x44`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbyCreated {
    pub port: u16,
    pub match_id: u32,
    pub map_name: String,
    pub mode: String,
}

/// Player connect/disconnect notice (`0x47`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerConnection {
    pub port: u16,
    pub player_name: String,
    pub player_id: u32,
    pub connected: bool,
}

/// Fork response from a pre-forked master process (`0x49`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForkResponse {
    pub port: u16,
    pub success: bool,
    pub pid: i32,
}

/// Replay upload status update (`0x4A`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayUpdate {
    pub port: u16,
    pub match_id: u32,
    /// Raw status byte; interpretation is owned by the state layer.
    pub status: u8,
}

/// One decoded inbound packet.
#[derive(Debug, Clone, PartialEq)]
pub enum GamePacket {
    Announce { port: u16 },
    Closed { port: u16 },
    Status(StatusReport),
    LongFrame(LongFrame),
    LobbyCreated(LobbyCreated),
    LobbyClosed { port: u16 },
    PlayerConnection(PlayerConnection),
    ForkResponse(ForkResponse),
    ReplayStatus(ReplayUpdate),
}

impl GamePacket {
    /// Decode a raw frame payload (command byte + packet body).
    ///
    /// Trailing bytes after a recognized schema are ignored so that newer
    /// game-server builds can extend packets without breaking the manager.
    pub fn parse(frame: &[u8]) -> Result<Self, DecodeError> {
        let (&cmd, payload) = frame
            .split_first()
            .ok_or(DecodeError::Truncated("command byte"))?;
        let mut r = PayloadReader::new(payload);

        match cmd {
            inbound::SERVER_ANNOUNCE => Ok(Self::Announce {
                port: r.read_u16("announce port")?,
            }),
            inbound::SERVER_CLOSED => Ok(Self::Closed {
                port: r.read_u16("closed port")?,
            }),
            inbound::SERVER_STATUS => parse_status(&mut r),
            inbound::LONG_FRAME => Ok(Self::LongFrame(LongFrame {
                port: r.read_u16("long frame port")?,
                duration_ms: r.read_u32("long frame duration")?,
            })),
            inbound::LOBBY_CREATED => Ok(Self::LobbyCreated(LobbyCreated {
                port: r.read_u16("lobby port")?,
                match_id: r.read_u32("lobby match id")?,
                map_name: r.read_string("lobby map")?,
                mode: r.read_string("lobby mode")?,
            })),
            inbound::LOBBY_CLOSED => Ok(Self::LobbyClosed {
                port: r.read_u16("lobby closed port")?,
            }),
            inbound::PLAYER_CONNECTION => Ok(Self::PlayerConnection(PlayerConnection {
                port: r.read_u16("player connection port")?,
                player_name: r.read_string("player name")?,
                player_id: r.read_u32("player id")?,
                connected: r.read_u8("connected flag")? == 1,
            })),
            inbound::FORK_RESPONSE => Ok(Self::ForkResponse(ForkResponse {
                port: r.read_u16("fork port")?,
                success: r.read_u8("fork success")? == 1,
                pid: r.read_i32("fork pid")?,
            })),
            inbound::REPLAY_STATUS => Ok(Self::ReplayStatus(ReplayUpdate {
                port: r.read_u16("replay port")?,
                match_id: r.read_u32("replay match id")?,
                status: r.read_u8("replay status")?,
            })),
            other => {
                warn!(command = other, payload_len = payload.len(), "unknown packet command");
                Err(DecodeError::UnknownCommand(other))
            }
        }
    }

    /// Port of the game server this packet refers to.
    pub fn port(&self) -> u16 {
        match self {
            Self::Announce { port }
            | Self::Closed { port }
            | Self::LobbyClosed { port } => *port,
            Self::Status(s) => s.port,
            Self::LongFrame(l) => l.port,
            Self::LobbyCreated(l) => l.port,
            Self::PlayerConnection(p) => p.port,
            Self::ForkResponse(f) => f.port,
            Self::ReplayStatus(u) => u.port,
        }
    }
}

fn parse_status(r: &mut PayloadReader<'_>) -> Result<GamePacket, DecodeError> {
    let port = r.read_u16("status port")?;
    let uptime = r.read_u32("status uptime")?;
    let cpu_usage = r.read_f32("status cpu")?;
    let player_count = r.read_u8("status player count")?;
    let phase = r.read_u8("status phase")?;
    let match_id = r.read_u32("status match id")?;

    // The ping list may be truncated; stop quietly at the first short read.
    let mut player_pings = HashMap::new();
    for _ in 0..player_count {
        let name = match r.read_string("ping name") {
            Ok(name) => name,
            Err(_) => break,
        };
        let ping = match r.read_u16("ping value") {
            Ok(ping) => ping,
            Err(_) => break,
        };
        player_pings.insert(name, ping);
    }

    trace!(port, uptime, players = player_count, phase, "server status");

    Ok(GamePacket::Status(StatusReport {
        port,
        uptime,
        cpu_usage,
        player_count,
        phase,
        match_id,
        player_pings,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::PacketBuilder;

    #[test]
    fn parses_announce() {
        let frame = [inbound::SERVER_ANNOUNCE, 0x2B, 0x2C];
        assert_eq!(
            GamePacket::parse(&frame).unwrap(),
            GamePacket::Announce { port: 11307 }
        );
    }

    #[test]
    fn parses_status_without_players() {
        let frame = PacketBuilder::new()
            .put_u8(inbound::SERVER_STATUS)
            .put_u16(11307)
            .put_u32(60)
            .put_f32(0.25)
            .put_u8(0)
            .put_u8(0)
            .put_u32(0)
            .build();
        let GamePacket::Status(status) = GamePacket::parse(&frame).unwrap() else {
            panic!("expected status packet");
        };
        assert_eq!(status.port, 11307);
        assert_eq!(status.uptime, 60);
        assert_eq!(status.cpu_usage, 0.25);
        assert_eq!(status.player_count, 0);
        assert_eq!(status.match_id, 0);
        assert!(status.player_pings.is_empty());
    }

    #[test]
    fn parses_status_ping_list() {
        let frame = PacketBuilder::new()
            .put_u8(inbound::SERVER_STATUS)
            .put_u16(11307)
            .put_u32(120)
            .put_f32(0.5)
            .put_u8(2)
            .put_u8(6)
            .put_u32(777)
            .put_string("p1")
            .put_u16(40)
            .put_string("p2")
            .put_u16(85)
            .build();
        let GamePacket::Status(status) = GamePacket::parse(&frame).unwrap() else {
            panic!("expected status packet");
        };
        assert_eq!(status.player_pings.len(), 2);
        assert_eq!(status.player_pings["p1"], 40);
        assert_eq!(status.player_pings["p2"], 85);
    }

    #[test]
    fn truncated_ping_list_parses_partially() {
        // player_count claims 2 but only one complete (name, ping) pair follows.
        let frame = PacketBuilder::new()
            .put_u8(inbound::SERVER_STATUS)
            .put_u16(11307)
            .put_u32(120)
            .put_f32(0.5)
            .put_u8(2)
            .put_u8(6)
            .put_u32(777)
            .put_string("p1")
            .put_u16(40)
            .build();
        let GamePacket::Status(status) = GamePacket::parse(&frame).unwrap() else {
            panic!("expected status packet");
        };
        assert_eq!(status.player_count, 2);
        assert_eq!(status.player_pings.len(), 1);
    }

    #[test]
    fn parses_lobby_created() {
        let frame = PacketBuilder::new()
            .put_u8(inbound::LOBBY_CREATED)
            .put_u16(11236)
            .put_u32(424_242)
            .put_string("caldavar")
            .put_string("ranked")
            .build();
        assert_eq!(
            GamePacket::parse(&frame).unwrap(),
            GamePacket::LobbyCreated(LobbyCreated {
                port: 11236,
                match_id: 424_242,
                map_name: "caldavar".into(),
                mode: "ranked".into(),
            })
        );
    }

    #[test]
    fn parses_player_connection() {
        let frame = PacketBuilder::new()
            .put_u8(inbound::PLAYER_CONNECTION)
            .put_u16(11235)
            .put_string("player_one")
            .put_u32(9001)
            .put_u8(1)
            .build();
        assert_eq!(
            GamePacket::parse(&frame).unwrap(),
            GamePacket::PlayerConnection(PlayerConnection {
                port: 11235,
                player_name: "player_one".into(),
                player_id: 9001,
                connected: true,
            })
        );
    }

    #[test]
    fn parses_fork_response() {
        let frame = PacketBuilder::new()
            .put_u8(inbound::FORK_RESPONSE)
            .put_u16(11240)
            .put_u8(1)
            .put_i32(31337)
            .build();
        assert_eq!(
            GamePacket::parse(&frame).unwrap(),
            GamePacket::ForkResponse(ForkResponse {
                port: 11240,
                success: true,
                pid: 31337,
            })
        );
    }

    #[test]
    fn parses_replay_status() {
        let frame = PacketBuilder::new()
            .put_u8(inbound::REPLAY_STATUS)
            .put_u16(11235)
            .put_u32(555)
            .put_u8(4)
            .build();
        assert_eq!(
            GamePacket::parse(&frame).unwrap(),
            GamePacket::ReplayStatus(ReplayUpdate {
                port: 11235,
                match_id: 555,
                status: 4,
            })
        );
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let frame = [inbound::SERVER_CLOSED, 0x2B, 0x2C, 0xDE, 0xAD, 0xBE, 0xEF];
        assert_eq!(
            GamePacket::parse(&frame).unwrap(),
            GamePacket::Closed { port: 11307 }
        );
    }

    #[test]
    fn unknown_command_is_rejected() {
        let frame = [0x7F, 0x00, 0x00];
        assert!(matches!(
            GamePacket::parse(&frame),
            Err(DecodeError::UnknownCommand(0x7F))
        ));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let frame = [inbound::SERVER_ANNOUNCE, 0x2B];
        assert!(matches!(
            GamePacket::parse(&frame),
            Err(DecodeError::Truncated(_))
        ));
    }

    #[test]
    fn port_accessor_covers_all_variants() {
        let frame = [inbound::LOBBY_CLOSED, 0x2B, 0x2C];
        assert_eq!(GamePacket::parse(&frame).unwrap().port(), 11307);
    }
}
