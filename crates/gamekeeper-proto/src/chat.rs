//! Chat-service channel codec.
//!
//! The chat channel shares the outer framing with the instance channel but
//! uses a 2-byte LE command word instead of a command byte, and strings on
//! this channel are NUL-terminated. The manager side of the chat client
//! lives outside this repository; the codec is kept complete here so both
//! halves agree on the wire format.

use crate::builder::PacketBuilder;
use crate::error::DecodeError;
use crate::packets::chat;
use crate::reader::PayloadReader;

/// One decoded chat-channel packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatPacket {
    /// Shutdown notice from the chat service, with its stated reason.
    Shutdown { reason: String },
    /// Keepalive heartbeat.
    Keepalive,
    /// Replay request relayed from a player.
    ReplayRequest { match_id: u32, account_id: u32 },
}

impl ChatPacket {
    /// Decode a raw chat frame payload (command word + body).
    pub fn parse(frame: &[u8]) -> Result<Self, DecodeError> {
        let mut r = PayloadReader::new(frame);
        let cmd = r.read_u16("chat command")?;
        match cmd {
            chat::SHUTDOWN => Ok(Self::Shutdown {
                reason: r.read_nul_string("shutdown reason")?,
            }),
            chat::KEEPALIVE => Ok(Self::Keepalive),
            chat::REPLAY_REQUEST => Ok(Self::ReplayRequest {
                match_id: r.read_u32("replay request match id")?,
                account_id: r.read_u32("replay request account id")?,
            }),
            other => Err(DecodeError::UnknownChatCommand(other)),
        }
    }
}

/// Handshake packet (`0x1600`): `[cmd:2][session_cookie:nul_str][server_id:4]`.
pub fn build_chat_handshake(session_cookie: &str, server_id: u32) -> Vec<u8> {
    PacketBuilder::new()
        .put_u16(chat::HANDSHAKE)
        .put_nul_string(session_cookie)
        .put_u32(server_id)
        .build()
}

/// Server info packet (`0x1602`): four NUL-terminated strings.
pub fn build_chat_server_info(region: &str, ip: &str, name: &str, version: &str) -> Vec<u8> {
    PacketBuilder::new()
        .put_u16(chat::SERVER_INFO)
        .put_nul_string(region)
        .put_nul_string(ip)
        .put_nul_string(name)
        .put_nul_string(version)
        .build()
}

/// Replay status packet (`0x1603`): `[cmd:2][match_id:4][status:1]`.
pub fn build_chat_replay_status(match_id: u32, status: u8) -> Vec<u8> {
    PacketBuilder::new()
        .put_u16(chat::REPLAY_STATUS)
        .put_u32(match_id)
        .put_u8(status)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_layout() {
        let pkt = build_chat_handshake("cookie123", 42);
        assert_eq!(u16::from_le_bytes(pkt[..2].try_into().unwrap()), 0x1600);
        assert_eq!(&pkt[2..11], b"cookie123");
        assert_eq!(pkt[11], 0);
        assert_eq!(u32::from_le_bytes(pkt[12..16].try_into().unwrap()), 42);
    }

    #[test]
    fn server_info_has_four_nul_strings() {
        let pkt = build_chat_server_info("EU", "203.0.113.9", "Test", "4.10.1");
        assert_eq!(u16::from_le_bytes(pkt[..2].try_into().unwrap()), 0x1602);
        assert_eq!(pkt[2..].iter().filter(|&&b| b == 0).count(), 4);
    }

    #[test]
    fn replay_status_layout() {
        let pkt = build_chat_replay_status(555, 3);
        assert_eq!(u16::from_le_bytes(pkt[..2].try_into().unwrap()), 0x1603);
        assert_eq!(u32::from_le_bytes(pkt[2..6].try_into().unwrap()), 555);
        assert_eq!(pkt[6], 3);
    }

    #[test]
    fn parses_shutdown_and_keepalive() {
        let mut shutdown = 0x0400_u16.to_le_bytes().to_vec();
        shutdown.extend_from_slice(b"maintenance\0");
        assert_eq!(
            ChatPacket::parse(&shutdown).unwrap(),
            ChatPacket::Shutdown {
                reason: "maintenance".into()
            }
        );
        assert_eq!(
            ChatPacket::parse(&0x0200_u16.to_le_bytes()).unwrap(),
            ChatPacket::Keepalive
        );
    }

    #[test]
    fn parses_replay_request() {
        let mut frame = 0x1704_u16.to_le_bytes().to_vec();
        frame.extend_from_slice(&555_u32.to_le_bytes());
        frame.extend_from_slice(&77_u32.to_le_bytes());
        assert_eq!(
            ChatPacket::parse(&frame).unwrap(),
            ChatPacket::ReplayRequest {
                match_id: 555,
                account_id: 77,
            }
        );
    }

    #[test]
    fn unknown_chat_command_is_rejected() {
        assert!(matches!(
            ChatPacket::parse(&0x9999_u16.to_le_bytes()),
            Err(DecodeError::UnknownChatCommand(0x9999))
        ));
    }
}
