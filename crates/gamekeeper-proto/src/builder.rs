//! Construction of outbound packets.
//!
//! Builders produce the frame payload only (command byte first); the wire
//! layer prepends the length prefix when writing.

use crate::packets::{AUTOPING_MAGIC, outbound};

/// Incremental packet writer. All multi-byte integers are little-endian.
#[derive(Default)]
pub struct PacketBuilder {
    buf: Vec<u8>,
}

impl PacketBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(mut self, v: u8) -> Self {
        self.buf.push(v);
        self
    }

    pub fn put_u16(mut self, v: u16) -> Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn put_u32(mut self, v: u32) -> Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn put_i32(mut self, v: i32) -> Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn put_f32(mut self, v: f32) -> Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    /// Append a length-prefixed string: `[len:u8][bytes…]`.
    ///
    /// Payloads longer than 255 bytes are truncated to fit the prefix.
    pub fn put_string(mut self, s: &str) -> Self {
        let bytes = s.as_bytes();
        let len = bytes.len().min(255);
        self.buf.push(len as u8);
        self.buf.extend_from_slice(&bytes[..len]);
        self
    }

    /// Append a NUL-terminated string.
    pub fn put_nul_string(mut self, s: &str) -> Self {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
        self
    }

    pub fn put_bytes(mut self, data: &[u8]) -> Self {
        self.buf.extend_from_slice(data);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

/// Console command packet (`0x50`): `[cmd:1][command:nul_str]`.
pub fn build_command(command: &str) -> Vec<u8> {
    PacketBuilder::new()
        .put_u8(outbound::MANAGER_COMMAND)
        .put_nul_string(command)
        .build()
}

/// Kick packet (`0x51`): `[cmd:1][player_id:4][reason:nul_str]`.
pub fn build_kick(player_id: u32, reason: &str) -> Vec<u8> {
    PacketBuilder::new()
        .put_u8(outbound::MANAGER_KICK)
        .put_u32(player_id)
        .put_nul_string(reason)
        .build()
}

/// In-game message packet (`0x52`): `[cmd:1][message:nul_str]`.
pub fn build_message(message: &str) -> Vec<u8> {
    PacketBuilder::new()
        .put_u8(outbound::MANAGER_MESSAGE)
        .put_nul_string(message)
        .build()
}

/// UDP auto-ping reply: `[magic:1][name:nul_str][version:nul_str]`.
pub fn build_autoping_response(server_name: &str, version: &str) -> Vec<u8> {
    PacketBuilder::new()
        .put_u8(AUTOPING_MAGIC)
        .put_nul_string(server_name)
        .put_nul_string(version)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_packet_layout() {
        let pkt = build_command("ServerReset");
        assert_eq!(pkt[0], outbound::MANAGER_COMMAND);
        assert_eq!(&pkt[1..12], b"ServerReset");
        assert_eq!(*pkt.last().unwrap(), 0);
    }

    #[test]
    fn kick_packet_layout() {
        let pkt = build_kick(9001, "afk");
        assert_eq!(pkt[0], outbound::MANAGER_KICK);
        assert_eq!(u32::from_le_bytes(pkt[1..5].try_into().unwrap()), 9001);
        assert_eq!(&pkt[5..8], b"afk");
        assert_eq!(pkt[8], 0);
    }

    #[test]
    fn message_packet_layout() {
        let pkt = build_message("server restarting soon");
        assert_eq!(pkt[0], outbound::MANAGER_MESSAGE);
        assert_eq!(*pkt.last().unwrap(), 0);
    }

    #[test]
    fn long_strings_truncate_at_255() {
        let long = "x".repeat(300);
        let pkt = PacketBuilder::new().put_string(&long).build();
        assert_eq!(pkt[0], 255);
        assert_eq!(pkt.len(), 256);
    }

    #[test]
    fn autoping_response_carries_magic() {
        let pkt = build_autoping_response("Test Server", "4.10.1");
        assert_eq!(pkt[0], AUTOPING_MAGIC);
        assert!(pkt.windows(6).any(|w| w == b"4.10.1"));
    }
}
