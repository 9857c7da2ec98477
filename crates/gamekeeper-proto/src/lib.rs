//! Binary wire codec for the gamekeeper control channel.
//!
//! Every supervised game server keeps one loopback TCP connection to the
//! manager and speaks a little-endian binary protocol over it. Frames are
//! length-prefixed with a 2-byte LE length; the first payload byte is the
//! command. This crate owns the full codec surface:
//!
//! - [`wire`] — frame-level reads and writes over async sockets
//! - [`packet`] — typed decoding of inbound game-server packets
//! - [`builder`] — construction of outbound packets
//! - [`chat`] — the chat-service channel variant (2-byte command words)
//!
//! The codec is deliberately forward-compatible: trailing bytes after a
//! recognized payload schema are ignored, and the per-player ping list in a
//! status packet may be truncated by the sender.

pub mod builder;
pub mod chat;
pub mod error;
pub mod packet;
pub mod packets;
pub mod reader;
pub mod wire;

pub use builder::{
    PacketBuilder, build_autoping_response, build_command, build_kick, build_message,
};
pub use chat::{ChatPacket, build_chat_handshake, build_chat_replay_status, build_chat_server_info};
pub use error::DecodeError;
pub use packet::{
    ForkResponse, GamePacket, LobbyCreated, LongFrame, PlayerConnection, ReplayUpdate,
    StatusReport,
};
pub use packets::{LENGTH_PREFIX_SIZE, MAX_PACKET_SIZE};
pub use reader::PayloadReader;
pub use wire::{read_frame, write_frame};
