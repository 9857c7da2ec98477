//! Decode errors for the control-channel codec.

use thiserror::Error;

/// Errors produced while reading or decoding a frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The length prefix was zero.
    #[error("received zero-length frame")]
    EmptyFrame,

    /// The length prefix exceeded [`crate::MAX_PACKET_SIZE`].
    #[error("frame too large: {0} bytes (max {max})", max = crate::MAX_PACKET_SIZE)]
    FrameTooLarge(usize),

    /// The payload ended before the schema was fully decoded.
    #[error("truncated payload while reading {0}")]
    Truncated(&'static str),

    /// The first payload byte did not match any known command.
    #[error("unknown command: 0x{0:02X}")]
    UnknownCommand(u8),

    /// The 2-byte chat command word did not match any known command.
    #[error("unknown chat command: 0x{0:04X}")]
    UnknownChatCommand(u16),

    /// A string field held invalid UTF-8.
    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),

    /// The underlying socket read or write failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A write did not complete within the write deadline.
    #[error("write timed out after {0:?}")]
    WriteTimeout(std::time::Duration),
}
