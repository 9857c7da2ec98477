//! Frame-level reads and writes.
//!
//! Both protocol variants share the same outer framing: a 2-byte LE length
//! prefix followed by that many payload bytes. Read deadlines are owned by
//! the caller (the listener applies different deadlines for handshake and
//! steady-state reads); the write path enforces its own deadline so a stuck
//! game server cannot wedge a broadcast.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::DecodeError;
use crate::packets::MAX_PACKET_SIZE;

/// Deadline applied to every frame write.
pub const WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// Read exactly one length-prefixed frame, returning its payload.
///
/// Fails with [`DecodeError::EmptyFrame`] on a zero length prefix and
/// [`DecodeError::FrameTooLarge`] when the prefix exceeds the protocol
/// maximum. A `length = 65535` frame is legal and buffered once.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, DecodeError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 2];
    reader.read_exact(&mut prefix).await?;
    let length = u16::from_le_bytes(prefix) as usize;

    if length == 0 {
        return Err(DecodeError::EmptyFrame);
    }
    if length > MAX_PACKET_SIZE {
        return Err(DecodeError::FrameTooLarge(length));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Write one frame, prepending the 2-byte LE length prefix.
///
/// The whole write must complete within [`WRITE_DEADLINE`].
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), DecodeError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_PACKET_SIZE {
        return Err(DecodeError::FrameTooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(2 + payload.len());
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(payload);

    match timeout(WRITE_DEADLINE, async {
        writer.write_all(&frame).await?;
        writer.flush().await
    })
    .await
    {
        Ok(result) => result.map_err(DecodeError::from),
        Err(_) => Err(DecodeError::WriteTimeout(WRITE_DEADLINE)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn round_trips_a_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &[0x40, 0x2B, 0x2C]).await.unwrap();
        assert_eq!(buf, vec![3, 0, 0x40, 0x2B, 0x2C]);

        let mut cursor = Cursor::new(buf);
        let payload = read_frame(&mut cursor).await.unwrap();
        assert_eq!(payload, vec![0x40, 0x2B, 0x2C]);
    }

    #[tokio::test]
    async fn rejects_zero_length_frame() {
        let mut cursor = Cursor::new(vec![0u8, 0u8]);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(DecodeError::EmptyFrame)
        ));
    }

    #[tokio::test]
    async fn accepts_maximum_length_frame() {
        let payload = vec![0xAB; MAX_PACKET_SIZE];
        let mut buf = Vec::new();
        write_frame(&mut buf, &payload).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded = read_frame(&mut cursor).await.unwrap();
        assert_eq!(decoded.len(), MAX_PACKET_SIZE);
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn short_read_is_an_error() {
        // Prefix says 10 bytes, only 2 present.
        let mut cursor = Cursor::new(vec![10, 0, 0x40, 0x41]);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(DecodeError::Io(_))
        ));
    }
}
