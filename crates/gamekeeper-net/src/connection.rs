//! One accepted control-channel connection.
//!
//! The per-connection read loop owns the socket's read half; a
//! [`Connection`] wraps the write half plus identity and activity state so
//! the registry can send to it from anywhere. A connection is unidentified
//! (`port() == 0`) until the announce handshake fills in its game port.

use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tracing::debug;

use gamekeeper_proto::{DecodeError, build_command, build_kick, build_message, write_frame};

/// Write side and bookkeeping for one game-server connection.
pub struct Connection {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    peer: SocketAddr,
    port: AtomicU16,
    connected_at: Instant,
    last_activity: Mutex<Instant>,
    closed: AtomicBool,
}

impl Connection {
    /// Wrap the write half of an accepted socket.
    pub fn new(writer: OwnedWriteHalf, peer: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            writer: tokio::sync::Mutex::new(writer),
            peer,
            port: AtomicU16::new(0),
            connected_at: now,
            last_activity: Mutex::new(now),
            closed: AtomicBool::new(false),
        }
    }

    /// Associate this connection with a game port after the handshake.
    pub fn set_port(&self, port: u16) {
        self.port.store(port, Ordering::SeqCst);
    }

    /// Game port, or 0 before the handshake completed.
    pub fn port(&self) -> u16 {
        self.port.load(Ordering::SeqCst)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Record activity; called by the read loop on every frame and by the
    /// write path on every send.
    pub fn touch(&self) {
        *self.last_activity.lock().expect("activity lock") = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock().expect("activity lock")
    }

    /// Whether [`close`](Connection::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send one frame. The codec enforces the write deadline.
    pub async fn write_packet(&self, payload: &[u8]) -> Result<(), DecodeError> {
        if self.is_closed() {
            return Err(DecodeError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "connection is closed",
            )));
        }

        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, payload).await?;
        drop(writer);

        self.touch();
        Ok(())
    }

    /// Send a console command (`0x50`) to the game server.
    pub async fn send_command(&self, command: &str) -> Result<(), DecodeError> {
        self.write_packet(&build_command(command)).await
    }

    /// Send an in-game message (`0x52`) shown to all players.
    pub async fn send_message(&self, message: &str) -> Result<(), DecodeError> {
        self.write_packet(&build_message(message)).await
    }

    /// Kick a player (`0x51`) by id.
    pub async fn kick_player(&self, player_id: u32, reason: &str) -> Result<(), DecodeError> {
        self.write_packet(&build_kick(player_id, reason)).await
    }

    /// Mark closed and shut down the write half. Idempotent. The read loop
    /// observes the flag (or the peer's FIN) and exits on its next
    /// deadline.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
        debug!(port = self.port(), peer = %self.peer, "connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn writes_length_prefixed_frames() {
        let (client, server) = socket_pair().await;
        let peer = server.peer_addr().unwrap();
        let (_read, write) = server.into_split();
        let conn = Connection::new(write, peer);

        conn.send_command("restart").await.unwrap();

        let mut buf = vec![0u8; 64];
        let mut client = client;
        let n = client.read(&mut buf).await.unwrap();
        // [len:2][0x50]["restart"][NUL]
        assert_eq!(&buf[..2], &9u16.to_le_bytes());
        assert_eq!(buf[2], 0x50);
        assert_eq!(&buf[3..10], b"restart");
        assert_eq!(buf[10], 0);
        assert_eq!(n, 11);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_rejects_writes() {
        let (_client, server) = socket_pair().await;
        let peer = server.peer_addr().unwrap();
        let (_read, write) = server.into_split();
        let conn = Connection::new(write, peer);

        conn.close().await;
        conn.close().await;
        assert!(conn.is_closed());
        assert!(conn.send_message("late").await.is_err());
    }

    #[tokio::test]
    async fn port_starts_unset_and_sticks_after_handshake() {
        let (_client, server) = socket_pair().await;
        let peer = server.peer_addr().unwrap();
        let (_read, write) = server.into_split();
        let conn = Connection::new(write, peer);

        assert_eq!(conn.port(), 0);
        conn.set_port(11307);
        assert_eq!(conn.port(), 11307);
    }
}
