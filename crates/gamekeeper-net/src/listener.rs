//! Loopback control listener.
//!
//! Every supervised game server dials `127.0.0.1:<manager_port>` right
//! after launch and must announce itself (`0x40`) within the handshake
//! deadline. Identified connections land in the [`ConnectionRegistry`];
//! every subsequent frame is decoded and published on the event bus in
//! arrival order for that connection. There is no ordering guarantee
//! across connections.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpSocket, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use gamekeeper_core::{Event, EventBus};
use gamekeeper_proto::{DecodeError, GamePacket, read_frame};

use crate::connection::Connection;
use crate::error::NetError;
use crate::registry::ConnectionRegistry;

/// Read deadlines for the per-connection protocol.
#[derive(Debug, Clone, Copy)]
pub struct ListenerTimeouts {
    /// Deadline for the announce frame on a fresh connection.
    pub handshake: Duration,
    /// Idle deadline between frames on an identified connection.
    pub read: Duration,
}

impl Default for ListenerTimeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(30),
            read: Duration::from_secs(60),
        }
    }
}

/// TCP listener for game-server control connections.
pub struct ControlListener {
    manager_port: u16,
    bus: Arc<EventBus>,
    registry: Arc<ConnectionRegistry>,
    timeouts: ListenerTimeouts,
}

impl ControlListener {
    pub fn new(manager_port: u16, bus: Arc<EventBus>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            manager_port,
            bus,
            registry,
            timeouts: ListenerTimeouts::default(),
        }
    }

    /// Override the protocol deadlines (integration tests).
    pub fn with_timeouts(mut self, timeouts: ListenerTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Bind and serve until `cancel` fires.
    ///
    /// The socket binds with reuse-address so a restart after a forced
    /// kill can take the port back without waiting out TIME_WAIT.
    /// Cancellation closes the listening socket; in-flight connection
    /// loops observe their next deadline and exit.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), NetError> {
        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, self.manager_port));

        let socket = TcpSocket::new_v4().map_err(NetError::Io)?;
        socket.set_reuseaddr(true).map_err(NetError::Io)?;
        socket
            .bind(addr)
            .map_err(|source| NetError::Bind { addr, source })?;
        let listener = socket
            .listen(1024)
            .map_err(|source| NetError::Bind { addr, source })?;

        info!(addr = %addr, "control listener started");

        loop {
            let accepted = tokio::select! {
                () = cancel.cancelled() => {
                    info!("control listener stopping");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "new game server connection");
                    let bus = Arc::clone(&self.bus);
                    let registry = Arc::clone(&self.registry);
                    let timeouts = self.timeouts;
                    let cancel = cancel.child_token();
                    tokio::spawn(async move {
                        handle_connection(stream, peer, bus, registry, timeouts, cancel).await;
                    });
                }
                Err(err) => {
                    if cancel.is_cancelled() {
                        return Ok(());
                    }
                    error!(error = %err, "failed to accept connection");
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    bus: Arc<EventBus>,
    registry: Arc<ConnectionRegistry>,
    timeouts: ListenerTimeouts,
    cancel: CancellationToken,
) {
    let (mut reader, writer) = stream.into_split();

    // One announce frame within the handshake deadline, or the socket is
    // dropped without ceremony.
    let port = match read_handshake(&mut reader, timeouts.handshake).await {
        Ok(port) => port,
        Err(reason) => {
            warn!(peer = %peer, reason, "dropping unidentified connection");
            return;
        }
    };

    let conn = Arc::new(Connection::new(writer, peer));
    conn.set_port(port);
    info!(port, peer = %peer, "game server identified, registering connection");
    registry.register(port, Arc::clone(&conn)).await;

    bus.emit(Event::from_packet(GamePacket::Announce { port }));

    read_loop(&mut reader, &conn, port, &bus, timeouts.read, &cancel).await;

    registry.unregister_exact(port, &conn).await;
}

async fn read_handshake(
    reader: &mut OwnedReadHalf,
    deadline: Duration,
) -> Result<u16, &'static str> {
    let frame = match timeout(deadline, read_frame(reader)).await {
        Ok(Ok(frame)) => frame,
        Ok(Err(_)) => return Err("handshake read failed"),
        Err(_) => return Err("handshake timed out"),
    };

    match GamePacket::parse(&frame) {
        Ok(GamePacket::Announce { port }) => Ok(port),
        Ok(_) => Err("expected server announce as first packet"),
        Err(_) => Err("handshake packet did not decode"),
    }
}

async fn read_loop(
    reader: &mut OwnedReadHalf,
    conn: &Arc<Connection>,
    port: u16,
    bus: &EventBus,
    read_timeout: Duration,
    cancel: &CancellationToken,
) {
    loop {
        if cancel.is_cancelled() || conn.is_closed() {
            debug!(port, "connection loop cancelled");
            return;
        }

        let frame = tokio::select! {
            () = cancel.cancelled() => return,
            read = timeout(read_timeout, read_frame(reader)) => match read {
                Ok(Ok(frame)) => frame,
                Ok(Err(DecodeError::Io(err))) => {
                    debug!(port, error = %err, "read error, closing connection");
                    return;
                }
                Ok(Err(err)) => {
                    // A malformed frame does not kill the connection; the
                    // stream is still in sync after the declared length.
                    warn!(port, error = %err, "discarding malformed frame");
                    continue;
                }
                Err(_) => {
                    warn!(port, timeout = ?read_timeout,
                        "connection idle past deadline, synthesizing close");
                    bus.emit(Event::synthesized_close(port));
                    return;
                }
            },
        };

        conn.touch();

        match GamePacket::parse(&frame) {
            Ok(packet) => bus.emit(Event::from_packet(packet)),
            Err(err) => warn!(port, error = %err, "failed to parse packet"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamekeeper_core::{EventPayload, EventType};
    use std::sync::Mutex;
    use tokio::io::AsyncWriteExt;

    fn recording_bus() -> (Arc<EventBus>, Arc<Mutex<Vec<Event>>>) {
        let bus = Arc::new(EventBus::new());
        let events: Arc<Mutex<Vec<Event>>> = Arc::default();
        for event_type in [
            EventType::ServerAnnounce,
            EventType::ServerClosed,
            EventType::ServerStatus,
            EventType::LongFrame,
        ] {
            let sink = Arc::clone(&events);
            bus.subscribe(event_type, "recorder", move |event| {
                let sink = Arc::clone(&sink);
                Box::pin(async move {
                    sink.lock().unwrap().push(event);
                    Ok(())
                })
            });
        }
        (bus, events)
    }

    async fn start_listener(
        timeouts: ListenerTimeouts,
    ) -> (
        u16,
        Arc<ConnectionRegistry>,
        Arc<Mutex<Vec<Event>>>,
        CancellationToken,
    ) {
        // Pick a free port by binding and releasing.
        let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let (bus, events) = recording_bus();
        let registry = Arc::new(ConnectionRegistry::new());
        let listener =
            ControlListener::new(port, bus, Arc::clone(&registry)).with_timeouts(timeouts);
        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = listener.run(run_cancel).await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        (port, registry, events, cancel)
    }

    async fn send_raw(stream: &mut TcpStream, payload: &[u8]) {
        let mut frame = (payload.len() as u16).to_le_bytes().to_vec();
        frame.extend_from_slice(payload);
        stream.write_all(&frame).await.unwrap();
    }

    #[tokio::test]
    async fn announce_registers_and_emits() {
        let (port, registry, events, cancel) = start_listener(ListenerTimeouts::default()).await;

        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        send_raw(&mut client, &[0x40, 0x2B, 0x2C]).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(registry.get(11307).await.is_some());
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::ServerAnnounce);
        assert_eq!(events[0].payload, EventPayload::Port(11307));
        cancel.cancel();
    }

    #[tokio::test]
    async fn non_announce_handshake_is_dropped() {
        let (port, registry, events, cancel) = start_listener(ListenerTimeouts::default()).await;

        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        // A status frame before any announce.
        send_raw(
            &mut client,
            &[0x42, 0x2B, 0x2C, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
        )
        .await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(registry.count().await, 0);
        assert!(events.lock().unwrap().is_empty());
        cancel.cancel();
    }

    #[tokio::test]
    async fn malformed_mid_stream_frame_does_not_kill_connection() {
        let (port, registry, events, cancel) = start_listener(ListenerTimeouts::default()).await;

        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        send_raw(&mut client, &[0x40, 0x2B, 0x2C]).await;
        // Unknown command, then a valid long frame.
        send_raw(&mut client, &[0x7F, 1, 2, 3]).await;
        send_raw(&mut client, &[0x43, 0x2B, 0x2C, 0xF4, 0x01, 0, 0]).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(registry.get(11307).await.is_some());
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, EventType::LongFrame);
        cancel.cancel();
    }

    #[tokio::test]
    async fn idle_timeout_synthesizes_close() {
        let timeouts = ListenerTimeouts {
            handshake: Duration::from_secs(5),
            read: Duration::from_millis(150),
        };
        let (port, _registry, events, cancel) = start_listener(timeouts).await;

        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        send_raw(&mut client, &[0x40, 0x2B, 0x2C]).await;
        tokio::time::sleep(Duration::from_millis(400)).await;

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, EventType::ServerClosed);
        assert_eq!(events[1].payload, EventPayload::Port(11307));
        cancel.cancel();
    }

    #[tokio::test]
    async fn cancellation_stops_accepting() {
        let (port, _registry, _events, cancel) = start_listener(ListenerTimeouts::default()).await;
        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }
}
