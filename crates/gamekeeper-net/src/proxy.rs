//! Per-instance TCP/UDP front-proxy.
//!
//! With `man_enableProxy` set, each game server registers its proxy ports
//! (game and voice, +10000) with the master service instead of its real
//! ports. Clients connect to the proxy; traffic is spliced to
//! `127.0.0.1:<real port>`. The real ports stay off the internet, which
//! blunts direct flood attacks, and cheap per-source rate limits drop the
//! rest.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::net::{TcpListener, TcpSocket, TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::NetError;

/// New TCP connections per second tolerated from one source address.
const MAX_TCP_CONN_PER_SEC: u32 = 10;
/// UDP datagrams per second tolerated from one source address.
const MAX_UDP_PKT_PER_SEC: u32 = 300;
/// Concurrent TCP connections tolerated per proxy port.
const MAX_CONCURRENT_CONN: i32 = 100;
/// Idle cutoff for UDP return-path sessions.
const UDP_SESSION_TIMEOUT: Duration = Duration::from_secs(60);

const UDP_BUF_SIZE: usize = 4096;

/// Ports for one proxy instance.
#[derive(Debug, Clone, Copy)]
pub struct GameProxyConfig {
    /// Local game server port (e.g. 11235).
    pub game_port: u16,
    /// Public-facing proxy port (game_port + 10000).
    pub proxy_port: u16,
    /// Local voice port.
    pub voice_local_port: u16,
    /// Public-facing voice proxy port (voice + 10000).
    pub voice_remote_port: u16,
    /// Owning instance ordinal, for logging.
    pub server_id: usize,
}

/// One instance's front-proxy: a TCP splice plus two UDP relays.
pub struct GameProxy {
    cfg: GameProxyConfig,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl GameProxy {
    pub fn new(cfg: GameProxyConfig) -> Self {
        Self {
            cfg,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn config(&self) -> GameProxyConfig {
        self.cfg
    }

    /// Bind all three listeners and start forwarding.
    ///
    /// Fails fast if any bind fails; the caller decides whether the game
    /// server starts anyway.
    pub async fn start(&self) -> Result<(), NetError> {
        let tcp = bind_tcp(self.cfg.proxy_port)?;
        let udp_game = bind_udp(self.cfg.proxy_port).await?;
        let udp_voice = bind_udp(self.cfg.voice_remote_port).await?;

        self.tracker.spawn(tcp_accept_loop(
            tcp,
            self.cfg.game_port,
            self.cancel.clone(),
        ));
        self.tracker.spawn(udp_relay_loop(
            udp_game,
            self.cfg.game_port,
            "game",
            self.cancel.clone(),
        ));
        self.tracker.spawn(udp_relay_loop(
            udp_voice,
            self.cfg.voice_local_port,
            "voice",
            self.cancel.clone(),
        ));

        info!(
            server_id = self.cfg.server_id,
            tcp_proxy = self.cfg.proxy_port,
            udp_proxy = self.cfg.proxy_port,
            voice_proxy = self.cfg.voice_remote_port,
            "game proxy started"
        );
        Ok(())
    }

    /// Whether the proxy has not been stopped.
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop all forwarding and wait for the loops to wind down.
    pub async fn stop(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        info!(server_id = self.cfg.server_id, "stopping game proxy");
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!(server_id = self.cfg.server_id, "game proxy stopped");
    }
}

fn bind_tcp(port: u16) -> Result<TcpListener, NetError> {
    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    let socket = TcpSocket::new_v4().map_err(NetError::Io)?;
    socket.set_reuseaddr(true).map_err(NetError::Io)?;
    socket
        .bind(addr)
        .map_err(|source| NetError::Bind { addr, source })?;
    socket
        .listen(1024)
        .map_err(|source| NetError::Bind { addr, source })
}

async fn bind_udp(port: u16) -> Result<UdpSocket, NetError> {
    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    UdpSocket::bind(addr)
        .await
        .map_err(|source| NetError::Bind { addr, source })
}

async fn tcp_accept_loop(listener: TcpListener, game_port: u16, cancel: CancellationToken) {
    let limiter = RateTracker::new(MAX_TCP_CONN_PER_SEC);
    let conn_count = Arc::new(AtomicI32::new(0));

    loop {
        let accepted = tokio::select! {
            () = cancel.cancelled() => return,
            accepted = listener.accept() => accepted,
        };

        let (client, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(err) => {
                debug!(error = %err, "tcp proxy accept error");
                continue;
            }
        };

        if !limiter.allow(peer.ip()) {
            warn!(src = %peer.ip(), "tcp rate limit exceeded, dropping connection");
            continue;
        }
        if conn_count.load(Ordering::SeqCst) >= MAX_CONCURRENT_CONN {
            warn!(src = %peer.ip(), "tcp max concurrent connections reached, dropping");
            continue;
        }

        conn_count.fetch_add(1, Ordering::SeqCst);
        let count = Arc::clone(&conn_count);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            splice_tcp(client, game_port, cancel).await;
            count.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

async fn splice_tcp(mut client: TcpStream, game_port: u16, cancel: CancellationToken) {
    let target = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, game_port));
    let mut server = match timeout(Duration::from_secs(5), TcpStream::connect(target)).await {
        Ok(Ok(server)) => server,
        Ok(Err(err)) => {
            debug!(error = %err, "failed to connect to game server");
            return;
        }
        Err(_) => {
            debug!(target = %target, "game server connect timed out");
            return;
        }
    };

    tokio::select! {
        () = cancel.cancelled() => {}
        _ = tokio::io::copy_bidirectional(&mut client, &mut server) => {}
    }
}

async fn udp_relay_loop(socket: UdpSocket, target_port: u16, label: &'static str, cancel: CancellationToken) {
    let socket = Arc::new(socket);
    let target = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, target_port));
    let limiter = RateTracker::new(MAX_UDP_PKT_PER_SEC);

    // One dedicated upstream socket per client, so return traffic finds
    // its way back to the right source address.
    let mut sessions: HashMap<SocketAddr, UdpSession> = HashMap::new();
    let mut buf = [0u8; UDP_BUF_SIZE];

    loop {
        let (len, client) = tokio::select! {
            () = cancel.cancelled() => return,
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(_) => continue,
            },
        };

        if !limiter.allow(client.ip()) {
            continue;
        }

        sessions.retain(|_, s| s.last_active.elapsed() <= UDP_SESSION_TIMEOUT);

        if !sessions.contains_key(&client) {
            let upstream = match UdpSocket::bind("127.0.0.1:0").await {
                Ok(upstream) => Arc::new(upstream),
                Err(err) => {
                    debug!(error = %err, label, "failed to open upstream udp socket");
                    continue;
                }
            };
            if upstream.connect(target).await.is_err() {
                continue;
            }

            spawn_return_path(
                Arc::clone(&upstream),
                Arc::clone(&socket),
                client,
                cancel.clone(),
            );

            sessions.insert(
                client,
                UdpSession {
                    upstream,
                    last_active: Instant::now(),
                },
            );
        }

        if let Some(session) = sessions.get_mut(&client) {
            session.last_active = Instant::now();
            let _ = session.upstream.send(&buf[..len]).await;
        }
    }
}

struct UdpSession {
    upstream: Arc<UdpSocket>,
    last_active: Instant,
}

fn spawn_return_path(
    upstream: Arc<UdpSocket>,
    listen: Arc<UdpSocket>,
    client: SocketAddr,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut buf = [0u8; UDP_BUF_SIZE];
        loop {
            let received = tokio::select! {
                () = cancel.cancelled() => return,
                received = timeout(UDP_SESSION_TIMEOUT, upstream.recv(&mut buf)) => received,
            };
            match received {
                Ok(Ok(len)) => {
                    let _ = listen.send_to(&buf[..len], client).await;
                }
                // Session idle or upstream gone.
                Ok(Err(_)) | Err(_) => return,
            }
        }
    });
}

/// Per-source counter over a rolling one-second window.
struct RateTracker {
    max_per_sec: u32,
    counts: Mutex<HashMap<IpAddr, (u32, Instant)>>,
}

impl RateTracker {
    fn new(max_per_sec: u32) -> Self {
        Self {
            max_per_sec,
            counts: Mutex::new(HashMap::new()),
        }
    }

    fn allow(&self, ip: IpAddr) -> bool {
        let mut counts = self.counts.lock().expect("rate tracker lock");
        let now = Instant::now();
        let entry = counts.entry(ip).or_insert((0, now));
        if now.duration_since(entry.1) >= Duration::from_secs(1) {
            *entry = (1, now);
            return true;
        }
        entry.0 += 1;
        entry.0 <= self.max_per_sec
    }
}
