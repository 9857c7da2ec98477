//! UDP auto-ping responder.
//!
//! Game clients discover reachable servers by sending a single-byte probe
//! (magic `0xCA`) to a well-known UDP port. The responder answers with the
//! server name and version; anything without the magic byte is ignored.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use gamekeeper_proto::{build_autoping_response, packets::AUTOPING_MAGIC};

use crate::error::NetError;

/// Responds to auto-ping probes with the fleet's identity.
pub struct AutoPingResponder {
    port: u16,
    server_name: String,
    version: String,
}

impl AutoPingResponder {
    pub fn new(port: u16, server_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            port,
            server_name: server_name.into(),
            version: version.into(),
        }
    }

    /// The probe port for a fleet configuration: one below the first game
    /// port, shifted by the proxy offset when the front-proxy is enabled.
    pub fn probe_port(starting_game_port: u16, proxy_enabled: bool) -> u16 {
        let base = starting_game_port.saturating_sub(1);
        if proxy_enabled { base + 10_000 } else { base }
    }

    /// Bind and answer probes until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), NetError> {
        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.port));
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| NetError::Bind { addr, source })?;

        info!(port = self.port, "auto-ping responder started");

        let reply = build_autoping_response(&self.server_name, &self.version);
        let mut buf = [0u8; 1024];

        loop {
            let (len, remote) = tokio::select! {
                () = cancel.cancelled() => {
                    info!("auto-ping responder stopping");
                    return Ok(());
                }
                received = socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(err) => {
                        warn!(error = %err, "auto-ping read error");
                        continue;
                    }
                },
            };

            if len < 1 || buf[0] != AUTOPING_MAGIC {
                continue;
            }

            if let Err(err) = socket.send_to(&reply, remote).await {
                warn!(error = %err, remote = %remote, "failed to send auto-ping response");
            } else {
                trace!(remote = %remote, "responded to auto-ping probe");
            }
        }
    }
}
