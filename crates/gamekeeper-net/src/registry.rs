//! Port-keyed registry of live control-channel connections.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::connection::Connection;

/// Live connections, at most one per game port.
///
/// Registering a second connection for a port closes and replaces the
/// first — a reconnecting game server always wins over its stale socket.
#[derive(Default)]
pub struct ConnectionRegistry {
    conns: RwLock<HashMap<u16, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection for `port`, closing any prior entry first.
    pub async fn register(&self, port: u16, conn: Arc<Connection>) {
        let previous = self.conns.write().await.insert(port, conn);
        if let Some(previous) = previous {
            warn!(port, "replacing existing connection for port");
            previous.close().await;
        }
        debug!(port, "connection registered");
    }

    /// Remove and close the entry for `port`, whatever connection holds it.
    pub async fn unregister(&self, port: u16) {
        let removed = self.conns.write().await.remove(&port);
        if let Some(conn) = removed {
            conn.close().await;
            debug!(port, "connection unregistered");
        }
    }

    /// Remove `conn` from the registry only if it is still the registered
    /// entry for `port`. A read loop exiting after its connection was
    /// evicted must not tear down the replacement.
    pub async fn unregister_exact(&self, port: u16, conn: &Arc<Connection>) {
        let mut conns = self.conns.write().await;
        if let Some(current) = conns.get(&port) {
            if Arc::ptr_eq(current, conn) {
                conns.remove(&port);
                debug!(port, "connection unregistered");
            }
        }
        drop(conns);
        conn.close().await;
    }

    /// Connection for one port, if any.
    pub async fn get(&self, port: u16) -> Option<Arc<Connection>> {
        self.conns.read().await.get(&port).cloned()
    }

    /// Point-in-time copy of the whole map.
    pub async fn all(&self) -> HashMap<u16, Arc<Connection>> {
        self.conns.read().await.clone()
    }

    pub async fn count(&self) -> usize {
        self.conns.read().await.len()
    }

    /// Send one frame to every registered connection. Send failures are
    /// logged per port and do not stop the sweep.
    pub async fn send_to_all(&self, payload: &[u8]) {
        let conns = self.conns.write().await;
        for (port, conn) in conns.iter() {
            if let Err(err) = conn.write_packet(payload).await {
                warn!(port, error = %err, "failed to send to server");
            }
        }
    }

    /// Close and remove connections idle for longer than `timeout`.
    /// Returns how many were removed.
    pub async fn clean_stale(&self, timeout: Duration) -> usize {
        let mut conns = self.conns.write().await;
        let stale: Vec<u16> = conns
            .iter()
            .filter(|(_, conn)| conn.last_activity().elapsed() > timeout)
            .map(|(&port, _)| port)
            .collect();

        for port in &stale {
            if let Some(conn) = conns.remove(port) {
                warn!(port, "cleaned stale connection");
                conn.close().await;
            }
        }
        stale.len()
    }

    /// Close every connection and empty the registry.
    pub async fn close_all(&self) {
        let mut conns = self.conns.write().await;
        for (_, conn) in conns.drain() {
            conn.close().await;
        }
        info!("all connections closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn make_conn() -> Arc<Connection> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        let (_read, write) = server.into_split();
        Arc::new(Connection::new(write, peer))
    }

    #[tokio::test]
    async fn register_then_unregister_leaves_registry_empty() {
        let registry = ConnectionRegistry::new();
        let conn = make_conn().await;

        registry.register(11235, conn).await;
        assert_eq!(registry.count().await, 1);

        registry.unregister(11235).await;
        assert_eq!(registry.count().await, 0);
        assert!(registry.get(11235).await.is_none());
    }

    #[tokio::test]
    async fn second_register_evicts_and_closes_the_first() {
        let registry = ConnectionRegistry::new();
        let first = make_conn().await;
        let second = make_conn().await;

        registry.register(11235, Arc::clone(&first)).await;
        registry.register(11235, Arc::clone(&second)).await;

        assert_eq!(registry.count().await, 1);
        assert!(first.is_closed());
        assert!(!second.is_closed());
        let current = registry.get(11235).await.unwrap();
        assert!(Arc::ptr_eq(&current, &second));
    }

    #[tokio::test]
    async fn unregister_exact_spares_a_replacement() {
        let registry = ConnectionRegistry::new();
        let old = make_conn().await;
        let new = make_conn().await;

        registry.register(11235, Arc::clone(&old)).await;
        registry.register(11235, Arc::clone(&new)).await;

        // The evicted connection's read loop winds down late.
        registry.unregister_exact(11235, &old).await;
        assert_eq!(registry.count().await, 1);
        assert!(registry.get(11235).await.is_some());
    }

    #[tokio::test]
    async fn clean_stale_removes_only_idle_connections() {
        let registry = ConnectionRegistry::new();
        let idle = make_conn().await;
        let busy = make_conn().await;

        registry.register(1, Arc::clone(&idle)).await;
        registry.register(2, Arc::clone(&busy)).await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        busy.touch();

        let cleaned = registry.clean_stale(Duration::from_millis(20)).await;
        assert_eq!(cleaned, 1);
        assert!(registry.get(1).await.is_none());
        assert!(registry.get(2).await.is_some());
    }

    #[tokio::test]
    async fn close_all_drains_the_registry() {
        let registry = ConnectionRegistry::new();
        let a = make_conn().await;
        let b = make_conn().await;
        registry.register(1, Arc::clone(&a)).await;
        registry.register(2, Arc::clone(&b)).await;

        registry.close_all().await;
        assert_eq!(registry.count().await, 0);
        assert!(a.is_closed());
        assert!(b.is_closed());
    }
}
