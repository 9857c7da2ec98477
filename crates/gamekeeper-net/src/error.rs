//! Error type for listeners and proxies.

use std::net::SocketAddr;

use thiserror::Error;

/// Errors from binding or running a network component.
#[derive(Debug, Error)]
pub enum NetError {
    /// Binding a listening socket failed. Retryable: the usual cause is a
    /// previous process still holding the port.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
