//! Network plumbing for the fleet manager: the loopback control listener
//! every game server dials back into, the port-keyed connection registry,
//! the UDP auto-ping responder, and the optional TCP/UDP front-proxy.

pub mod autoping;
pub mod connection;
pub mod error;
pub mod listener;
pub mod proxy;
pub mod registry;

pub use autoping::AutoPingResponder;
pub use connection::Connection;
pub use error::NetError;
pub use listener::{ControlListener, ListenerTimeouts};
pub use proxy::{GameProxy, GameProxyConfig};
pub use registry::ConnectionRegistry;
