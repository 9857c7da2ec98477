//! Process supervision and fleet orchestration.
//!
//! One [`Instance`] per configured game server owns its OS [`Process`] and
//! [`GameState`]; the [`Fleet`] routes control-channel events to instances,
//! coordinates batched startup and graceful shutdown, and the
//! [`HealthMonitor`] enforces the periodic invariants (stuck instances,
//! scheduled restarts, stale connections, disk headroom).

pub mod driver;
pub mod fleet;
pub mod health;
pub mod instance;
pub mod lag;
pub mod params;
pub mod process;
pub mod state;

pub use driver::NativeDriver;
pub use fleet::Fleet;
pub use health::HealthMonitor;
pub use instance::{Instance, InstanceInfo};
pub use lag::LagLedger;
pub use process::Process;
pub use state::{GameState, GameStateSnapshot, PlayerInfo, SkippedFrame};
