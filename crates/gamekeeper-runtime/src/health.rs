//! Periodic health checks.
//!
//! Each enabled check runs on its own configured interval: the general
//! sweep (stuck instances, scheduled restarts, stale connections), disk
//! utilization with an escalating alert ladder, fleet lag review, and the
//! telemetry heartbeat. A zero interval disables a check.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use gamekeeper_core::{
    AdminNotice, ConfigHandle, Event, EventBus, EventPayload, EventType, FleetHeartbeat,
    GameStatus,
};

use crate::fleet::Fleet;
use crate::lag::LagLedger;

/// An instance stuck in `starting` longer than this gets restarted.
pub const STUCK_STARTING_SECS: i64 = 120;

/// Connections idle longer than this are swept from the registry.
pub const STALE_CONNECTION_AFTER: Duration = Duration::from_secs(120);

/// Runs the periodic invariants for the whole fleet.
pub struct HealthMonitor {
    config: Arc<ConfigHandle>,
    bus: Arc<EventBus>,
    fleet: Arc<Fleet>,
    lag: Arc<LagLedger>,
}

impl HealthMonitor {
    pub fn new(
        config: Arc<ConfigHandle>,
        bus: Arc<EventBus>,
        fleet: Arc<Fleet>,
        lag: Arc<LagLedger>,
    ) -> Self {
        Self {
            config,
            bus,
            fleet,
            lag,
        }
    }

    /// Launch every enabled check loop and block until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let timers = self.config.app_data().timers;
        let tracker = TaskTracker::new();

        self.spawn_check(&tracker, &cancel, "general_health", timers.general_health, |monitor| async move {
            monitor.general_health_tick().await;
        });
        self.spawn_check(&tracker, &cancel, "disk_utilization", timers.disk_check, |monitor| async move {
            monitor.disk_tick();
        });
        self.spawn_check(&tracker, &cancel, "lag_health", timers.lag_check, |monitor| async move {
            monitor.lag_tick();
        });
        self.spawn_check(&tracker, &cancel, "heartbeat", timers.heartbeat, |monitor| async move {
            monitor.heartbeat_tick().await;
        });

        info!("health check manager started");
        tracker.close();
        cancel.cancelled().await;
        tracker.wait().await;
        info!("health check manager stopped");
    }

    fn spawn_check<F, Fut>(
        self: &Arc<Self>,
        tracker: &TaskTracker,
        cancel: &CancellationToken,
        name: &'static str,
        interval_secs: u64,
        tick: F,
    ) where
        F: Fn(Arc<Self>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        if interval_secs == 0 {
            debug!(check = name, "health check disabled");
            return;
        }

        let monitor = Arc::clone(self);
        let cancel = cancel.clone();
        tracker.spawn(async move {
            let mut ticker = interval(Duration::from_secs(interval_secs));
            // Run immediately on startup, then on the interval.
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        debug!(check = name, "running health check");
                        tick(Arc::clone(&monitor)).await;
                    }
                }
            }
        });
    }

    /// One pass of the general sweep: restart instances stuck in
    /// `starting`, fire scheduled restarts, drop stale connections.
    pub async fn general_health_tick(&self) {
        for instance in self.fleet.instances().await {
            let port = instance.port();
            if !instance.is_running().await {
                continue;
            }

            let state = instance.state();
            if state.status() == GameStatus::Starting
                && Utc::now() - state.status_changed_at()
                    > ChronoDuration::seconds(STUCK_STARTING_SECS)
            {
                warn!(port, "server stuck in starting state, restarting");
                restart_detached(&instance);
                continue;
            }

            if instance.needs_restart() {
                info!(port, "scheduled periodic restart");
                restart_detached(&instance);
            }
        }

        let cleaned = self
            .fleet
            .registry()
            .clean_stale(STALE_CONNECTION_AFTER)
            .await;
        if cleaned > 0 {
            info!(cleaned, "cleaned stale connections");
        }
    }

    /// Disk headroom for the install volume, with the 80/90/95/100%
    /// alert ladder.
    pub fn disk_tick(&self) {
        let hon = self.config.hon_data();
        let path = if hon.install_directory.is_empty() {
            "/".to_string()
        } else {
            hon.install_directory
        };

        let usage = match disk_usage(&path) {
            Ok(usage) => usage,
            Err(err) => {
                warn!(path = %path, error = %err, "disk utilization check failed");
                return;
            }
        };

        debug!(used_percent = usage.used_percent, free_gb = usage.free_gb, "disk utilization");

        let level = match usage.used_percent {
            p if p >= 100.0 => "critical",
            p if p >= 95.0 => "error",
            p if p >= 90.0 => "warning",
            p if p >= 80.0 => "info",
            _ => return,
        };

        let message = format!(
            "Disk usage at {:.1}% ({} GB free of {} GB total)",
            usage.used_percent, usage.free_gb, usage.total_gb
        );
        warn!(level, "{message}");

        if self.config.app_data().discord.notify_on_disk {
            self.bus.emit(Event::new(
                EventType::NotifyDiscordAdmin,
                "health_check",
                EventPayload::Notice(AdminNotice {
                    title: "Disk Space Alert".to_string(),
                    message,
                    level: level.to_string(),
                }),
            ));
        }
    }

    /// Review the fleet-wide lag ledger and surface hot ports.
    pub fn lag_tick(&self) {
        for alert in self.lag.check_thresholds() {
            warn!(port = alert.port, level = alert.level,
                events_this_hour = alert.events_this_hour, "lag threshold alert");

            if alert.level == "critical" {
                self.bus.emit(Event::new(
                    EventType::NotifyDiscordAdmin,
                    format!("lag_monitor:{}", alert.port),
                    EventPayload::Notice(AdminNotice {
                        title: "Lag Alert - Critical".to_string(),
                        message: format!(
                            "Server on port {}: {} lag events in the last hour",
                            alert.port, alert.events_this_hour
                        ),
                        level: "error".to_string(),
                    }),
                ));
            }
        }
    }

    /// Publish the telemetry heartbeat for whatever sink is listening.
    pub async fn heartbeat_tick(&self) {
        self.bus.emit(Event::new(
            EventType::NotifyMqtt,
            "heartbeat",
            EventPayload::Heartbeat(FleetHeartbeat {
                total_servers: self.fleet.total_servers().await,
                running: self.fleet.running_count().await,
                occupied: self.fleet.occupied_count().await,
                timestamp: Utc::now().timestamp(),
            }),
        ));
    }
}

fn restart_detached(instance: &Arc<crate::instance::Instance>) {
    let instance = Arc::clone(instance);
    tokio::spawn(async move {
        if let Err(err) = instance.restart().await {
            error!(port = instance.port(), error = %err, "health restart failed");
        }
    });
}

/// Disk usage for the filesystem holding `path`.
struct DiskUsage {
    used_percent: f64,
    free_gb: u64,
    total_gb: u64,
}

#[cfg(unix)]
fn disk_usage(path: &str) -> std::io::Result<DiskUsage> {
    let stat = nix::sys::statvfs::statvfs(path).map_err(std::io::Error::other)?;

    let frsize = stat.fragment_size() as u64;
    let total = stat.blocks() as u64 * frsize;
    let available = stat.blocks_available() as u64 * frsize;
    if total == 0 {
        return Err(std::io::Error::other("filesystem reports zero blocks"));
    }

    const GB: u64 = 1024 * 1024 * 1024;
    Ok(DiskUsage {
        used_percent: 100.0 * (1.0 - available as f64 / total as f64),
        free_gb: available / GB,
        total_gb: total / GB,
    })
}

#[cfg(not(unix))]
fn disk_usage(_path: &str) -> std::io::Result<DiskUsage> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "disk probing not supported on this platform",
    ))
}
