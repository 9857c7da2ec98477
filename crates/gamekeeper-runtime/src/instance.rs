//! One supervised game server instance.
//!
//! An instance owns its OS [`Process`] and [`GameState`], reacts to
//! control-channel telemetry, and carries the per-instance policy:
//! enablement, CPU pinning, the periodic-restart window, and the optional
//! front-proxy that must be listening before the process registers with
//! the master service.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context as _;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use gamekeeper_core::{
    AdminNotice, ConfigHandle, Event, EventBus, EventPayload, EventType, GamePhase, GameStatus,
    ProcessDriver,
};
use gamekeeper_net::{GameProxy, GameProxyConfig};
use gamekeeper_proto::{LobbyCreated, LongFrame, PlayerConnection, StatusReport};

use crate::params::{self, LaunchIdentity, PROXY_PORT_OFFSET};
use crate::process::Process;
use crate::state::GameState;

/// Shortest interval between automatic restarts, in hours.
pub const RESTART_MIN_HOURS: i64 = 24;
/// Longest interval between automatic restarts, in hours.
pub const RESTART_MAX_HOURS: i64 = 48;
/// In-match lag events before an operator-visible warning is logged.
pub const LAG_WARNING_THRESHOLD: usize = 10;
/// In-match lag events before the admin notification fires.
pub const LAG_CRITICAL_THRESHOLD: usize = 30;
/// Pause between stop and start during a restart.
pub const RESTART_PAUSE: Duration = Duration::from_secs(2);

/// Sample the next scheduled restart, uniform inside the window.
fn sample_next_restart() -> DateTime<Utc> {
    let window_secs = (RESTART_MAX_HOURS - RESTART_MIN_HOURS) * 3600;
    let jitter = rand::thread_rng().gen_range(0..window_secs);
    Utc::now() + ChronoDuration::hours(RESTART_MIN_HOURS) + ChronoDuration::seconds(jitter)
}

/// One game server under supervision.
pub struct Instance {
    ordinal: usize,
    port: u16,
    config: Arc<ConfigHandle>,
    bus: Arc<EventBus>,
    cpu_affinity: Vec<usize>,

    enabled: AtomicBool,
    state: GameState,
    process: Process,
    proxy: tokio::sync::Mutex<Option<GameProxy>>,
    next_restart: std::sync::Mutex<DateTime<Utc>>,
}

impl Instance {
    pub fn new(
        config: Arc<ConfigHandle>,
        bus: Arc<EventBus>,
        driver: Arc<dyn ProcessDriver>,
        ordinal: usize,
        port: u16,
        cpu_affinity: Vec<usize>,
    ) -> Self {
        Self {
            ordinal,
            port,
            config,
            bus,
            cpu_affinity,
            enabled: AtomicBool::new(true),
            state: GameState::new(),
            process: Process::new(port, driver),
            proxy: tokio::sync::Mutex::new(None),
            next_restart: std::sync::Mutex::new(sample_next_restart()),
        }
    }

    /// 1-based stable ordinal.
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Display name: configured prefix plus ordinal.
    pub fn name(&self) -> String {
        format!("{} {}", self.config.hon_data().name, self.ordinal)
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn process(&self) -> &Process {
        &self.process
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        info!(port = self.port, "server enabled");
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        info!(port = self.port, "server disabled");
    }

    pub async fn is_running(&self) -> bool {
        self.process.is_running().await
    }

    /// Launch the game server process.
    ///
    /// With the proxy flag set, the proxy starts first so its listeners
    /// are ready by the time the process registers with the master
    /// service; a failed spawn tears the proxy back down.
    pub async fn start(&self) -> anyhow::Result<()> {
        if !self.is_enabled() {
            anyhow::bail!("server on port {} is disabled", self.port);
        }
        if self.process.is_running().await {
            anyhow::bail!("server on port {} is already running", self.port);
        }

        let hon = self.config.hon_data();
        if hon.enable_proxy {
            if let Err(err) = self.start_proxy().await {
                // Non-fatal: clients can still connect to the real ports.
                error!(port = self.port, error = %err,
                    "failed to start proxy, continuing without proxy");
            }
        }

        self.state.set_status(GameStatus::Starting);
        info!(port = self.port, ordinal = self.ordinal, "starting game server");

        let identity = LaunchIdentity {
            ordinal: self.ordinal,
            game_port: self.port,
            cpu_affinity: self.cpu_affinity.clone(),
        };
        let spec = params::build_spawn_spec(&hon, &identity);

        if let Err(err) = self.process.start(spec).await {
            self.state.set_status(GameStatus::Stopped);
            self.teardown_proxy().await;
            return Err(err).with_context(|| {
                format!("failed to start server on port {}", self.port)
            });
        }

        if !self.cpu_affinity.is_empty() {
            if let Err(err) = self.process.set_affinity(&self.cpu_affinity).await {
                warn!(port = self.port, cores = ?self.cpu_affinity, error = %err,
                    "failed to set cpu affinity");
            }
        }

        Ok(())
    }

    /// Stop the game server, falling back to a forced kill when the
    /// graceful path errors. Idempotent.
    pub async fn stop(&self) -> anyhow::Result<()> {
        info!(port = self.port, "stopping game server");
        self.state.set_status(GameStatus::Stopped);

        let result = match self.process.stop().await {
            Ok(()) => Ok(()),
            Err(err) => {
                error!(port = self.port, error = %err, "failed to stop gracefully, killing");
                self.process.kill().await.context("forced kill failed")
            }
        };

        self.teardown_proxy().await;
        result
    }

    /// Stop, reset state, resample the restart window, start again.
    pub async fn restart(&self) -> anyhow::Result<()> {
        if let Err(err) = self.stop().await {
            warn!(port = self.port, error = %err, "error during stop before restart");
        }

        tokio::time::sleep(RESTART_PAUSE).await;

        self.state.reset();
        *self.next_restart.lock().expect("restart lock") = sample_next_restart();

        self.start().await
    }

    /// Park the instance; it stops accepting matches until woken.
    pub fn sleep(&self) {
        self.state.set_status(GameStatus::Sleeping);
        info!(port = self.port, "server put to sleep");
    }

    /// Wake a sleeping instance back to ready.
    pub fn wake(&self) {
        if self.state.status() == GameStatus::Sleeping {
            self.state.set_status(GameStatus::Ready);
            info!(port = self.port, "server woken up");
        }
    }

    async fn start_proxy(&self) -> anyhow::Result<()> {
        let hon = self.config.hon_data();
        let voice_local = params::voice_port(&hon, self.port);

        let proxy = GameProxy::new(GameProxyConfig {
            game_port: self.port,
            proxy_port: self.port + PROXY_PORT_OFFSET,
            voice_local_port: voice_local,
            voice_remote_port: voice_local + PROXY_PORT_OFFSET,
            server_id: self.ordinal,
        });
        proxy.start().await?;

        info!(port = self.port, proxy_port = self.port + PROXY_PORT_OFFSET,
            voice_proxy_port = voice_local + PROXY_PORT_OFFSET, "proxy started");
        *self.proxy.lock().await = Some(proxy);
        Ok(())
    }

    async fn teardown_proxy(&self) {
        if let Some(proxy) = self.proxy.lock().await.take() {
            proxy.stop().await;
        }
    }

    /// Whether a proxy is currently running for this instance.
    pub async fn proxy_running(&self) -> bool {
        self.proxy.lock().await.as_ref().is_some_and(GameProxy::is_running)
    }

    // --- Telemetry handlers, driven by the orchestrator ---

    /// Fold a status frame (`0x42`) into the state machine.
    pub async fn handle_status_update(&self, report: &StatusReport) {
        let old_phase = self.state.phase();
        let new_phase = GamePhase::from_wire(report.phase);

        self.state.update_telemetry(
            report.uptime,
            report.cpu_usage,
            report.player_count,
            new_phase,
            report.match_id,
            report.player_pings.clone(),
        );

        if old_phase != new_phase {
            self.on_phase_transition(old_phase, new_phase).await;
        }

        // First telemetry after spawn: the server is up.
        if self.state.status() == GameStatus::Starting {
            self.state.set_status(GameStatus::Ready);
            info!(port = self.port, "server is now ready");
        }
    }

    /// Lobby created (`0x44`): the match is forming.
    pub fn handle_lobby_created(&self, lobby: &LobbyCreated) {
        self.state
            .set_match_info(lobby.match_id, &lobby.map_name, &lobby.mode);
        self.state.set_phase(GamePhase::InLobby);
        self.state.set_status(GameStatus::Occupied);

        info!(port = self.port, match_id = lobby.match_id, map = %lobby.map_name,
            mode = %lobby.mode, "lobby created");
    }

    /// Lobby closed (`0x45`): back to idle.
    pub fn handle_lobby_closed(&self) {
        self.state.set_phase(GamePhase::Idle);
        self.state.set_match_info(0, "", "");
        info!(port = self.port, "lobby closed");

        if self.state.status() == GameStatus::Occupied {
            self.state.set_status(GameStatus::Ready);
        }
    }

    /// Player connect/disconnect (`0x47`).
    pub fn handle_player_connection(&self, event: &PlayerConnection) {
        if event.connected {
            self.state.add_player(&event.player_name, event.player_id);
            info!(port = self.port, player = %event.player_name,
                player_id = event.player_id, "player connected");
        } else {
            self.state.remove_player(&event.player_name);
            info!(port = self.port, player = %event.player_name, "player disconnected");
        }
    }

    /// Lag event (`0x43`). Threshold triggers are strict equality so a
    /// growing counter alerts once, not on every further frame.
    pub fn handle_long_frame(&self, frame: &LongFrame) {
        let in_match = self.state.add_lag_event(frame.duration_ms);

        if in_match == LAG_WARNING_THRESHOLD {
            warn!(port = self.port, lag_events = in_match,
                duration_ms = frame.duration_ms, "lag warning threshold reached");
        }

        if in_match == LAG_CRITICAL_THRESHOLD {
            error!(port = self.port, lag_events = in_match,
                "lag critical threshold reached, notifying admin");
            self.bus.emit(Event::new(
                EventType::NotifyDiscordAdmin,
                Event::server_source(self.port),
                EventPayload::Notice(AdminNotice {
                    title: "Lag Alert".to_string(),
                    message: format!(
                        "Server on port {} has experienced {} lag events",
                        self.port, in_match
                    ),
                    level: "warning".to_string(),
                }),
            ));
        }
    }

    /// The process went away (socket closed or exit observed).
    pub fn handle_closed(&self) {
        self.state.set_status(GameStatus::Stopped);
        info!(port = self.port, "server closed");
    }

    async fn on_phase_transition(&self, old: GamePhase, new: GamePhase) {
        info!(port = self.port, from = %old, to = %new, "game phase transition");

        match new {
            GamePhase::MatchStarted => {
                // Real match underway: boost the process and zero the lag
                // budget for this match.
                if let Err(err) = self.process.set_priority(true).await {
                    debug!(port = self.port, error = %err, "failed to set high priority");
                }
                self.state.clear_lag_events();
            }
            GamePhase::GameEnded => {
                if let Err(err) = self.process.set_priority(false).await {
                    debug!(port = self.port, error = %err, "failed to restore priority");
                }
            }
            GamePhase::Idle => {
                if let Err(err) = self.process.set_priority(false).await {
                    debug!(port = self.port, error = %err, "failed to restore priority");
                }
                self.state.set_match_info(0, "", "");
                self.state.clear_lag_events();
            }
            _ => {}
        }
    }

    /// Due for the periodic restart: only when idle and past the sampled
    /// deadline.
    pub fn needs_restart(&self) -> bool {
        if self.state.phase() != GamePhase::Idle {
            return false;
        }
        Utc::now() >= *self.next_restart.lock().expect("restart lock")
    }

    pub fn next_restart_at(&self) -> DateTime<Utc> {
        *self.next_restart.lock().expect("restart lock")
    }

    pub(crate) fn set_next_restart_at(&self, at: DateTime<Utc>) {
        *self.next_restart.lock().expect("restart lock") = at;
    }

    /// Summary for management surfaces.
    pub async fn info(&self) -> InstanceInfo {
        InstanceInfo {
            id: self.ordinal,
            server_name: self.name(),
            port: self.port,
            enabled: self.is_enabled(),
            running: self.process.is_running().await,
            pid: self.process.pid().await,
            uptime_secs: self.process.uptime().await.as_secs(),
            state: self.state.snapshot(),
            next_restart: self.next_restart_at(),
        }
    }
}

/// JSON-friendly summary of one instance.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceInfo {
    pub id: usize,
    pub server_name: String,
    pub port: u16,
    pub enabled: bool,
    pub running: bool,
    pub pid: u32,
    pub uptime_secs: u64,
    pub state: crate::state::GameStateSnapshot,
    pub next_restart: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamekeeper_core::{Config, MockDriver};
    use std::collections::HashMap;

    fn test_instance() -> (Arc<MockDriver>, Arc<EventBus>, Instance) {
        let mut config = Config::default();
        config.hon_data.name = "Test".into();
        config.hon_data.install_directory = "/opt/hon".into();
        config.hon_data.login = "op".into();
        let config = Arc::new(ConfigHandle::from_config(config, "unused.json"));

        let bus = Arc::new(EventBus::new());
        let driver = Arc::new(MockDriver::new());
        let instance = Instance::new(
            Arc::clone(&config),
            Arc::clone(&bus),
            Arc::clone(&driver) as Arc<dyn ProcessDriver>,
            2,
            11236,
            vec![1],
        );
        (driver, bus, instance)
    }

    fn status_report(players: u8, phase: GamePhase) -> StatusReport {
        StatusReport {
            port: 11236,
            uptime: 60,
            cpu_usage: 0.25,
            player_count: players,
            phase: phase as u8,
            match_id: 0,
            player_pings: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn start_spawns_with_identity_args() {
        let (driver, _bus, instance) = test_instance();
        instance.start().await.unwrap();
        assert!(instance.is_running().await);
        assert_eq!(instance.state().status(), GameStatus::Starting);

        let (spec, _) = driver.spawned().pop().unwrap();
        assert_eq!(spec.port, 11236);
        let blob = spec.args.join(" ");
        assert!(blob.contains("Set svr_slave 2"));
        assert!(blob.contains("Set svr_port 11236"));
    }

    #[tokio::test]
    async fn disabled_instance_refuses_to_start() {
        let (_driver, _bus, instance) = test_instance();
        instance.disable();
        assert!(instance.start().await.is_err());
        assert!(!instance.is_running().await);
    }

    #[tokio::test]
    async fn spawn_failure_leaves_instance_stopped() {
        let (driver, _bus, instance) = test_instance();
        driver.fail_next_spawn();
        assert!(instance.start().await.is_err());
        assert_eq!(instance.state().status(), GameStatus::Stopped);
        assert!(!instance.is_running().await);
    }

    #[tokio::test]
    async fn first_status_frame_promotes_starting_to_ready() {
        let (_driver, _bus, instance) = test_instance();
        instance.start().await.unwrap();
        instance
            .handle_status_update(&status_report(0, GamePhase::Idle))
            .await;
        assert_eq!(instance.state().status(), GameStatus::Ready);
        assert_eq!(instance.state().uptime(), 60);
    }

    #[tokio::test]
    async fn player_count_drives_occupancy() {
        let (_driver, _bus, instance) = test_instance();
        instance.start().await.unwrap();
        instance
            .handle_status_update(&status_report(0, GamePhase::Idle))
            .await;

        instance
            .handle_status_update(&status_report(1, GamePhase::InLobby))
            .await;
        assert_eq!(instance.state().status(), GameStatus::Occupied);

        instance
            .handle_status_update(&status_report(0, GamePhase::Idle))
            .await;
        assert_eq!(instance.state().status(), GameStatus::Ready);
    }

    #[tokio::test]
    async fn match_start_clears_lag_budget() {
        let (_driver, _bus, instance) = test_instance();
        instance.start().await.unwrap();
        instance
            .handle_status_update(&status_report(0, GamePhase::Idle))
            .await;

        instance.handle_long_frame(&LongFrame {
            port: 11236,
            duration_ms: 400,
        });
        assert_eq!(instance.state().lag_events().len(), 1);

        instance
            .handle_status_update(&status_report(10, GamePhase::MatchStarted))
            .await;
        assert!(instance.state().lag_events().is_empty());
    }

    #[tokio::test]
    async fn lag_critical_threshold_notifies_admin_exactly_once() {
        let (_driver, bus, instance) = test_instance();
        let notices = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&notices);
        bus.subscribe(EventType::NotifyDiscordAdmin, "recorder", move |event| {
            let sink = Arc::clone(&sink);
            Box::pin(async move {
                sink.lock().unwrap().push(event);
                Ok(())
            })
        });

        let frame = LongFrame {
            port: 11236,
            duration_ms: 500,
        };
        for _ in 0..10 {
            instance.handle_long_frame(&frame);
        }
        // Warning threshold only: nothing emitted yet.
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert!(notices.lock().unwrap().is_empty());

        for _ in 0..25 {
            instance.handle_long_frame(&frame);
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let notices = notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        let EventPayload::Notice(notice) = &notices[0].payload else {
            panic!("expected notice payload");
        };
        assert_eq!(notice.level, "warning");
        assert!(notice.message.contains("11236"));
        assert!(notice.message.contains("30"));
    }

    #[tokio::test]
    async fn needs_restart_requires_idle_phase_and_due_time() {
        let (_driver, _bus, instance) = test_instance();

        instance.set_next_restart_at(Utc::now() - ChronoDuration::seconds(1));
        assert!(instance.needs_restart());

        instance.state().set_phase(GamePhase::MatchStarted);
        assert!(!instance.needs_restart());

        instance.state().set_phase(GamePhase::Idle);
        instance.set_next_restart_at(Utc::now() + ChronoDuration::hours(1));
        assert!(!instance.needs_restart());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_resamples_window_and_resets_state() {
        let (driver, _bus, instance) = test_instance();
        instance.start().await.unwrap();
        instance.state().add_lag_event(500);
        instance.set_next_restart_at(Utc::now() - ChronoDuration::seconds(1));

        instance.restart().await.unwrap();

        assert!(instance.is_running().await);
        assert_eq!(instance.state().total_lag_events(), 0);
        let due = instance.next_restart_at() - Utc::now();
        assert!(due >= ChronoDuration::hours(23));
        assert!(due <= ChronoDuration::hours(48));
        assert_eq!(driver.spawned().len(), 2);
    }

    #[tokio::test]
    async fn sleep_and_wake_cycle() {
        let (_driver, _bus, instance) = test_instance();
        instance.sleep();
        assert_eq!(instance.state().status(), GameStatus::Sleeping);
        instance.wake();
        assert_eq!(instance.state().status(), GameStatus::Ready);

        // Waking a non-sleeping server is a no-op.
        instance.state().set_status(GameStatus::Occupied);
        instance.wake();
        assert_eq!(instance.state().status(), GameStatus::Occupied);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_reports_info() {
        let (_driver, _bus, instance) = test_instance();
        instance.start().await.unwrap();
        instance.stop().await.unwrap();
        instance.stop().await.unwrap();

        let info = instance.info().await;
        assert_eq!(info.id, 2);
        assert_eq!(info.server_name, "Test 2");
        assert!(!info.running);
        assert_eq!(info.state.status, GameStatus::Stopped);
    }
}
