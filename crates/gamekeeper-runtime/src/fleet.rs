//! Fleet orchestrator.
//!
//! Owns the collection of instances, mediates every operator request,
//! coordinates batched startup and graceful shutdown, and routes every
//! control-channel event to the addressed instance. Constructed once per
//! hosting process and threaded into each collaborator; there is no
//! module-level global.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use gamekeeper_core::config::DEFAULT_CONFIG_DIR;
use gamekeeper_core::pinfile::{self, PIN_FILE_NAME};
use gamekeeper_core::{
    ConfigHandle, Event, EventBus, EventPayload, EventType, GameStatus, ProcessDriver,
    ReplayState,
};
use gamekeeper_net::ConnectionRegistry;

use crate::instance::{Instance, InstanceInfo};

/// Upper bound on stopping the whole fleet.
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// How long one startup batch may take to become ready before the next
/// batch proceeds anyway.
pub const BATCH_READY_TIMEOUT: Duration = Duration::from_secs(120);

/// Poll interval while waiting on a startup batch.
pub const BATCH_READY_POLL: Duration = Duration::from_secs(3);

/// Settle time after reaping orphans, so the OS releases their ports.
const ORPHAN_SETTLE: Duration = Duration::from_secs(3);

/// The central orchestrator for all game server instances.
pub struct Fleet {
    config: Arc<ConfigHandle>,
    bus: Arc<EventBus>,
    driver: Arc<dyn ProcessDriver>,
    servers: RwLock<HashMap<u16, Arc<Instance>>>,
    registry: Arc<ConnectionRegistry>,

    batch_size: usize,
    batch_timeout: Duration,
    batch_poll: Duration,
    pin_path: PathBuf,
}

impl Fleet {
    /// Build the fleet from configuration and wire its event handlers.
    pub fn new(
        config: Arc<ConfigHandle>,
        bus: Arc<EventBus>,
        driver: Arc<dyn ProcessDriver>,
    ) -> Arc<Self> {
        Self::with_timing(config, bus, driver, BATCH_READY_TIMEOUT, BATCH_READY_POLL)
    }

    /// Like [`new`](Fleet::new) with custom batch timing (tests).
    pub fn with_timing(
        config: Arc<ConfigHandle>,
        bus: Arc<EventBus>,
        driver: Arc<dyn ProcessDriver>,
        batch_timeout: Duration,
        batch_poll: Duration,
    ) -> Arc<Self> {
        let hon = config.hon_data();
        let batch_size = if hon.max_concurrent_starts == 0 {
            5
        } else {
            hon.max_concurrent_starts
        };

        info!(max_concurrent_starts = batch_size, "server startup concurrency configured");
        info!(total = hon.total_servers, start_port = hon.starting_game_port,
            "initializing server instances");

        let mut servers = HashMap::new();
        for index in 0..hon.total_servers {
            let ordinal = index + 1;
            let port = hon.starting_game_port + index as u16;
            let affinity = cpu_affinity_for(index, hon.servers_per_core);

            let instance = Arc::new(Instance::new(
                Arc::clone(&config),
                Arc::clone(&bus),
                Arc::clone(&driver),
                ordinal,
                port,
                affinity.clone(),
            ));
            servers.insert(port, instance);
            debug!(ordinal, port, affinity = ?affinity, "server instance created");
        }

        let pin_path = config
            .path()
            .parent()
            .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR), std::path::Path::to_path_buf)
            .join(PIN_FILE_NAME);

        let fleet = Arc::new(Self {
            config,
            bus,
            driver,
            servers: RwLock::new(servers),
            registry: Arc::new(ConnectionRegistry::new()),
            batch_size,
            batch_timeout,
            batch_poll,
            pin_path,
        });

        fleet.subscribe_events();
        fleet
    }

    /// Registry of live control-channel connections; shared with the
    /// listener.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Instance addressed by game port.
    pub async fn get(&self, port: u16) -> Option<Arc<Instance>> {
        self.servers.read().await.get(&port).cloned()
    }

    /// All instances, unsorted.
    pub async fn instances(&self) -> Vec<Arc<Instance>> {
        self.servers.read().await.values().cloned().collect()
    }

    pub async fn total_servers(&self) -> usize {
        self.servers.read().await.len()
    }

    pub async fn running_count(&self) -> usize {
        let instances = self.instances().await;
        let mut count = 0;
        for instance in instances {
            if instance.is_running().await {
                count += 1;
            }
        }
        count
    }

    pub async fn occupied_count(&self) -> usize {
        self.instances()
            .await
            .iter()
            .filter(|i| i.state().status() == GameStatus::Occupied)
            .count()
    }

    /// Per-instance summaries sorted by ordinal, for management surfaces.
    pub async fn all_info(&self) -> Vec<InstanceInfo> {
        let mut infos = Vec::new();
        for instance in self.instances().await {
            infos.push(instance.info().await);
        }
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Launch every instance in port-sorted batches.
    ///
    /// Each batch spawns concurrently; before the next batch begins, this
    /// waits until every instance in the batch has reached a
    /// terminal-for-startup state or the batch deadline passes. Asset
    /// load at process start is heavy — batching bounds the thrash while
    /// still parallelising within a batch.
    pub async fn start_all(&self) -> anyhow::Result<()> {
        let mut servers = self.instances().await;
        servers.sort_by_key(|instance| instance.port());

        let total = servers.len();
        info!(count = total, batch_size = self.batch_size, "starting all game servers");

        let mut total_success = 0usize;
        let mut total_fail = 0usize;

        let batches: Vec<_> = servers.chunks(self.batch_size).collect();
        let batch_count = batches.len();

        for (batch_index, batch) in batches.iter().enumerate() {
            let batch_num = batch_index + 1;
            info!(batch = batch_num, servers = batch.len(), "starting batch");

            let results = join_all(batch.iter().map(|instance| {
                let instance = Arc::clone(instance);
                async move {
                    let port = instance.port();
                    match instance.start().await {
                        Ok(()) => true,
                        Err(err) => {
                            warn!(port, error = %err, "failed to start server");
                            false
                        }
                    }
                }
            }))
            .await;

            let batch_success = results.iter().filter(|ok| **ok).count();
            let batch_fail = results.len() - batch_success;
            total_success += batch_success;
            total_fail += batch_fail;

            info!(batch = batch_num, success = batch_success, failed = batch_fail,
                "batch processes spawned");

            if batch_num < batch_count && batch_success > 0 {
                self.wait_for_batch_ready(batch).await;
            }
        }

        info!(success = total_success, failed = total_fail, total,
            "game server startup complete");

        if total_fail > 0 && total_success == 0 {
            anyhow::bail!("all {total_fail} servers failed to start");
        }

        self.save_pin_file().await;
        Ok(())
    }

    /// Block until every instance in `batch` reports a terminal-for-
    /// startup status, or the batch deadline passes.
    async fn wait_for_batch_ready(&self, batch: &[Arc<Instance>]) {
        info!(count = batch.len(), "waiting for batch to become ready");

        let wait = async {
            loop {
                sleep(self.batch_poll).await;
                let ready = batch
                    .iter()
                    .filter(|instance| {
                        matches!(
                            instance.state().status(),
                            GameStatus::Ready
                                | GameStatus::Occupied
                                | GameStatus::Sleeping
                                | GameStatus::Stopped
                        )
                    })
                    .count();
                if ready >= batch.len() {
                    info!(ready, "all servers in batch are ready, proceeding");
                    return;
                }
                debug!(ready, total = batch.len(), "waiting for batch servers");
            }
        };

        if timeout(self.batch_timeout, wait).await.is_err() {
            warn!("batch ready timeout reached, proceeding with next batch");
        }
    }

    /// Stop every instance concurrently and close all connections.
    pub async fn stop_all(&self) {
        info!("stopping all game servers");

        let servers = self.instances().await;
        join_all(servers.iter().map(|instance| {
            let instance = Arc::clone(instance);
            async move {
                if let Err(err) = instance.stop().await {
                    error!(port = instance.port(), error = %err, "failed to stop server");
                }
            }
        }))
        .await;

        self.registry.close_all().await;
        info!("all game servers stopped");
    }

    /// Full fleet shutdown with the overall deadline: stop everything,
    /// then delete the pin-file. On expiry, log and move on — exiting
    /// beats hanging.
    pub async fn shutdown(&self) {
        if timeout(SHUTDOWN_DEADLINE, self.stop_all()).await.is_err() {
            warn!(deadline = ?SHUTDOWN_DEADLINE, "fleet shutdown deadline exceeded");
        }
        pinfile::remove_pin_file(&self.pin_path);
    }

    /// Reap game servers left over from a previous manager run, then give
    /// the OS a moment to release their ports.
    pub async fn cleanup_leftover_servers(&self) {
        let pids = pinfile::read_pin_file(&self.pin_path);
        if pids.is_empty() {
            return;
        }

        let mut killed = 0usize;
        for pid in pids {
            match self.driver.kill_orphan(pid).await {
                Ok(()) => killed += 1,
                Err(err) => debug!(pid, error = %err, "orphan kill failed"),
            }
        }

        if killed > 0 {
            info!(count = killed, "cleaned up leftover game server processes");
            sleep(ORPHAN_SETTLE).await;
        }
        pinfile::remove_pin_file(&self.pin_path);
    }

    /// Record the current fleet pids for the next run's orphan sweep.
    pub async fn save_pin_file(&self) {
        let mut pids = Vec::new();
        for instance in self.instances().await {
            if instance.is_running().await {
                pids.push(instance.process().pid().await);
            }
        }
        if let Err(err) = pinfile::write_pin_file(&self.pin_path, &pids) {
            warn!(error = %err, "failed to write pin-file");
        }
    }

    /// Grow the fleet by `count` instances on the next free ports and
    /// start them in the background. The new total is persisted so it
    /// survives a manager restart.
    pub async fn add_servers(self: &Arc<Self>, count: usize) -> anyhow::Result<()> {
        let hon = self.config.hon_data();
        let mut servers = self.servers.write().await;

        let next_port = servers
            .keys()
            .max()
            .map_or(hon.starting_game_port, |max| max + 1);
        let base_index = servers.len();

        for offset in 0..count {
            let index = base_index + offset;
            let ordinal = index + 1;
            let port = next_port + offset as u16;
            let affinity = cpu_affinity_for(index, hon.servers_per_core);

            let instance = Arc::new(Instance::new(
                Arc::clone(&self.config),
                Arc::clone(&self.bus),
                Arc::clone(&self.driver),
                ordinal,
                port,
                affinity,
            ));
            servers.insert(port, instance.clone());

            tokio::spawn(async move {
                if let Err(err) = instance.start().await {
                    error!(port = instance.port(), error = %err, "failed to start new server");
                }
            });
        }

        let new_total = servers.len();
        drop(servers);

        self.persist_total(new_total);
        info!(count, "added new servers");
        Ok(())
    }

    /// Stop and remove instances by port, persisting the shrunk total.
    pub async fn remove_servers(&self, ports: &[u16]) -> anyhow::Result<()> {
        let mut removed = Vec::new();
        {
            let mut servers = self.servers.write().await;
            for port in ports {
                if let Some(instance) = servers.remove(port) {
                    removed.push(instance);
                }
            }
        }

        for instance in &removed {
            if let Err(err) = instance.stop().await {
                warn!(port = instance.port(), error = %err, "error stopping removed server");
            }
            info!(port = instance.port(), "server removed from pool");
        }

        let new_total = self.total_servers().await;
        self.persist_total(new_total);
        Ok(())
    }

    fn persist_total(&self, total: usize) {
        let mut hon = self.config.hon_data();
        hon.total_servers = total;
        self.config.set_hon_data(hon);
        if let Err(err) = self.config.save() {
            warn!(error = %err, "failed to save config after membership change");
        }
    }

    // --- Event routing ---

    fn subscribe_events(self: &Arc<Self>) {
        self.on(EventType::ServerAnnounce, "fleet.server_announce", |fleet, event| async move {
            let Some(port) = event.payload.port() else {
                warn!("server announce without port payload");
                return Ok(());
            };
            if let Some(instance) = fleet.get(port).await {
                instance.state().set_status(GameStatus::Ready);
                info!(port, "server announced and registered");
            }
            Ok(())
        });

        self.on(EventType::ServerClosed, "fleet.server_closed", |fleet, event| async move {
            if let Some(port) = event.payload.port() {
                if let Some(instance) = fleet.get(port).await {
                    instance.handle_closed();
                }
            }
            Ok(())
        });

        self.on(EventType::ServerStatus, "fleet.server_status", |fleet, event| async move {
            let EventPayload::Status(report) = &event.payload else {
                return Ok(());
            };
            if let Some(instance) = fleet.get(report.port).await {
                instance.handle_status_update(report).await;
            }
            Ok(())
        });

        self.on(EventType::LobbyCreated, "fleet.lobby_created", |fleet, event| async move {
            let EventPayload::LobbyCreated(lobby) = &event.payload else {
                return Ok(());
            };
            if let Some(instance) = fleet.get(lobby.port).await {
                instance.handle_lobby_created(lobby);
            }
            Ok(())
        });

        self.on(EventType::LobbyClosed, "fleet.lobby_closed", |fleet, event| async move {
            if let Some(port) = event.payload.port() {
                if let Some(instance) = fleet.get(port).await {
                    instance.handle_lobby_closed();
                }
            }
            Ok(())
        });

        self.on(
            EventType::PlayerConnection,
            "fleet.player_connection",
            |fleet, event| async move {
                let EventPayload::PlayerConnection(connection) = &event.payload else {
                    return Ok(());
                };
                if let Some(instance) = fleet.get(connection.port).await {
                    instance.handle_player_connection(connection);
                }
                Ok(())
            },
        );

        self.on(EventType::LongFrame, "fleet.long_frame", |fleet, event| async move {
            let EventPayload::LongFrame(frame) = &event.payload else {
                return Ok(());
            };
            if let Some(instance) = fleet.get(frame.port).await {
                instance.handle_long_frame(frame);
            }
            Ok(())
        });

        self.on(EventType::ReplayStatus, "fleet.replay_status", |_fleet, event| async move {
            if let EventPayload::ReplayStatus(update) = &event.payload {
                debug!(port = update.port, match_id = update.match_id,
                    status = %ReplayState::from_wire(update.status), "replay status update");
            }
            Ok(())
        });

        self.on(EventType::ForkResponse, "fleet.fork_response", |_fleet, event| async move {
            if let EventPayload::ForkResponse(fork) = &event.payload {
                info!(port = fork.port, success = fork.success, pid = fork.pid,
                    "fork response");
            }
            Ok(())
        });

        self.on(EventType::ShutdownServer, "fleet.cmd_shutdown", |fleet, event| async move {
            let Some(port) = event.payload.port() else {
                return Ok(());
            };
            match fleet.get(port).await {
                Some(instance) => instance.stop().await,
                None => anyhow::bail!("server not found on port {port}"),
            }
        });

        self.on(EventType::WakeServer, "fleet.cmd_wake", |fleet, event| async move {
            if let Some(port) = event.payload.port() {
                if let Some(instance) = fleet.get(port).await {
                    instance.wake();
                }
            }
            Ok(())
        });

        self.on(EventType::SleepServer, "fleet.cmd_sleep", |fleet, event| async move {
            if let Some(port) = event.payload.port() {
                if let Some(instance) = fleet.get(port).await {
                    instance.sleep();
                }
            }
            Ok(())
        });

        self.on(EventType::MessageServer, "fleet.cmd_message", |fleet, event| async move {
            let EventPayload::Command(command) = &event.payload else {
                return Ok(());
            };
            let Some(conn) = fleet.registry.get(command.port).await else {
                anyhow::bail!("no connection for port {}", command.port);
            };
            if let Some(message) = command.args.first() {
                conn.send_message(message).await?;
            }
            Ok(())
        });

        self.on(EventType::CommandServer, "fleet.cmd_command", |fleet, event| async move {
            let EventPayload::Command(command) = &event.payload else {
                return Ok(());
            };
            let Some(conn) = fleet.registry.get(command.port).await else {
                anyhow::bail!("no connection for port {}", command.port);
            };
            conn.send_command(&command.command).await?;
            Ok(())
        });

        self.on(EventType::ConfigChanged, "fleet.config_changed", |_fleet, event| async move {
            if let EventPayload::ConfigKey { section, key } = &event.payload {
                info!(section = %section, key = %key, "configuration changed");
            }
            Ok(())
        });

        self.on(EventType::Shutdown, "fleet.shutdown", |fleet, _event| async move {
            info!("shutdown event received, stopping all servers");
            fleet.stop_all().await;
            Ok(())
        });

        debug!("fleet event subscriptions registered");
    }

    /// Subscribe a fleet handler under `name`.
    fn on<F, Fut>(self: &Arc<Self>, event_type: EventType, name: &str, handler: F)
    where
        F: Fn(Arc<Fleet>, Event) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let fleet = Arc::clone(self);
        self.bus.subscribe(event_type, name, move |event| {
            let fleet = Arc::clone(&fleet);
            Box::pin(handler(fleet, event))
        });
    }
}

/// Core set for the instance at `index`: one core, filled in order, or
/// unpinned when per-core capacity is zero.
fn cpu_affinity_for(index: usize, servers_per_core: usize) -> Vec<usize> {
    if servers_per_core == 0 {
        return Vec::new();
    }
    vec![index / servers_per_core]
}
