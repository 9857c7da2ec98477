//! Composition root and the supervision run loop.
//!
//! This is the only place where infrastructure is wired together: event
//! bus, fleet, control listener, auto-ping responder, health monitor, and
//! notification sinks. Command handlers and integration tests receive the
//! composed [`AppContext`] and never build the pieces themselves.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use gamekeeper_core::{ConfigHandle, Event, EventBus, EventType};
use gamekeeper_net::{AutoPingResponder, ControlListener};
use gamekeeper_runtime::{Fleet, HealthMonitor, LagLedger, NativeDriver};

use crate::sinks::DiscordNotifier;

/// Bind attempts for each listener before giving up.
pub const BIND_RETRIES: u32 = 15;
/// Pause between bind attempts; long enough for the kernel to release a
/// force-killed socket.
pub const BIND_RETRY_PAUSE: Duration = Duration::from_secs(3);

/// Everything the host binary composes.
pub struct AppContext {
    pub config: Arc<ConfigHandle>,
    pub bus: Arc<EventBus>,
    pub fleet: Arc<Fleet>,
    pub lag: Arc<LagLedger>,
}

/// Load configuration and assemble the application.
pub fn bootstrap(config_dir: &Path) -> anyhow::Result<AppContext> {
    let config = Arc::new(ConfigHandle::load(config_dir).context("loading configuration")?);
    let bus = Arc::new(EventBus::new());
    let driver = Arc::new(NativeDriver::new());
    let fleet = Fleet::new(Arc::clone(&config), Arc::clone(&bus), driver);

    let lag = LagLedger::new();
    lag.attach(&bus);

    Ok(AppContext {
        config,
        bus,
        fleet,
        lag,
    })
}

/// Supervise the fleet until a shutdown signal or a fatal component
/// failure.
///
/// Only the control listener is fatal after its bind retries are
/// exhausted; every other component degrades to a warning. Instance
/// lifecycles are rooted at the orchestrator, never at a caller's
/// request scope.
pub async fn run_supervisor(ctx: AppContext) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let (fatal_tx, mut fatal_rx) = mpsc::channel::<anyhow::Error>(4);

    // Reap leftovers from a previous run before taking their ports.
    ctx.fleet.cleanup_leftover_servers().await;

    let hon = ctx.config.hon_data();

    // Notification sinks consume off the bus; they never gate the fleet.
    let discord = DiscordNotifier::new(ctx.config.app_data().discord.webhook_url.clone());
    discord.attach(&ctx.bus);

    // Control listener: the one component the fleet cannot live without.
    {
        let listener = ControlListener::new(
            hon.manager_port,
            Arc::clone(&ctx.bus),
            ctx.fleet.registry(),
        );
        let cancel = cancel.clone();
        let fatal_tx = fatal_tx.clone();
        tokio::spawn(async move {
            info!(port = hon.manager_port, "starting control listener");
            if let Err(err) = with_bind_retry("control listener", &cancel, || {
                listener.run(cancel.clone())
            })
            .await
            {
                let _ = fatal_tx.send(err.context("control listener")).await;
            }
        });
    }

    // Auto-ping responder: degraded operation without it.
    {
        let port = AutoPingResponder::probe_port(hon.starting_game_port, hon.enable_proxy);
        let responder = AutoPingResponder::new(port, hon.name.clone(), hon.server_version.clone());
        let cancel = cancel.clone();
        tokio::spawn(async move {
            info!(port, "starting auto-ping responder");
            if let Err(err) =
                with_bind_retry("auto-ping responder", &cancel, || responder.run(cancel.clone()))
                    .await
            {
                warn!(error = %err, "auto-ping responder failed after retries");
            }
        });
    }

    // Game servers: failures are logged, the health loop retries later.
    {
        let fleet = Arc::clone(&ctx.fleet);
        tokio::spawn(async move {
            info!("starting game servers");
            if let Err(err) = fleet.start_all().await {
                warn!(error = %err, "some game servers failed to start");
            }
        });
    }

    // Health checks.
    let monitor = Arc::new(HealthMonitor::new(
        Arc::clone(&ctx.config),
        Arc::clone(&ctx.bus),
        Arc::clone(&ctx.fleet),
        Arc::clone(&ctx.lag),
    ));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            monitor.run(cancel).await;
        });
    }

    // Wait for a shutdown signal or a fatal component error.
    tokio::select! {
        signal = shutdown_signal() => {
            info!(signal, "received shutdown signal");
        }
        Some(err) = fatal_rx.recv() => {
            error!(error = %err, "critical component failed, initiating shutdown");
        }
    }

    info!("initiating graceful shutdown");
    cancel.cancel();
    ctx.bus.emit(Event::signal(EventType::Shutdown, "main"));

    // Fleet stop carries its own 30-second deadline and removes the
    // pin-file; the bus drains last so in-flight handlers finish.
    ctx.fleet.shutdown().await;
    ctx.bus.stop().await;

    info!("gamekeeper stopped");
    Ok(())
}

/// Retry a bind-failing component on a fixed pause, up to
/// [`BIND_RETRIES`] times. Cancellation ends the retry loop quietly.
async fn with_bind_retry<F, Fut, E>(
    name: &str,
    cancel: &CancellationToken,
    mut start: F,
) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    let mut last: Option<E> = None;
    for attempt in 0..=BIND_RETRIES {
        if cancel.is_cancelled() {
            return Ok(());
        }
        match start().await {
            Ok(()) => return Ok(()),
            Err(err) => {
                if attempt < BIND_RETRIES {
                    warn!(component = name, retry = attempt + 1, max = BIND_RETRIES,
                        error = %err, "bind failed, retrying in 3s");
                    last = Some(err);
                    sleep(BIND_RETRY_PAUSE).await;
                } else {
                    last = Some(err);
                }
            }
        }
    }
    Err(anyhow::Error::new(last.expect("at least one attempt"))
        .context(format!("{name} failed after {BIND_RETRIES} retries")))
}

#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            warn!(error = %err, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return "interrupt";
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "interrupt",
        _ = sigterm.recv() => "terminate",
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "interrupt"
}
