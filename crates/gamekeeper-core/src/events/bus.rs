//! Asynchronous publish/subscribe fabric.
//!
//! Handlers subscribe by `(event type, name)`; the name exists for
//! diagnostics and unsubscription only. `emit` is fire-and-forget: every
//! matching handler runs in its own task, panics are recovered and logged,
//! and returned errors are logged. `emit_sync` waits for the whole fan-out
//! and surfaces the first error. `stop` refuses further emits and drains
//! the in-flight tasks.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace};

use super::{Event, EventType};

/// Future returned by an event handler.
pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

type Handler = Arc<dyn Fn(Event) -> HandlerFuture + Send + Sync>;

struct HandlerEntry {
    name: String,
    handler: Handler,
}

/// Process-wide event bus.
///
/// Cheap to clone per caller via `Arc`; the bus itself is shared, not
/// cloned. Handler execution is concurrent with no ordering guarantees
/// among handlers or successive emits.
pub struct EventBus {
    handlers: RwLock<HashMap<EventType, Vec<HandlerEntry>>>,
    tracker: TaskTracker,
    stopped: AtomicBool,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            tracker: TaskTracker::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Register a handler for one event type.
    ///
    /// The closure must be cheap; real work happens in the returned future.
    pub fn subscribe<F>(&self, event_type: EventType, name: impl Into<String>, handler: F)
    where
        F: Fn(Event) -> HandlerFuture + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(event = %event_type, handler = %name, "subscribed to event");
        self.handlers
            .write()
            .expect("event bus lock poisoned")
            .entry(event_type)
            .or_default()
            .push(HandlerEntry {
                name,
                handler: Arc::new(handler),
            });
    }

    /// Remove a named handler from one event type.
    pub fn unsubscribe(&self, event_type: EventType, name: &str) {
        let mut handlers = self.handlers.write().expect("event bus lock poisoned");
        if let Some(entries) = handlers.get_mut(&event_type) {
            entries.retain(|e| e.name != name);
            debug!(event = %event_type, handler = name, "unsubscribed from event");
        }
    }

    /// Number of handlers registered for one event type.
    pub fn handler_count(&self, event_type: EventType) -> usize {
        self.handlers
            .read()
            .expect("event bus lock poisoned")
            .get(&event_type)
            .map_or(0, Vec::len)
    }

    fn matching(&self, event_type: EventType) -> Vec<(String, Handler)> {
        self.handlers
            .read()
            .expect("event bus lock poisoned")
            .get(&event_type)
            .map(|entries| {
                entries
                    .iter()
                    .map(|e| (e.name.clone(), Arc::clone(&e.handler)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Publish an event without waiting for handlers.
    ///
    /// Each handler runs in its own task; a handler panic is recovered and
    /// logged under the handler's registered name. No-op after [`stop`].
    ///
    /// [`stop`]: EventBus::stop
    pub fn emit(&self, event: Event) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }

        let targets = self.matching(event.event_type);
        if targets.is_empty() {
            return;
        }

        trace!(event = %event.event_type, source = %event.source, handlers = targets.len(),
            "emitting event");

        for (name, handler) in targets {
            let event = event.clone();
            self.tracker.spawn(async move {
                run_handler(&name, &event, handler).await;
            });
        }
    }

    /// Publish an event and wait for every handler to complete.
    ///
    /// Returns the first handler error encountered, if any.
    pub async fn emit_sync(&self, event: Event) -> anyhow::Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Ok(());
        }

        let targets = self.matching(event.event_type);
        let mut futures = Vec::with_capacity(targets.len());
        for (name, handler) in targets {
            let event = event.clone();
            futures.push(async move { run_handler_captured(&name, &event, handler).await });
        }

        let mut first_err = None;
        for result in futures::future::join_all(futures).await {
            if let Err(err) = result {
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Stop accepting events and wait for in-flight handler tasks.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.tracker.close();
        self.tracker.wait().await;
        info!("event bus stopped");
    }

    /// Whether [`stop`](EventBus::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

async fn run_handler(name: &str, event: &Event, handler: Handler) {
    if let Err(err) = run_handler_captured(name, event, handler).await {
        error!(event = %event.event_type, handler = name, error = %err,
            "handler returned error");
    }
}

async fn run_handler_captured(
    name: &str,
    event: &Event,
    handler: Handler,
) -> anyhow::Result<()> {
    match AssertUnwindSafe(handler(event.clone())).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let info = panic_message(&panic);
            error!(event = %event.event_type, handler = name, panic = %info,
                "handler panicked");
            Err(anyhow::anyhow!("handler {name} panicked: {info}"))
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
