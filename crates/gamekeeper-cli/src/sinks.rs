//! Notification sinks consuming bus events.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use gamekeeper_core::{EventBus, EventPayload, EventType};

/// Posts `notify_discord_admin` events to a configured webhook.
///
/// Failures never gate the fleet; a missed notification is logged and
/// forgotten.
pub struct DiscordNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl DiscordNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            webhook_url: webhook_url.into(),
            client: reqwest::Client::new(),
        })
    }

    /// Subscribe the notifier to the bus. With no webhook configured the
    /// subscription still consumes events, logging them at debug.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) {
        let notifier = Arc::clone(self);
        bus.subscribe(
            EventType::NotifyDiscordAdmin,
            "discord_notifier",
            move |event| {
                let notifier = Arc::clone(&notifier);
                Box::pin(async move {
                    let EventPayload::Notice(notice) = &event.payload else {
                        debug!(event = %event.event_type, "unexpected payload in discord sink");
                        return Ok(());
                    };

                    if notifier.webhook_url.is_empty() {
                        debug!(title = %notice.title, level = %notice.level,
                            "discord webhook not configured, dropping notification");
                        return Ok(());
                    }

                    let body = json!({
                        "embeds": [{
                            "title": notice.title,
                            "description": notice.message,
                            "color": embed_color(&notice.level),
                        }]
                    });

                    if let Err(err) = notifier
                        .client
                        .post(&notifier.webhook_url)
                        .json(&body)
                        .send()
                        .await
                        .and_then(reqwest::Response::error_for_status)
                    {
                        warn!(error = %err, "failed to post discord notification");
                    }
                    Ok(())
                })
            },
        );
    }
}

/// Discord embed color per severity level.
fn embed_color(level: &str) -> u32 {
    match level {
        "critical" | "error" => 0x00E7_4C3C,
        "warning" => 0x00F3_9C12,
        _ => 0x0033_98DB,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamekeeper_core::{AdminNotice, Event};

    #[test]
    fn colors_map_by_level() {
        assert_eq!(embed_color("error"), embed_color("critical"));
        assert_ne!(embed_color("warning"), embed_color("info"));
    }

    #[tokio::test]
    async fn unconfigured_webhook_swallows_events() {
        let bus = EventBus::new();
        let notifier = DiscordNotifier::new("");
        notifier.attach(&bus);

        bus.emit_sync(Event::new(
            EventType::NotifyDiscordAdmin,
            "test",
            EventPayload::Notice(AdminNotice {
                title: "T".into(),
                message: "M".into(),
                level: "warning".into(),
            }),
        ))
        .await
        .unwrap();
    }
}
