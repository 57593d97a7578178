//! Notification channels for emitted events.
//!
//! Every channel gets the event plus its rendered text. Delivery failures
//! are logged and never retried.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, warn};

use aed_core::{Config, NotificationEvent, Units};

use crate::render::{self, RenderedMessage};

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(
        &self,
        event: &NotificationEvent,
        message: &RenderedMessage,
    ) -> anyhow::Result<()>;
}

/// Prints rendered messages to stdout.
pub struct ConsoleNotifier {
    short: bool,
}

impl ConsoleNotifier {
    pub fn new(short: bool) -> Self {
        ConsoleNotifier { short }
    }

    fn lines(&self, message: &RenderedMessage) -> Vec<String> {
        if self.short {
            message.short.clone()
        } else {
            vec![message.title.clone(), message.full.clone()]
        }
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn notify(
        &self,
        _event: &NotificationEvent,
        message: &RenderedMessage,
    ) -> anyhow::Result<()> {
        for line in self.lines(message) {
            println!("{line}");
        }
        println!();
        Ok(())
    }
}

/// Upper bound on one webhook request, connect to last byte.
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// POSTs events as JSON to a webhook URL.
#[derive(Clone)]
pub struct WebhookDispatcher {
    url: String,
    client: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        WebhookDispatcher::with_timeout(url, WEBHOOK_TIMEOUT)
    }

    pub fn with_timeout(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building webhook client")?;
        Ok(WebhookDispatcher {
            url: url.to_string(),
            client,
        })
    }
}

/// JSON body sent to webhooks.
pub fn webhook_payload(event: &NotificationEvent, message: &RenderedMessage) -> serde_json::Value {
    serde_json::json!({
        "source_id": event.source_id,
        "category": event.category,
        "lat": event.position.map(|p| p.lat),
        "lon": event.position.map(|p| p.lon),
        "distance_km": event.distance_km,
        "bearing_deg": event.bearing_deg,
        "heading": event.heading,
        "course": event.course,
        "speed": event.speed,
        "timestamp": event.timestamp.to_rfc3339(),
        "title": message.title,
        "message": message.full,
        "short": message.short,
    })
}

#[async_trait]
impl Notifier for WebhookDispatcher {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn notify(
        &self,
        event: &NotificationEvent,
        message: &RenderedMessage,
    ) -> anyhow::Result<()> {
        let payload = webhook_payload(event, message);
        self.client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("POST {}", self.url))?
            .error_for_status()
            .context("webhook rejected notification")?;
        Ok(())
    }
}

/// Renders each event once and hands it to every configured channel.
pub struct Dispatcher {
    units: Units,
    notifiers: Vec<Box<dyn Notifier>>,
}

impl Dispatcher {
    pub fn new(units: Units) -> Self {
        Dispatcher {
            units,
            notifiers: Vec::new(),
        }
    }

    /// Console output plus the webhook, if one is configured.
    pub fn from_config(config: &Config, short: bool) -> anyhow::Result<Self> {
        let mut dispatcher = Dispatcher::new(config.units);
        dispatcher.push(Box::new(ConsoleNotifier::new(short)));
        if let Some(url) = &config.webhook {
            dispatcher.push(Box::new(WebhookDispatcher::new(url)?));
        }
        Ok(dispatcher)
    }

    pub fn push(&mut self, notifier: Box<dyn Notifier>) {
        self.notifiers.push(notifier);
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Deliver to all channels. Returns the number that succeeded.
    pub async fn dispatch(&self, event: &NotificationEvent) -> usize {
        let message = render::render(event, self.units);
        let mut delivered = 0;
        for notifier in &self.notifiers {
            match notifier.notify(event, &message).await {
                Ok(()) => {
                    debug!(channel = notifier.name(), source = %event.source_id, "delivered");
                    delivered += 1;
                }
                Err(e) => {
                    warn!(
                        channel = notifier.name(),
                        source = %event.source_id,
                        "delivery failed: {e:#}"
                    );
                }
            }
        }
        delivered
    }
}
