//! Redis pub/sub notification bus (optional).
//!
//! Pub/sub is not durable: a notification published while nobody is
//! subscribed is gone. `PUBLISH` returns the number of clients that received
//! the message, which is reported back as the `Delivery`, so an unheard
//! notification shows up as undeliverable exactly like on the in-memory bus.

use std::thread;

use redis::Commands;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

use blackrock_events::{Delivery, EventBus, EventEnvelope, Subscription};

#[derive(Debug, Error)]
pub enum RedisBusError {
    #[error("redis error: {0}")]
    Redis(String),

    #[error("serialization error: {0}")]
    Serialize(String),
}

/// Redis pub/sub bus for JSON notification envelopes.
#[derive(Debug, Clone)]
pub struct RedisPubSubNotificationBus {
    client: redis::Client,
    channel: String,
}

impl RedisPubSubNotificationBus {
    pub fn new(redis_url: impl AsRef<str>, channel: impl Into<String>) -> Result<Self, RedisBusError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisBusError::Redis(e.to_string()))?;
        Ok(Self {
            client,
            channel: channel.into(),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl EventBus<EventEnvelope<JsonValue>> for RedisPubSubNotificationBus {
    type Error = RedisBusError;

    fn publish(&self, message: EventEnvelope<JsonValue>) -> Result<Delivery, Self::Error> {
        let payload = serde_json::to_string(&message)
            .map_err(|e| RedisBusError::Serialize(e.to_string()))?;

        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisBusError::Redis(e.to_string()))?;

        let receivers: i64 = conn
            .publish(&self.channel, payload)
            .map_err(|e| RedisBusError::Redis(e.to_string()))?;

        Ok(Delivery::to(receivers.max(0) as usize))
    }

    fn subscribe(&self) -> Subscription<EventEnvelope<JsonValue>> {
        let (tx, rx) = mpsc::unbounded_channel();

        let client = self.client.clone();
        let channel = self.channel.clone();

        // Background thread that receives pub/sub messages and forwards them.
        thread::spawn(move || {
            let mut conn = match client.get_connection() {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "redis subscription could not connect");
                    return;
                }
            };

            let mut pubsub = conn.as_pubsub();
            if let Err(e) = pubsub.subscribe(&channel) {
                warn!(channel = %channel, error = %e, "redis subscribe failed");
                return;
            }

            loop {
                let msg = match pubsub.get_message() {
                    Ok(m) => m,
                    Err(_) => return,
                };

                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };

                let envelope: EventEnvelope<JsonValue> = match serde_json::from_str(&payload) {
                    Ok(e) => e,
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "skipping malformed notification");
                        continue;
                    }
                };

                if tx.send(envelope).is_err() {
                    return;
                }
            }
        });

        Subscription::new(rx)
    }
}
