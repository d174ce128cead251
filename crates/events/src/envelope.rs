use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::event::Event;

/// Envelope for a published event.
///
/// This is the unit that travels over an `EventBus`. `event_type` is copied
/// out of the payload so transports and subscribers can route on it without
/// decoding the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    event_type: String,
    occurred_at: DateTime<Utc>,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        event_type: impl Into<String>,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            event_type: event_type.into(),
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl<E: Event> EventEnvelope<E> {
    /// Wrap a typed event, assigning a fresh time-ordered event id.
    pub fn from_event(event: E) -> Self {
        Self::new(
            Uuid::now_v7(),
            event.event_type(),
            event.occurred_at(),
            event,
        )
    }
}

impl<E: Serialize> EventEnvelope<E> {
    /// Erase the payload type for transports that carry JSON.
    pub fn to_json(&self) -> Result<EventEnvelope<JsonValue>, serde_json::Error> {
        Ok(EventEnvelope {
            event_id: self.event_id,
            event_type: self.event_type.clone(),
            occurred_at: self.occurred_at,
            payload: serde_json::to_value(&self.payload)?,
        })
    }
}
