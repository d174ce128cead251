//! Signals emitted by rocks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use blackrock_core::RockId;

use crate::event::Event;

const ROCK_PROCESSED_SUFFIX: &str = "-rock-processed";

/// Event type of the cancellation/retirement signal.
pub const KILL_THE_ROCK: &str = "kill-the-rock";

/// Outcome carried by a `RockProcessed` notification.
///
/// Serializes flattened into the notification as either `"result": <value>`
/// or `"error": "<message>"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RockOutcome {
    Result(JsonValue),
    Error(String),
}

/// Terminal notification for one attempt of a rock.
///
/// Published under `"<eventScope>-rock-processed"`: once on success, and on
/// every failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RockProcessed {
    pub base_id: String,
    #[serde(flatten)]
    pub outcome: RockOutcome,
    #[serde(skip)]
    pub event_scope: String,
    #[serde(skip, default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
}

impl RockProcessed {
    pub fn success(id: &RockId, event_scope: impl Into<String>, result: JsonValue) -> Self {
        Self {
            base_id: id.base_id().to_string(),
            outcome: RockOutcome::Result(result),
            event_scope: event_scope.into(),
            occurred_at: Utc::now(),
        }
    }

    pub fn failure(id: &RockId, event_scope: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            base_id: id.base_id().to_string(),
            outcome: RockOutcome::Error(error.into()),
            event_scope: event_scope.into(),
            occurred_at: Utc::now(),
        }
    }

    /// Event type a subscriber listens on for a given scope.
    pub fn event_type_for(event_scope: &str) -> String {
        format!("{event_scope}{ROCK_PROCESSED_SUFFIX}")
    }

    /// Scope encoded in a `*-rock-processed` event type, if it is one.
    pub fn scope_of(event_type: &str) -> Option<&str> {
        event_type.strip_suffix(ROCK_PROCESSED_SUFFIX)
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RockOutcome::Result(_))
    }
}

impl Event for RockProcessed {
    fn event_type(&self) -> String {
        Self::event_type_for(&self.event_scope)
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

/// Request to dispose a rock's in-memory actor.
///
/// Rocks publish it themselves (`force = false`) once they go idle; the queue
/// then retires the actor unless it was re-armed in the meantime. External
/// callers publish it with `force = true` to tear an actor down even while it
/// is processing. Neither form touches the durable record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillTheRock {
    pub id: RockId,
    #[serde(default)]
    pub force: bool,
    #[serde(skip, default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
}

impl KillTheRock {
    pub fn retire(id: RockId) -> Self {
        Self {
            id,
            force: false,
            occurred_at: Utc::now(),
        }
    }

    pub fn force(id: RockId) -> Self {
        Self {
            id,
            force: true,
            occurred_at: Utc::now(),
        }
    }
}

impl Event for KillTheRock {
    fn event_type(&self) -> String {
        KILL_THE_ROCK.to_string()
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}
