//! The durable rock record and its state transitions.
//!
//! Transitions here are pure: they mutate in-memory state only. Persisting a
//! new version is the job actor's responsibility (`blackrock-infra`).

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::aggregate::AggregateRoot;
use crate::budget::RetryBudget;
use crate::error::{DomainError, DomainResult};
use crate::id::RockId;

/// Soft-delete lifecycle flag.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RockStatus {
    #[default]
    Published,
    Trashed,
}

impl RockStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RockStatus::Published => "published",
            RockStatus::Trashed => "trashed",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Self> {
        match s {
            "published" => Ok(RockStatus::Published),
            "trashed" => Ok(RockStatus::Trashed),
            other => Err(DomainError::validation(format!("unknown rock status '{other}'"))),
        }
    }
}

/// The action a rock executes: a logical name and optional parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RockAction {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<JsonValue>,
}

impl RockAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: None,
        }
    }

    pub fn with_args(mut self, args: JsonValue) -> Self {
        self.args = Some(args);
        self
    }
}

/// Durable, versioned state of one rock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RockRecord {
    id: RockId,
    status: RockStatus,
    event_scope: String,
    action: Option<RockAction>,
    processed: bool,
    retries: RetryBudget,

    /// Version of the stored snapshot this state was loaded from or last
    /// written as. Assigned by the store, never serialized in the payload.
    #[serde(skip)]
    version: u64,
}

impl RockRecord {
    /// Fresh, never-persisted record: published, not processed, no action yet.
    pub fn new(id: RockId) -> Self {
        Self {
            id,
            status: RockStatus::Published,
            event_scope: String::new(),
            action: None,
            processed: false,
            retries: RetryBudget::Unlimited,
            version: 0,
        }
    }

    pub fn status(&self) -> RockStatus {
        self.status
    }

    pub fn event_scope(&self) -> &str {
        &self.event_scope
    }

    pub fn action(&self) -> Option<&RockAction> {
        self.action.as_ref()
    }

    pub fn processed(&self) -> bool {
        self.processed
    }

    pub fn retries(&self) -> RetryBudget {
        self.retries
    }

    pub fn is_trashed(&self) -> bool {
        self.status == RockStatus::Trashed
    }

    /// Whether the recovery sweep may reactivate this record.
    pub fn is_recoverable(&self) -> bool {
        self.status == RockStatus::Published
            && !self.processed
            && !self.retries.is_exhausted()
            && self.action.is_some()
    }

    /// Re-arm the rock with a new action and retry policy.
    ///
    /// Always clears any prior completed/trashed state.
    pub fn upsert(
        &mut self,
        event_scope: impl Into<String>,
        action: RockAction,
        retries: RetryBudget,
    ) -> DomainResult<()> {
        if action.name.trim().is_empty() {
            return Err(DomainError::validation("action name must not be empty"));
        }

        self.event_scope = event_scope.into();
        self.action = Some(action);
        self.retries = retries;
        self.processed = false;
        self.status = RockStatus::Published;
        Ok(())
    }

    pub fn done(&mut self) {
        self.processed = true;
    }

    pub fn trash(&mut self) {
        self.status = RockStatus::Trashed;
    }

    /// Record the budget left after a failed attempt.
    pub fn record_failure(&mut self, remaining: RetryBudget) {
        self.retries = remaining;
    }

    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub fn at_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }
}

impl AggregateRoot for RockRecord {
    type Id = RockId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}
