//! Filters over the latest version of each rock.

use serde::{Deserialize, Serialize};

use blackrock_core::{RockRecord, RockStatus};

/// Predicate over `processed` / `status` / retry budget.
///
/// Every criterion is optional; the default filter matches every rock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RockFilter {
    /// Filter by `processed` flag.
    pub processed: Option<bool>,
    /// Filter by lifecycle status.
    pub status: Option<RockStatus>,
    /// Skip rocks whose finite retry budget reached zero.
    pub exclude_exhausted: bool,
    /// Skip rocks that were created but never given an action.
    pub require_action: bool,
}

impl RockFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Rocks the recovery sweep must reactivate at startup.
    pub fn recoverable() -> Self {
        Self {
            processed: Some(false),
            status: Some(RockStatus::Published),
            exclude_exhausted: true,
            require_action: true,
        }
    }

    pub fn with_processed(mut self, processed: bool) -> Self {
        self.processed = Some(processed);
        self
    }

    pub fn with_status(mut self, status: RockStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, record: &RockRecord) -> bool {
        self.processed.is_none_or(|p| record.processed() == p)
            && self.status.is_none_or(|s| record.status() == s)
            && !(self.exclude_exhausted && record.retries().is_exhausted())
            && !(self.require_action && record.action().is_none())
    }
}
