//! Rock identities.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Namespace tag shared by every rock identity.
pub const ROCK_NAMESPACE: &str = "rock";

/// Identity of one rock (job): the `rock` namespace plus a caller-supplied
/// base identifier.
///
/// Displays and serializes as `rock@<base>`. The base id is opaque to the
/// queue; callers address rocks by it in `hurl`/`break`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RockId {
    base: String,
}

impl RockId {
    /// Build the identity for a caller-supplied base id.
    ///
    /// Any base id is accepted; use `RockId::parse_base` to reject empty ones.
    pub fn from_base(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    /// Like `from_base`, but rejects empty base ids.
    pub fn parse_base(base: impl Into<String>) -> Result<Self, DomainError> {
        let base = base.into();
        if base.trim().is_empty() {
            return Err(DomainError::invalid_id("RockId: empty base id"));
        }
        Ok(Self { base })
    }

    pub fn namespace(&self) -> &'static str {
        ROCK_NAMESPACE
    }

    /// The external (caller-facing) part of the identity.
    pub fn base_id(&self) -> &str {
        &self.base
    }
}

impl core::fmt::Display for RockId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{ROCK_NAMESPACE}@{}", self.base)
    }
}

impl FromStr for RockId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, base) = s
            .split_once('@')
            .ok_or_else(|| DomainError::invalid_id(format!("RockId: missing '@' in '{s}'")))?;

        if namespace != ROCK_NAMESPACE {
            return Err(DomainError::invalid_id(format!(
                "RockId: expected namespace '{ROCK_NAMESPACE}', found '{namespace}'"
            )));
        }

        Self::parse_base(base)
    }
}

impl TryFrom<String> for RockId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RockId> for String {
    fn from(value: RockId) -> Self {
        value.to_string()
    }
}
