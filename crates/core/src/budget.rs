//! Retry budgets.

use serde::{Deserialize, Serialize};

/// Remaining permitted attempts for a rock.
///
/// Stored as an optional integer: `None` is unlimited, `Some(n)` is a
/// decrementing count. Once a finite budget reaches zero it stays at zero and
/// no further automatic retry is scheduled.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<u32>", into = "Option<u32>")]
pub enum RetryBudget {
    #[default]
    Unlimited,
    Remaining(u32),
}

impl RetryBudget {
    pub fn from_option(retries: Option<u32>) -> Self {
        match retries {
            Some(n) => Self::Remaining(n),
            None => Self::Unlimited,
        }
    }

    pub fn as_option(self) -> Option<u32> {
        match self {
            Self::Unlimited => None,
            Self::Remaining(n) => Some(n),
        }
    }

    pub fn is_unlimited(self) -> bool {
        matches!(self, Self::Unlimited)
    }

    pub fn is_exhausted(self) -> bool {
        matches!(self, Self::Remaining(0))
    }

    /// Account for one failed attempt and report whether another attempt
    /// should be scheduled.
    ///
    /// - unlimited: nothing is decremented, always rearm
    /// - finite: decrement by one, rearm only while still positive
    /// - zero: never decrements further, never rearms
    pub fn consume_failure(&mut self) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Remaining(0) => false,
            Self::Remaining(n) => {
                *n -= 1;
                *n > 0
            }
        }
    }
}

impl From<Option<u32>> for RetryBudget {
    fn from(value: Option<u32>) -> Self {
        Self::from_option(value)
    }
}

impl From<RetryBudget> for Option<u32> {
    fn from(value: RetryBudget) -> Self {
        value.as_option()
    }
}

impl core::fmt::Display for RetryBudget {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Unlimited => f.write_str("unlimited"),
            Self::Remaining(n) => write!(f, "{n}"),
        }
    }
}
