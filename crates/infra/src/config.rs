//! Queue configuration.

use std::time::Duration;

use tracing::warn;

pub const POLL_INTERVAL_ENV: &str = "BLACKROCK_POLL_INTERVAL_MS";
pub const AUTO_RECOVER_ENV: &str = "BLACKROCK_AUTO_RECOVER";
pub const PERSIST_ATTEMPTS_ENV: &str = "BLACKROCK_PERSIST_ATTEMPTS";

/// Queue-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlackrockConfig {
    /// Fixed delay between attempts of a rock (and before the first one when
    /// an initial delay is requested).
    pub poll_interval: Duration,
    /// Run the recovery sweep from `init()`.
    pub auto_recover_on_start: bool,
    /// How many times `processed = true` is written after a successful run
    /// before giving up.
    pub persist_attempts: u32,
    /// Pause between those writes.
    pub persist_retry_delay: Duration,
}

impl Default for BlackrockConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            auto_recover_on_start: true,
            persist_attempts: 3,
            persist_retry_delay: Duration::from_secs(1),
        }
    }
}

impl BlackrockConfig {
    /// Defaults overridden by any valid `BLACKROCK_*` variables.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(POLL_INTERVAL_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.poll_interval = Duration::from_millis(ms),
                _ => warn!(var = POLL_INTERVAL_ENV, value = %raw, "ignoring invalid poll interval"),
            }
        }

        if let Some(raw) = lookup(AUTO_RECOVER_ENV) {
            match parse_bool(&raw) {
                Some(flag) => config.auto_recover_on_start = flag,
                None => warn!(var = AUTO_RECOVER_ENV, value = %raw, "ignoring invalid flag"),
            }
        }

        if let Some(raw) = lookup(PERSIST_ATTEMPTS_ENV) {
            match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => config.persist_attempts = n,
                _ => warn!(var = PERSIST_ATTEMPTS_ENV, value = %raw, "ignoring invalid attempt count"),
            }
        }

        config
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_auto_recover(mut self, enabled: bool) -> Self {
        self.auto_recover_on_start = enabled;
        self
    }

    pub fn with_persist_attempts(mut self, attempts: u32) -> Self {
        self.persist_attempts = attempts.max(1);
        self
    }

    pub fn with_persist_retry_delay(mut self, delay: Duration) -> Self {
        self.persist_retry_delay = delay;
        self
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
