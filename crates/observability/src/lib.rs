//! Tracing/logging setup shared by every process that runs a queue.

/// Initialize process-wide tracing with the format from `BLACKROCK_LOG_FORMAT`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init_with(tracing::LogFormat::from_env());
}

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use self::tracing::{init_with, LogFormat};
