use chrono::{DateTime, Utc};

/// A published fact.
///
/// Events are immutable. The event type doubles as the topic subscribers
/// filter on (e.g. `"billing-rock-processed"`), so it may depend on the
/// event's data.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Event name/type identifier.
    fn event_type(&self) -> String;

    /// When the event occurred.
    fn occurred_at(&self) -> DateTime<Utc>;
}
