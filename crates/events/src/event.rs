use chrono::{DateTime, Utc};

/// A fact recorded in an aggregate stream.
///
/// Events are immutable, versioned, and only ever appended. Bundle events
/// double as the record's audit trail.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable dotted name, e.g. `"stock.bundle.completed"`.
    fn event_type(&self) -> &'static str;

    /// Payload schema version.
    fn version(&self) -> u32;

    /// Business time of the change.
    fn occurred_at(&self) -> DateTime<Utc>;
}
