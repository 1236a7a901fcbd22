//! Event log abstraction consumed by the replay engine and the scheduler.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::{EventType, TimeRange, TimelineEvent};

/// Read/append surface over the durable, append-only city event log.
///
/// # Ordering
///
/// `query_events` returns events sorted by `(timestamp, sequence)`, with
/// `offset` and `limit` applied after filtering and sorting.
///
/// # Implementations
///
/// - `MemoryEventStore` - in-process log for tests and simulation
/// - `SledEventStore` - embedded durable log
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Returns events whose timestamp lies in `range` (both ends inclusive).
    ///
    /// # Arguments
    /// * `range` - Inclusive time window
    /// * `types` - Optional type filter (`None` = all types)
    /// * `limit` - Maximum number of events returned
    /// * `offset` - Number of matching events skipped
    async fn query_events(
        &self,
        range: TimeRange,
        types: Option<&[EventType]>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TimelineEvent>, EnvError>;

    /// Appends an event and returns the sequence number assigned to it.
    ///
    /// The event's own `sequence` field is ignored.
    async fn append_event(&self, event: TimelineEvent) -> Result<u64, EnvError>;
}
