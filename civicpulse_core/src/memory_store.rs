//! In-process event log with fault injection.

use async_trait::async_trait;
use civicpulse_env::{EnvError, EventStore, EventType, TimeRange, TimelineEvent};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;

/// Event log held in memory, sorted by `(timestamp, sequence)`.
///
/// Used by tests and by the simulator. Faults can be injected to exercise
/// the engine's failure paths: a store that refuses every query, refuses
/// appends, or starts failing after a number of successful queries.
pub struct MemoryEventStore {
    events: RwLock<Vec<TimelineEvent>>,
    next_sequence: AtomicU64,

    queries_down: AtomicBool,
    appends_down: AtomicBool,
    /// Successful queries left before the store goes down
    query_budget: AtomicUsize,
}

impl MemoryEventStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            next_sequence: AtomicU64::new(1),
            queries_down: AtomicBool::new(false),
            appends_down: AtomicBool::new(false),
            query_budget: AtomicUsize::new(usize::MAX),
        }
    }

    /// Creates a store pre-loaded with events, sequenced in iteration order.
    pub fn with_events(events: impl IntoIterator<Item = TimelineEvent>) -> Self {
        let store = Self::new();
        {
            let mut log = store.events.write().unwrap_or_else(|e| e.into_inner());
            for event in events {
                store.insert_sorted(&mut log, event);
            }
        }
        store
    }

    /// Makes every query fail (or recover).
    pub fn set_queries_down(&self, down: bool) {
        self.queries_down.store(down, Ordering::SeqCst);
    }

    /// Makes every append fail (or recover).
    pub fn set_appends_down(&self, down: bool) {
        self.appends_down.store(down, Ordering::SeqCst);
    }

    /// Lets `n` more queries succeed, then fails the rest.
    pub fn fail_queries_after(&self, n: usize) {
        self.query_budget.store(n, Ordering::SeqCst);
    }

    /// Number of events in the log.
    pub fn len(&self) -> usize {
        self.events.read().map(|log| log.len()).unwrap_or(0)
    }

    /// Returns true if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a copy of the whole log in order.
    pub fn all_events(&self) -> Vec<TimelineEvent> {
        self.events.read().map(|log| log.clone()).unwrap_or_default()
    }

    fn insert_sorted(&self, log: &mut Vec<TimelineEvent>, mut event: TimelineEvent) -> u64 {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        event.sequence = sequence;
        event.event_type = event.payload.event_type();
        let key = event.order_key();
        let idx = log.partition_point(|e| e.order_key() <= key);
        log.insert(idx, event);
        sequence
    }

    fn take_query_budget(&self) -> bool {
        self.query_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn query_events(
        &self,
        range: TimeRange,
        types: Option<&[EventType]>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TimelineEvent>, EnvError> {
        if self.queries_down.load(Ordering::SeqCst) || !self.take_query_budget() {
            return Err(EnvError::store("memory store is down (injected fault)"));
        }

        let log = self
            .events
            .read()
            .map_err(|_| EnvError::store("event log lock poisoned"))?;

        let first = log.partition_point(|e| e.timestamp < range.start);
        let events = log[first..]
            .iter()
            .take_while(|e| e.timestamp <= range.end)
            .filter(|e| types.map_or(true, |t| t.contains(&e.event_type)))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();

        Ok(events)
    }

    async fn append_event(&self, event: TimelineEvent) -> Result<u64, EnvError> {
        if self.appends_down.load(Ordering::SeqCst) {
            return Err(EnvError::store("memory store rejects appends (injected fault)"));
        }

        let mut log = self
            .events
            .write()
            .map_err(|_| EnvError::store("event log lock poisoned"))?;
        Ok(self.insert_sorted(&mut log, event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use civicpulse_env::{EventPayload, SensorReading};

    fn reading(id: &str, value: f64) -> EventPayload {
        EventPayload::SensorReading(SensorReading {
            sensor_id: id.to_string(),
            sensor_type: "temperature".to_string(),
            zone_id: None,
            value,
            unit: None,
        })
    }

    #[tokio::test]
    async fn test_equal_timestamps_keep_insertion_order() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let store = MemoryEventStore::new();

        store.append_event(TimelineEvent::new(t0 + Duration::seconds(5), reading("b", 2.0))).await.unwrap();
        store.append_event(TimelineEvent::new(t0, reading("a", 1.0))).await.unwrap();
        store.append_event(TimelineEvent::new(t0, reading("c", 3.0))).await.unwrap();

        let events = store
            .query_events(TimeRange::new(t0, t0 + Duration::seconds(10)), None, 10, 0)
            .await
            .unwrap();
        let ids: Vec<_> = events.iter().filter_map(|e| e.payload.entity_id()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }

    #[tokio::test]
    async fn test_range_is_inclusive_and_paged() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let store = MemoryEventStore::with_events(
            (0..10).map(|i| TimelineEvent::new(t0 + Duration::seconds(i), reading("s", i as f64))),
        );

        let range = TimeRange::new(t0 + Duration::seconds(2), t0 + Duration::seconds(6));
        let all = store.query_events(range, None, 100, 0).await.unwrap();
        assert_eq!(all.len(), 5);

        let page = store.query_events(range, None, 2, 3).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].timestamp, t0 + Duration::seconds(5));
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let t0 = Utc::now();
        let store = MemoryEventStore::new();
        store.fail_queries_after(1);

        let range = TimeRange::at(t0);
        assert!(store.query_events(range, None, 1, 0).await.is_ok());
        assert!(store.query_events(range, None, 1, 0).await.is_err());

        store.set_appends_down(true);
        assert!(store.append_event(TimelineEvent::new(t0, reading("x", 0.0))).await.is_err());
        assert!(store.is_empty());
    }
}
