//! Snapshot Reconstructor - "what did the city look like at time T".
//!
//! A snapshot is never stored. It is rebuilt on demand by folding every event
//! with `timestamp <= T` in `(timestamp, sequence)` order, last write wins per
//! entity id. Agent decisions are reasoning traces and do not take part in
//! the fold.

use crate::config::SnapshotConfig;
use crate::error::ReplayError;
use chrono::{DateTime, Utc};
use civicpulse_env::{
    EventPayload, EventStore, GeoPoint, IncidentRecord, IncidentStatus, IncidentUpdate,
    SensorReading, Severity, TimeRange, TimelineEvent, Timestamp, WorkOrderRecord,
    WorkOrderStatus, WorkOrderUpdate,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// As-of state of one sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorState {
    pub sensor_id: String,
    pub sensor_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    pub current_value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Timestamp of the reading that produced `current_value`
    pub last_reading: Timestamp,
}

/// As-of state of one incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentState {
    pub incident_id: String,
    pub incident_type: String,
    pub category: String,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<Timestamp>,
}

impl IncidentState {
    fn created(record: &IncidentRecord, at: Timestamp) -> Self {
        Self {
            incident_id: record.incident_id.clone(),
            incident_type: record.incident_type.clone(),
            category: record.category.clone(),
            severity: record.severity,
            status: record.status,
            description: record.description.clone(),
            location: record.location,
            priority_score: record.priority_score,
            source: record.source.clone(),
            resolution: None,
            created_at: at,
            updated_at: at,
            resolved_at: None,
        }
    }

    fn merge(&mut self, update: &IncidentUpdate, at: Timestamp) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(severity) = update.severity {
            self.severity = severity;
        }
        if let Some(score) = update.priority_score {
            self.priority_score = Some(score);
        }
        if let Some(description) = &update.description {
            self.description = description.clone();
        }
        self.updated_at = at;
    }
}

/// As-of state of one work order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkOrderState {
    pub work_order_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    pub title: String,
    pub status: WorkOrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_crew: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl WorkOrderState {
    fn created(record: &WorkOrderRecord, at: Timestamp) -> Self {
        Self {
            work_order_id: record.work_order_id.clone(),
            incident_id: record.incident_id.clone(),
            title: record.title.clone(),
            status: record.status,
            priority: record.priority,
            assigned_crew: record.assigned_crew.clone(),
            created_at: at,
            updated_at: at,
        }
    }

    fn merge(&mut self, update: &WorkOrderUpdate, at: Timestamp) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(crew) = &update.assigned_crew {
            self.assigned_crew = Some(crew.clone());
        }
        if let Some(priority) = update.priority {
            self.priority = Some(priority);
        }
        self.updated_at = at;
    }
}

/// Point-in-time reconstruction of the city's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSnapshot {
    pub timestamp: Timestamp,
    pub sensors: BTreeMap<String, SensorState>,
    pub incidents: BTreeMap<String, IncidentState>,
    pub work_orders: BTreeMap<String, WorkOrderState>,
    /// Events folded into this snapshot (agent decisions excluded)
    pub events_applied: usize,
}

impl SystemSnapshot {
    /// Snapshot with no entities.
    pub fn empty(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            sensors: BTreeMap::new(),
            incidents: BTreeMap::new(),
            work_orders: BTreeMap::new(),
            events_applied: 0,
        }
    }

    /// Returns true if no entity is present.
    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty() && self.incidents.is_empty() && self.work_orders.is_empty()
    }

    /// Folds a single event into the snapshot.
    ///
    /// Callers feed events in `(timestamp, sequence)` order. Returns `false`
    /// when the event did not change state (agent decisions, updates for
    /// entities never created).
    pub fn apply(&mut self, event: &TimelineEvent) -> bool {
        let at = event.timestamp;
        let applied = match &event.payload {
            EventPayload::SensorReading(reading) => {
                self.apply_reading(reading, at);
                true
            }
            EventPayload::IncidentCreated(record) => {
                self.incidents
                    .insert(record.incident_id.clone(), IncidentState::created(record, at));
                true
            }
            EventPayload::IncidentUpdated(update) => match self.incidents.get_mut(&update.incident_id) {
                Some(state) => {
                    state.merge(update, at);
                    true
                }
                None => false,
            },
            EventPayload::IncidentResolved { incident_id, resolution } => {
                match self.incidents.get_mut(incident_id) {
                    Some(state) => {
                        state.status = IncidentStatus::Resolved;
                        state.resolved_at = Some(at);
                        state.updated_at = at;
                        if resolution.is_some() {
                            state.resolution = resolution.clone();
                        }
                        true
                    }
                    None => false,
                }
            }
            EventPayload::WorkOrderCreated(record) => {
                self.work_orders
                    .insert(record.work_order_id.clone(), WorkOrderState::created(record, at));
                true
            }
            EventPayload::WorkOrderUpdated(update) => {
                match self.work_orders.get_mut(&update.work_order_id) {
                    Some(state) => {
                        state.merge(update, at);
                        true
                    }
                    None => false,
                }
            }
            EventPayload::AgentDecision(_) => false,
        };

        if applied {
            self.events_applied += 1;
        }
        applied
    }

    fn apply_reading(&mut self, reading: &SensorReading, at: Timestamp) {
        let state = self
            .sensors
            .entry(reading.sensor_id.clone())
            .or_insert_with(|| SensorState {
                sensor_id: reading.sensor_id.clone(),
                sensor_type: reading.sensor_type.clone(),
                zone_id: None,
                current_value: reading.value,
                unit: None,
                last_reading: at,
            });
        state.sensor_type = reading.sensor_type.clone();
        if reading.zone_id.is_some() {
            state.zone_id = reading.zone_id.clone();
        }
        if reading.unit.is_some() {
            state.unit = reading.unit.clone();
        }
        state.current_value = reading.value;
        state.last_reading = at;
    }

    /// Folds an ordered slice of events, stopping after `timestamp`.
    pub fn fold<'a>(timestamp: Timestamp, events: impl IntoIterator<Item = &'a TimelineEvent>) -> Self {
        let mut snapshot = Self::empty(timestamp);
        for event in events.into_iter().take_while(|e| e.timestamp <= timestamp) {
            snapshot.apply(event);
        }
        snapshot
    }
}

/// Rebuilds snapshots from the event log.
pub struct SnapshotReconstructor {
    store: Arc<dyn EventStore>,
    config: SnapshotConfig,
}

impl SnapshotReconstructor {
    /// Creates a reconstructor with the default look-back.
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self::with_config(store, SnapshotConfig::default())
    }

    /// Creates a reconstructor with explicit bounds.
    pub fn with_config(store: Arc<dyn EventStore>, config: SnapshotConfig) -> Self {
        Self { store, config }
    }

    /// Earliest instant folded for a snapshot at `timestamp`.
    pub fn fold_start(&self, timestamp: Timestamp) -> Timestamp {
        self.config
            .max_lookback
            .and_then(|lookback| chrono::Duration::from_std(lookback).ok())
            .and_then(|lookback| timestamp.checked_sub_signed(lookback))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Reconstructs the state as of `timestamp` (inclusive).
    ///
    /// Either the whole fold succeeds or `StoreUnavailable` is returned; a
    /// partially folded snapshot never escapes.
    pub async fn snapshot_at(&self, timestamp: Timestamp) -> Result<SystemSnapshot, ReplayError> {
        let range = TimeRange::new(self.fold_start(timestamp), timestamp);
        let page_size = self.config.page_size.max(1);

        let mut snapshot = SystemSnapshot::empty(timestamp);
        let mut offset = 0usize;
        loop {
            let page = self
                .store
                .query_events(range, None, page_size, offset)
                .await
                .map_err(|e| {
                    ReplayError::store(format!("reconstructing snapshot at {}", timestamp), e)
                })?;

            for event in &page {
                snapshot.apply(event);
            }
            offset += page.len();

            if page.len() < page_size {
                break;
            }
        }

        debug!(
            "Snapshot at {}: {} sensors, {} incidents, {} work orders ({} events over {} rows)",
            timestamp,
            snapshot.sensors.len(),
            snapshot.incidents.len(),
            snapshot.work_orders.len(),
            snapshot.events_applied,
            offset
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryEventStore;
    use chrono::{Duration, TimeZone};
    use civicpulse_env::AgentDecision;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 7, 4, 10, 0, 0).unwrap()
    }

    fn reading(id: &str, value: f64) -> EventPayload {
        EventPayload::SensorReading(SensorReading {
            sensor_id: id.to_string(),
            sensor_type: "water_level".to_string(),
            zone_id: Some("riverside".to_string()),
            value,
            unit: Some("m".to_string()),
        })
    }

    fn incident(id: &str) -> EventPayload {
        EventPayload::IncidentCreated(IncidentRecord {
            incident_id: id.to_string(),
            incident_type: "flood_warning".to_string(),
            category: "environmental".to_string(),
            severity: Severity::High,
            status: IncidentStatus::Open,
            description: "River above threshold".to_string(),
            location: None,
            priority_score: Some(0.7),
            source: None,
        })
    }

    fn work_order(id: &str, incident: &str) -> EventPayload {
        EventPayload::WorkOrderCreated(WorkOrderRecord {
            work_order_id: id.to_string(),
            incident_id: Some(incident.to_string()),
            title: "Deploy sandbags".to_string(),
            status: WorkOrderStatus::Pending,
            priority: Some(Severity::High),
            assigned_crew: None,
        })
    }

    fn store_with(events: Vec<(i64, EventPayload)>) -> Arc<MemoryEventStore> {
        Arc::new(MemoryEventStore::with_events(
            events
                .into_iter()
                .map(|(secs, payload)| TimelineEvent::new(t0() + Duration::seconds(secs), payload)),
        ))
    }

    #[tokio::test]
    async fn test_snapshot_before_any_event_is_empty() {
        let store = store_with(vec![(10, reading("wl-1", 1.0)), (20, incident("inc-1"))]);
        let reconstructor = SnapshotReconstructor::new(store);

        let snapshot = reconstructor.snapshot_at(t0()).await.unwrap();

        assert!(snapshot.sensors.is_empty());
        assert!(snapshot.incidents.is_empty());
        assert!(snapshot.work_orders.is_empty());
        assert_eq!(snapshot.timestamp, t0());
    }

    #[tokio::test]
    async fn test_snapshot_includes_event_at_exact_timestamp() {
        let store = store_with(vec![
            (10, reading("wl-1", 1.0)),
            (20, reading("wl-1", 2.5)),
            (20, incident("inc-1")),
        ]);
        let reconstructor = SnapshotReconstructor::new(store);

        let at_event = reconstructor.snapshot_at(t0() + Duration::seconds(20)).await.unwrap();
        assert_eq!(at_event.sensors["wl-1"].current_value, 2.5);
        assert_eq!(at_event.sensors["wl-1"].last_reading, t0() + Duration::seconds(20));
        assert!(at_event.incidents.contains_key("inc-1"));

        let just_before = reconstructor
            .snapshot_at(t0() + Duration::seconds(20) - Duration::milliseconds(1))
            .await
            .unwrap();
        assert_eq!(just_before.sensors["wl-1"].current_value, 1.0);
        assert!(just_before.incidents.is_empty());
    }

    #[tokio::test]
    async fn test_incident_lifecycle_is_history_preserving() {
        let store = store_with(vec![
            (0, incident("inc-1")),
            (
                5,
                EventPayload::IncidentUpdated(IncidentUpdate {
                    incident_id: "inc-1".to_string(),
                    status: Some(IncidentStatus::Dispatched),
                    priority_score: Some(0.95),
                    ..Default::default()
                }),
            ),
            (6, work_order("wo-1", "inc-1")),
            (
                7,
                EventPayload::WorkOrderUpdated(WorkOrderUpdate {
                    work_order_id: "wo-1".to_string(),
                    status: Some(WorkOrderStatus::InProgress),
                    assigned_crew: Some("crew-7".to_string()),
                    priority: None,
                }),
            ),
            (
                9,
                EventPayload::IncidentResolved {
                    incident_id: "inc-1".to_string(),
                    resolution: Some("Water receded".to_string()),
                },
            ),
        ]);
        let reconstructor = SnapshotReconstructor::new(store);

        let snapshot = reconstructor.snapshot_at(t0() + Duration::seconds(10)).await.unwrap();
        let inc = &snapshot.incidents["inc-1"];
        assert_eq!(inc.status, IncidentStatus::Resolved);
        assert_eq!(inc.priority_score, Some(0.95));
        assert_eq!(inc.severity, Severity::High);
        assert_eq!(inc.created_at, t0());
        assert_eq!(inc.resolved_at, Some(t0() + Duration::seconds(9)));
        assert_eq!(inc.resolution.as_deref(), Some("Water receded"));

        let wo = &snapshot.work_orders["wo-1"];
        assert_eq!(wo.status, WorkOrderStatus::InProgress);
        assert_eq!(wo.assigned_crew.as_deref(), Some("crew-7"));
    }

    #[tokio::test]
    async fn test_agent_events_and_orphan_updates_do_not_change_state() {
        let store = store_with(vec![
            (
                1,
                EventPayload::AgentDecision(AgentDecision {
                    agent_type: "planner".to_string(),
                    step: "plan".to_string(),
                    data: serde_json::json!({ "plan": "dispatch" }),
                    incident_id: Some("inc-9".to_string()),
                    work_order_id: None,
                }),
            ),
            (
                2,
                EventPayload::IncidentResolved {
                    incident_id: "inc-9".to_string(),
                    resolution: None,
                },
            ),
        ]);
        let reconstructor = SnapshotReconstructor::new(store);

        let snapshot = reconstructor.snapshot_at(t0() + Duration::seconds(5)).await.unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.events_applied, 0);
    }

    #[tokio::test]
    async fn test_paging_folds_every_event_once() {
        let events = (0..25).map(|i| (i, reading("wl-1", i as f64))).collect();
        let store = store_with(events);
        let reconstructor = SnapshotReconstructor::with_config(
            store,
            SnapshotConfig::default().with_page_size(4),
        );

        let snapshot = reconstructor.snapshot_at(t0() + Duration::seconds(24)).await.unwrap();
        assert_eq!(snapshot.events_applied, 25);
        assert_eq!(snapshot.sensors["wl-1"].current_value, 24.0);
    }

    #[tokio::test]
    async fn test_store_failure_mid_fold_returns_no_snapshot() {
        let events = (0..10).map(|i| (i, reading("wl-1", i as f64))).collect();
        let store = store_with(events);
        store.fail_queries_after(1);
        let reconstructor = SnapshotReconstructor::with_config(
            store,
            SnapshotConfig::default().with_page_size(3),
        );

        let result = reconstructor.snapshot_at(t0() + Duration::seconds(10)).await;
        assert!(matches!(result, Err(ReplayError::StoreUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_lookback_bounds_the_fold() {
        let store = store_with(vec![(0, reading("old", 1.0)), (3600, reading("new", 2.0))]);
        let reconstructor = SnapshotReconstructor::with_config(
            store,
            SnapshotConfig::default().with_lookback(Some(std::time::Duration::from_secs(600))),
        );

        let snapshot = reconstructor.snapshot_at(t0() + Duration::seconds(3600)).await.unwrap();
        assert!(snapshot.sensors.contains_key("new"));
        assert!(!snapshot.sensors.contains_key("old"));
    }

    // ------------------------------------------------------------------
    // Property tests against a naive reference fold
    // ------------------------------------------------------------------

    /// Independent model: last write per entity id, tracked as the index of
    /// the winning event.
    #[derive(Debug, Default, PartialEq)]
    struct ReferenceState {
        sensors: HashMap<String, f64>,
        incidents: HashMap<String, IncidentStatus>,
        work_orders: HashMap<String, WorkOrderStatus>,
    }

    fn reference_fold(events: &[TimelineEvent], at: Timestamp) -> ReferenceState {
        let mut sorted: Vec<&TimelineEvent> = events.iter().filter(|e| e.timestamp <= at).collect();
        sorted.sort_by_key(|e| e.order_key());

        let mut state = ReferenceState::default();
        for event in sorted {
            match &event.payload {
                EventPayload::SensorReading(r) => {
                    state.sensors.insert(r.sensor_id.clone(), r.value);
                }
                EventPayload::IncidentCreated(r) => {
                    state.incidents.insert(r.incident_id.clone(), r.status);
                }
                EventPayload::IncidentUpdated(u) => {
                    if let (Some(slot), Some(status)) = (state.incidents.get_mut(&u.incident_id), u.status) {
                        *slot = status;
                    }
                }
                EventPayload::IncidentResolved { incident_id, .. } => {
                    if let Some(slot) = state.incidents.get_mut(incident_id) {
                        *slot = IncidentStatus::Resolved;
                    }
                }
                EventPayload::WorkOrderCreated(r) => {
                    state.work_orders.insert(r.work_order_id.clone(), r.status);
                }
                EventPayload::WorkOrderUpdated(u) => {
                    if let (Some(slot), Some(status)) = (state.work_orders.get_mut(&u.work_order_id), u.status) {
                        *slot = status;
                    }
                }
                EventPayload::AgentDecision(_) => {}
            }
        }
        state
    }

    fn project(snapshot: &SystemSnapshot) -> ReferenceState {
        ReferenceState {
            sensors: snapshot.sensors.iter().map(|(k, v)| (k.clone(), v.current_value)).collect(),
            incidents: snapshot.incidents.iter().map(|(k, v)| (k.clone(), v.status)).collect(),
            work_orders: snapshot.work_orders.iter().map(|(k, v)| (k.clone(), v.status)).collect(),
        }
    }

    fn arb_payload() -> impl Strategy<Value = EventPayload> {
        let id = 0u8..4;
        let incident_status = prop_oneof![
            Just(IncidentStatus::Open),
            Just(IncidentStatus::Acknowledged),
            Just(IncidentStatus::Dispatched),
        ];
        let work_status = prop_oneof![
            Just(WorkOrderStatus::Pending),
            Just(WorkOrderStatus::Assigned),
            Just(WorkOrderStatus::Completed),
        ];
        prop_oneof![
            (id.clone(), -50i32..50).prop_map(|(i, v)| reading(&format!("s{}", i), v as f64)),
            id.clone().prop_map(|i| incident(&format!("i{}", i))),
            (id.clone(), incident_status).prop_map(|(i, status)| {
                EventPayload::IncidentUpdated(IncidentUpdate {
                    incident_id: format!("i{}", i),
                    status: Some(status),
                    ..Default::default()
                })
            }),
            id.clone().prop_map(|i| EventPayload::IncidentResolved {
                incident_id: format!("i{}", i),
                resolution: None,
            }),
            id.clone().prop_map(|i| work_order(&format!("w{}", i), "i0")),
            (id, work_status).prop_map(|(i, status)| {
                EventPayload::WorkOrderUpdated(WorkOrderUpdate {
                    work_order_id: format!("w{}", i),
                    status: Some(status),
                    ..Default::default()
                })
            }),
            Just(EventPayload::AgentDecision(AgentDecision {
                agent_type: "analyst".to_string(),
                step: "noop".to_string(),
                data: serde_json::Value::Null,
                incident_id: None,
                work_order_id: None,
            })),
        ]
    }

    /// Events with timestamps in a small range so that ties are common.
    fn arb_events() -> impl Strategy<Value = Vec<(i64, EventPayload)>> {
        proptest::collection::vec((0i64..30, arb_payload()), 0..60)
    }

    fn run<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime")
            .block_on(f)
    }

    proptest! {
        #[test]
        fn prop_snapshot_matches_reference_fold(events in arb_events(), at in -1i64..32) {
            let store = store_with(events);
            let logged = store.all_events();
            let reconstructor = SnapshotReconstructor::with_config(
                store,
                SnapshotConfig::default().with_page_size(7),
            );
            let at = t0() + Duration::seconds(at);

            let snapshot = run(reconstructor.snapshot_at(at)).unwrap();

            prop_assert_eq!(project(&snapshot), reference_fold(&logged, at));
        }

        #[test]
        fn prop_snapshots_are_monotonic(events in arb_events(), a in 0i64..30, b in 0i64..30) {
            let (t1, t2) = (a.min(b), a.max(b));
            let reconstructor = SnapshotReconstructor::new(store_with(events));

            let s1 = run(reconstructor.snapshot_at(t0() + Duration::seconds(t1))).unwrap();
            let s2 = run(reconstructor.snapshot_at(t0() + Duration::seconds(t2))).unwrap();

            for (id, sensor) in &s1.sensors {
                let later = s2.sensors.get(id);
                prop_assert!(later.is_some());
                prop_assert!(later.unwrap().last_reading >= sensor.last_reading);
            }
            for (id, incident) in &s1.incidents {
                let later = s2.incidents.get(id);
                prop_assert!(later.is_some());
                prop_assert!(later.unwrap().updated_at >= incident.updated_at);
            }
            for (id, order) in &s1.work_orders {
                let later = s2.work_orders.get(id);
                prop_assert!(later.is_some());
                prop_assert!(later.unwrap().updated_at >= order.updated_at);
            }
            prop_assert!(s2.events_applied >= s1.events_applied);
        }

        #[test]
        fn prop_incremental_fold_equals_rebuild(events in arb_events()) {
            let store = store_with(events);
            let logged = store.all_events();
            let end = t0() + Duration::seconds(30);

            let mut incremental = SystemSnapshot::empty(end);
            for event in &logged {
                incremental.apply(event);
            }
            let rebuilt = SystemSnapshot::fold(end, &logged);

            prop_assert_eq!(incremental, rebuilt);
        }
    }
}
