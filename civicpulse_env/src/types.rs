//! Event model shared by the event log, the replay engine and the scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wall-clock instant carried by every timeline event.
pub type Timestamp = DateTime<Utc>;

/// The four families of events recorded in the city's event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    /// Sensor readings
    Sensor,
    /// Incident lifecycle changes
    Incident,
    /// Work-order lifecycle changes
    WorkOrder,
    /// Agent reasoning traces (not part of system state)
    Agent,
}

impl EventType {
    /// Returns the wire name.
    pub fn name(&self) -> &'static str {
        match self {
            EventType::Sensor => "SENSOR",
            EventType::Incident => "INCIDENT",
            EventType::WorkOrder => "WORKORDER",
            EventType::Agent => "AGENT",
        }
    }

    /// Normalizes a loosely spelled type name.
    ///
    /// Case, surrounding whitespace, `_`, `-` and inner spaces are ignored and
    /// plural forms are accepted, so `"work_orders"` and `"WorkOrder"` both
    /// map to [`EventType::WorkOrder`].
    pub fn normalize(raw: &str) -> Option<EventType> {
        let folded: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .flat_map(char::to_uppercase)
            .collect();

        match folded.as_str() {
            "SENSOR" | "SENSORS" | "SENSORREADING" | "SENSORREADINGS" => Some(EventType::Sensor),
            "INCIDENT" | "INCIDENTS" => Some(EventType::Incident),
            "WORKORDER" | "WORKORDERS" => Some(EventType::WorkOrder),
            "AGENT" | "AGENTS" | "AGENTDECISION" | "AGENTDECISIONS" => Some(EventType::Agent),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::normalize(s).ok_or_else(|| format!("Unknown event type: {}", s))
    }
}

/// Incident / work-order severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Incident lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IncidentStatus {
    Open,
    Acknowledged,
    Dispatched,
    Resolved,
}

/// Work-order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkOrderStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Cancelled,
}

/// WGS84 point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// One reading from a city sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub sensor_id: String,
    /// e.g. `water_level`, `temperature`, `air_quality`
    pub sensor_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Full incident record, carried by creation events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentRecord {
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
    /// Origin tag, `scenario:<id>` for synthetic incidents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Partial incident update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentUpdate {
    pub incident_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<IncidentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Full work-order record, carried by creation events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkOrderRecord {
    pub work_order_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    pub title: String,
    pub status: WorkOrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_crew: Option<String>,
}

/// Partial work-order update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkOrderUpdate {
    pub work_order_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkOrderStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_crew: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Severity>,
}

/// A reasoning step logged by one of the dispatch agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDecision {
    /// `analyst`, `planner`, `dispatcher`, ...
    pub agent_type: String,
    pub step: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_order_id: Option<String>,
}

/// Type-specific event body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    SensorReading(SensorReading),
    IncidentCreated(IncidentRecord),
    IncidentUpdated(IncidentUpdate),
    #[serde(rename_all = "camelCase")]
    IncidentResolved {
        incident_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resolution: Option<String>,
    },
    WorkOrderCreated(WorkOrderRecord),
    WorkOrderUpdated(WorkOrderUpdate),
    AgentDecision(AgentDecision),
}

impl EventPayload {
    /// Returns the event family this payload belongs to.
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::SensorReading(_) => EventType::Sensor,
            EventPayload::IncidentCreated(_)
            | EventPayload::IncidentUpdated(_)
            | EventPayload::IncidentResolved { .. } => EventType::Incident,
            EventPayload::WorkOrderCreated(_) | EventPayload::WorkOrderUpdated(_) => {
                EventType::WorkOrder
            }
            EventPayload::AgentDecision(_) => EventType::Agent,
        }
    }

    /// Returns the id of the entity this payload describes, if any.
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            EventPayload::SensorReading(r) => Some(&r.sensor_id),
            EventPayload::IncidentCreated(r) => Some(&r.incident_id),
            EventPayload::IncidentUpdated(u) => Some(&u.incident_id),
            EventPayload::IncidentResolved { incident_id, .. } => Some(incident_id),
            EventPayload::WorkOrderCreated(r) => Some(&r.work_order_id),
            EventPayload::WorkOrderUpdated(u) => Some(&u.work_order_id),
            EventPayload::AgentDecision(_) => None,
        }
    }
}

/// An immutable entry of the event log.
///
/// Ordering key is `(timestamp, sequence)`; the sequence is assigned by the
/// store on append and breaks ties between equal timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// Insertion sequence (0 until appended)
    #[serde(default)]
    pub sequence: u64,

    #[serde(rename = "type")]
    pub event_type: EventType,

    pub timestamp: Timestamp,

    pub payload: EventPayload,
}

impl TimelineEvent {
    /// Creates an unsequenced event; the type is derived from the payload.
    pub fn new(timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            sequence: 0,
            event_type: payload.event_type(),
            timestamp,
            payload,
        }
    }

    /// Returns the ordering key.
    pub fn order_key(&self) -> (Timestamp, u64) {
        (self.timestamp, self.sequence)
    }
}

/// Inclusive time window `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeRange {
    /// Creates a window. No ordering check; callers validate.
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Window covering a single instant.
    pub fn at(instant: Timestamp) -> Self {
        Self::new(instant, instant)
    }

    /// Returns true if `t` lies inside the window (both ends inclusive).
    pub fn contains(&self, t: Timestamp) -> bool {
        self.start <= t && t <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_normalization() {
        assert_eq!(EventType::normalize("INCIDENT"), Some(EventType::Incident));
        assert_eq!(EventType::normalize(" incidents "), Some(EventType::Incident));
        assert_eq!(EventType::normalize("work_order"), Some(EventType::WorkOrder));
        assert_eq!(EventType::normalize("WorkOrders"), Some(EventType::WorkOrder));
        assert_eq!(EventType::normalize("agent-decision"), Some(EventType::Agent));
        assert_eq!(EventType::normalize("weather"), None);
        assert_eq!(EventType::normalize(""), None);
    }

    #[test]
    fn test_event_type_wire_names() {
        let json = serde_json::to_string(&EventType::WorkOrder).unwrap();
        assert_eq!(json, "\"WORKORDER\"");
        let back: EventType = serde_json::from_str("\"SENSOR\"").unwrap();
        assert_eq!(back, EventType::Sensor);
    }

    #[test]
    fn test_event_type_derived_from_payload() {
        let event = TimelineEvent::new(
            Utc::now(),
            EventPayload::IncidentResolved {
                incident_id: "inc-1".to_string(),
                resolution: None,
            },
        );
        assert_eq!(event.event_type, EventType::Incident);
        assert_eq!(event.payload.entity_id(), Some("inc-1"));
    }

    #[test]
    fn test_timeline_event_json_shape() {
        let event = TimelineEvent::new(
            Utc::now(),
            EventPayload::SensorReading(SensorReading {
                sensor_id: "wl-01".to_string(),
                sensor_type: "water_level".to_string(),
                zone_id: Some("riverside".to_string()),
                value: 1.25,
                unit: Some("m".to_string()),
            }),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "SENSOR");
        assert_eq!(value["payload"]["kind"], "sensor_reading");
        assert_eq!(value["payload"]["sensorId"], "wl-01");
    }

    #[test]
    fn test_time_range_inclusive() {
        let start = Utc::now();
        let end = start + chrono::Duration::seconds(10);
        let range = TimeRange::new(start, end);
        assert!(range.contains(start));
        assert!(range.contains(end));
        assert!(!range.contains(end + chrono::Duration::milliseconds(1)));
    }
}
