//! JSON exporter for playback runs.
//!
//! Exports the playback cursor's view of the city, frame by frame, for
//! offline inspection or dashboard fixtures.

use civicpulse_core::SystemSnapshot;
use civicpulse_env::{IncidentStatus, TimelineEvent, Timestamp, WorkOrderStatus};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

/// A single frame of playback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimFrame {
    /// Cursor position
    pub time: Timestamp,

    /// Sensors reporting so far
    pub sensors: usize,

    /// Incidents not yet resolved
    pub open_incidents: usize,

    /// Work orders neither completed nor cancelled
    pub active_work_orders: usize,

    /// Events dispatched since the previous frame
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SimEvent>,
}

impl SimFrame {
    /// Summarizes a snapshot at the cursor.
    pub fn from_snapshot(snapshot: &SystemSnapshot, events: Vec<SimEvent>) -> Self {
        Self {
            time: snapshot.timestamp,
            sensors: snapshot.sensors.len(),
            open_incidents: snapshot
                .incidents
                .values()
                .filter(|i| i.status != IncidentStatus::Resolved)
                .count(),
            active_work_orders: snapshot
                .work_orders
                .values()
                .filter(|w| !matches!(w.status, WorkOrderStatus::Completed | WorkOrderStatus::Cancelled))
                .count(),
            events,
        }
    }
}

/// A dispatched event, flattened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimEvent {
    pub time: Timestamp,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

impl From<&TimelineEvent> for SimEvent {
    fn from(event: &TimelineEvent) -> Self {
        Self {
            time: event.timestamp,
            event_type: event.event_type.name().to_string(),
            entity_id: event.payload.entity_id().map(str::to_string),
        }
    }
}

/// Complete playback export.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimExport {
    /// Demo name
    pub demo: String,

    /// Seed used
    pub seed: u64,

    pub window_start: Timestamp,
    pub window_end: Timestamp,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    /// State at the end of playback
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_snapshot: Option<SystemSnapshot>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(demo: &str, seed: u64, window_start: Timestamp, window_end: Timestamp) -> Self {
        Self {
            demo: demo.to_string(),
            seed,
            window_start,
            window_end,
            frames: Vec::new(),
            passed: false,
            final_snapshot: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, snapshot: Option<SystemSnapshot>) {
        self.passed = passed;
        self.final_snapshot = snapshot;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use civicpulse_env::{EventPayload, IncidentRecord, Severity};

    #[test]
    fn test_frame_counts_open_incidents() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let created = TimelineEvent::new(
            t,
            EventPayload::IncidentCreated(IncidentRecord {
                incident_id: "inc-1".to_string(),
                incident_type: "pothole".to_string(),
                category: "infrastructure".to_string(),
                severity: Severity::Low,
                status: IncidentStatus::Open,
                description: "Pothole".to_string(),
                location: None,
                priority_score: None,
                source: None,
            }),
        );
        let resolved = TimelineEvent::new(
            t,
            EventPayload::IncidentResolved {
                incident_id: "inc-1".to_string(),
                resolution: None,
            },
        );

        let open = SystemSnapshot::fold(t, [&created]);
        let frame = SimFrame::from_snapshot(&open, vec![SimEvent::from(&created)]);
        assert_eq!(frame.open_incidents, 1);
        assert_eq!(frame.events[0].entity_id.as_deref(), Some("inc-1"));

        let closed = SystemSnapshot::fold(t, [&created, &resolved]);
        assert_eq!(SimFrame::from_snapshot(&closed, vec![]).open_incidents, 0);
    }

    #[test]
    fn test_export_serializes() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut export = SimExport::new("playback", 42, t, t);
        export.add_frame(SimFrame::from_snapshot(&SystemSnapshot::empty(t), vec![]));
        export.finalize(true, None);

        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["demo"], "playback");
        assert_eq!(json["frames"].as_array().map(Vec::len), Some(1));
        assert!(json.get("finalSnapshot").is_none());
    }
}
