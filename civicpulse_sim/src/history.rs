//! Seeded city history generator.
//!
//! Produces a plausible event log for a stretch of city time:
//! - Periodic readings from a fixed sensor fleet (Gaussian noise around a
//!   per-type baseline, with a daily cycle for temperature and traffic)
//! - Incidents arriving as a Poisson process, each walked through its
//!   lifecycle: acknowledged, triaged by an agent, dispatched to a crew,
//!   worked and resolved
//!
//! The same seed and config always yield the same events.

use chrono::Duration as ChronoDuration;
use civicpulse_env::{
    AgentDecision, EventPayload, GeoPoint, IncidentRecord, IncidentStatus, IncidentUpdate,
    SensorReading, Severity, TimelineEvent, Timestamp, WorkOrderRecord, WorkOrderStatus,
    WorkOrderUpdate,
};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Exp, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// A class of sensor in the simulated fleet.
#[derive(Debug, Clone, Copy)]
struct SensorProfile {
    sensor_type: &'static str,
    zone: &'static str,
    unit: &'static str,
    baseline: f64,
    noise_std: f64,
    /// Peak-to-baseline swing over a day (0 = flat)
    daily_swing: f64,
}

const SENSOR_PROFILES: &[SensorProfile] = &[
    SensorProfile { sensor_type: "water_level", zone: "riverside", unit: "m", baseline: 1.2, noise_std: 0.05, daily_swing: 0.0 },
    SensorProfile { sensor_type: "rainfall", zone: "riverside", unit: "mm/h", baseline: 2.0, noise_std: 1.0, daily_swing: 0.0 },
    SensorProfile { sensor_type: "air_quality", zone: "industrial", unit: "AQI", baseline: 42.0, noise_std: 6.0, daily_swing: 0.15 },
    SensorProfile { sensor_type: "temperature", zone: "downtown", unit: "C", baseline: 21.0, noise_std: 0.8, daily_swing: 0.2 },
    SensorProfile { sensor_type: "power_load", zone: "downtown", unit: "%", baseline: 65.0, noise_std: 4.0, daily_swing: 0.25 },
    SensorProfile { sensor_type: "traffic_flow", zone: "downtown", unit: "veh/h", baseline: 480.0, noise_std: 40.0, daily_swing: 0.5 },
];

/// An incident kind the generator can raise.
struct IncidentKind {
    incident_type: &'static str,
    category: &'static str,
    description: &'static str,
    crew: &'static str,
}

const INCIDENT_KINDS: &[IncidentKind] = &[
    IncidentKind { incident_type: "pothole", category: "infrastructure", description: "Pothole reported in right lane", crew: "roads-2" },
    IncidentKind { incident_type: "water_main_break", category: "utilities", description: "Water main break flooding street", crew: "water-1" },
    IncidentKind { incident_type: "traffic_collision", category: "traffic", description: "Two-vehicle collision blocking intersection", crew: "traffic-3" },
    IncidentKind { incident_type: "streetlight_out", category: "infrastructure", description: "Streetlights out along block", crew: "electric-1" },
    IncidentKind { incident_type: "illegal_dumping", category: "sanitation", description: "Bulk waste dumped on sidewalk", crew: "sanitation-4" },
    IncidentKind { incident_type: "gas_leak", category: "utilities", description: "Residents report smell of gas", crew: "gas-1" },
];

/// Generator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// First instant of generated history
    pub start: Timestamp,

    /// Length of the history in hours
    pub hours: u32,

    /// Sensors of each type
    pub sensors_per_type: usize,

    /// Seconds between readings of one sensor
    pub reading_interval_secs: u32,

    /// Mean incident arrival rate
    pub incidents_per_hour: f64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            start: chrono::DateTime::<chrono::Utc>::default() + ChronoDuration::days(19_723), // 2024-01-01
            hours: 6,
            sensors_per_type: 3,
            reading_interval_secs: 300,
            incidents_per_hour: 2.0,
        }
    }
}

impl HistoryConfig {
    pub fn with_start(mut self, start: Timestamp) -> Self {
        self.start = start;
        self
    }

    pub fn with_hours(mut self, hours: u32) -> Self {
        self.hours = hours;
        self
    }

    pub fn with_incident_rate(mut self, per_hour: f64) -> Self {
        self.incidents_per_hour = per_hour;
        self
    }

    /// Last instant of generated history.
    pub fn end(&self) -> Timestamp {
        self.start + ChronoDuration::hours(i64::from(self.hours))
    }
}

/// Deterministic event log generator.
pub struct CityHistory {
    rng: ChaCha8Rng,
    config: HistoryConfig,
    next_incident: u64,
    next_work_order: u64,
}

impl CityHistory {
    /// Creates a generator seeded from `seed`.
    pub fn new(seed: u64, config: HistoryConfig) -> Self {
        Self::from_rng(ChaCha8Rng::seed_from_u64(seed), config)
    }

    /// Creates a generator drawing from an existing stream.
    pub fn from_rng(rng: ChaCha8Rng, config: HistoryConfig) -> Self {
        Self {
            rng,
            config,
            next_incident: 1,
            next_work_order: 1,
        }
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Generates the full history, ordered by timestamp.
    ///
    /// Lifecycle steps that would land after the end of the window are
    /// dropped, leaving those incidents open.
    pub fn generate(&mut self) -> Vec<TimelineEvent> {
        let mut events = self.sensor_readings();
        events.extend(self.incidents());
        events.retain(|e| e.timestamp <= self.config.end());
        // stable: equal timestamps keep generation order
        events.sort_by_key(|e| e.timestamp);
        events
    }

    fn sensor_readings(&mut self) -> Vec<TimelineEvent> {
        let interval = i64::from(self.config.reading_interval_secs.max(1));
        let total_secs = i64::from(self.config.hours) * 3600;
        let mut events = Vec::new();

        let mut offset = 0;
        while offset <= total_secs {
            let at = self.config.start + ChronoDuration::seconds(offset);
            let day_phase = (offset % 86_400) as f64 / 86_400.0;

            for profile in SENSOR_PROFILES {
                for n in 1..=self.config.sensors_per_type {
                    // Peaks mid-afternoon, trough before dawn
                    let cycle = 1.0 + profile.daily_swing * (2.0 * PI * (day_phase - 0.375)).sin();
                    let mean = profile.baseline * cycle;
                    let value = sample_normal(&mut self.rng, mean, profile.noise_std).max(0.0);

                    events.push(TimelineEvent::new(
                        at,
                        EventPayload::SensorReading(SensorReading {
                            sensor_id: format!("{}-{}", profile.sensor_type, n),
                            sensor_type: profile.sensor_type.to_string(),
                            zone_id: Some(profile.zone.to_string()),
                            value: (value * 100.0).round() / 100.0,
                            unit: Some(profile.unit.to_string()),
                        }),
                    ));
                }
            }
            offset += interval;
        }
        events
    }

    fn incidents(&mut self) -> Vec<TimelineEvent> {
        let Ok(arrivals) = Exp::new(self.config.incidents_per_hour / 3600.0) else {
            return Vec::new();
        };
        let horizon = f64::from(self.config.hours) * 3600.0;

        let mut events = Vec::new();
        let mut t = arrivals.sample(&mut self.rng);
        while t < horizon {
            let at = self.config.start + ChronoDuration::milliseconds((t * 1000.0) as i64);
            events.extend(self.incident_lifecycle(at));
            t += arrivals.sample(&mut self.rng);
        }
        events
    }

    fn incident_lifecycle(&mut self, created: Timestamp) -> Vec<TimelineEvent> {
        let kind = INCIDENT_KINDS
            .choose(&mut self.rng)
            .unwrap_or(&INCIDENT_KINDS[0]);
        let severity = *[Severity::Low, Severity::Medium, Severity::Medium, Severity::High, Severity::Critical]
            .choose(&mut self.rng)
            .unwrap_or(&Severity::Medium);
        let incident_id = format!("inc-{:05}", self.next_incident);
        self.next_incident += 1;
        let work_order_id = format!("wo-{:05}", self.next_work_order);
        self.next_work_order += 1;

        let location = GeoPoint {
            lat: 40.70 + self.rng.gen_range(0.0..0.08),
            lng: -74.02 + self.rng.gen_range(0.0..0.10),
        };
        let priority = self.rng.gen_range(0.2..1.0_f64);

        let acknowledged = created + minutes(self.rng.gen_range(1..6));
        let triaged = acknowledged + ChronoDuration::seconds(self.rng.gen_range(5..60));
        let dispatched = triaged + minutes(self.rng.gen_range(1..4));
        let started = dispatched + minutes(self.rng.gen_range(5..21));
        let resolved = started + minutes(self.rng.gen_range(20..100));

        let mut events = vec![
            TimelineEvent::new(
                created,
                EventPayload::IncidentCreated(IncidentRecord {
                    incident_id: incident_id.clone(),
                    incident_type: kind.incident_type.to_string(),
                    category: kind.category.to_string(),
                    severity,
                    status: IncidentStatus::Open,
                    description: kind.description.to_string(),
                    location: Some(location),
                    priority_score: None,
                    source: Some("citizen_report".to_string()),
                }),
            ),
            TimelineEvent::new(
                acknowledged,
                EventPayload::IncidentUpdated(IncidentUpdate {
                    incident_id: incident_id.clone(),
                    status: Some(IncidentStatus::Acknowledged),
                    ..IncidentUpdate::default()
                }),
            ),
            TimelineEvent::new(
                triaged,
                EventPayload::AgentDecision(AgentDecision {
                    agent_type: "triage".to_string(),
                    step: "prioritize".to_string(),
                    data: serde_json::json!({
                        "priorityScore": (priority * 100.0).round() / 100.0,
                        "category": kind.category,
                    }),
                    incident_id: Some(incident_id.clone()),
                    work_order_id: None,
                }),
            ),
            TimelineEvent::new(
                triaged,
                EventPayload::IncidentUpdated(IncidentUpdate {
                    incident_id: incident_id.clone(),
                    priority_score: Some((priority * 100.0).round() / 100.0),
                    ..IncidentUpdate::default()
                }),
            ),
            TimelineEvent::new(
                dispatched,
                EventPayload::WorkOrderCreated(WorkOrderRecord {
                    work_order_id: work_order_id.clone(),
                    incident_id: Some(incident_id.clone()),
                    title: format!("Respond to {}", kind.incident_type.replace('_', " ")),
                    status: WorkOrderStatus::Assigned,
                    priority: Some(severity),
                    assigned_crew: Some(kind.crew.to_string()),
                }),
            ),
            TimelineEvent::new(
                dispatched,
                EventPayload::IncidentUpdated(IncidentUpdate {
                    incident_id: incident_id.clone(),
                    status: Some(IncidentStatus::Dispatched),
                    ..IncidentUpdate::default()
                }),
            ),
            TimelineEvent::new(
                started,
                EventPayload::WorkOrderUpdated(WorkOrderUpdate {
                    work_order_id: work_order_id.clone(),
                    status: Some(WorkOrderStatus::InProgress),
                    ..WorkOrderUpdate::default()
                }),
            ),
            TimelineEvent::new(
                resolved,
                EventPayload::WorkOrderUpdated(WorkOrderUpdate {
                    work_order_id,
                    status: Some(WorkOrderStatus::Completed),
                    ..WorkOrderUpdate::default()
                }),
            ),
        ];
        events.push(TimelineEvent::new(
            resolved,
            EventPayload::IncidentResolved {
                incident_id,
                resolution: Some(format!("Closed by {}", kind.crew)),
            },
        ));
        events
    }
}

fn minutes(n: i64) -> ChronoDuration {
    ChronoDuration::minutes(n)
}

fn sample_normal(rng: &mut ChaCha8Rng, mean: f64, std_dev: f64) -> f64 {
    Normal::new(mean, std_dev)
        .map(|normal| normal.sample(rng))
        .unwrap_or(mean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use civicpulse_env::EventType;
    use proptest::prelude::*;

    fn small() -> HistoryConfig {
        HistoryConfig::default().with_hours(2).with_incident_rate(6.0)
    }

    #[test]
    fn test_history_is_ordered_and_bounded() {
        let config = small();
        let events = CityHistory::new(42, config.clone()).generate();

        assert!(!events.is_empty());
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(events.iter().all(|e| e.timestamp >= config.start && e.timestamp <= config.end()));
    }

    #[test]
    fn test_sensor_fleet_reports_every_interval() {
        let config = HistoryConfig::default().with_hours(1).with_incident_rate(0.0);
        let events = CityHistory::new(1, config.clone()).generate();

        // 13 instants (0..=3600 step 300) x 6 types x 3 sensors
        assert_eq!(events.len(), 13 * SENSOR_PROFILES.len() * config.sensors_per_type);
        assert!(events.iter().all(|e| e.event_type == EventType::Sensor));
    }

    #[test]
    fn test_incident_lifecycle_is_consistent() {
        let mut history = CityHistory::new(9, small());
        let events = history.incident_lifecycle(small().start);

        let created = &events[0];
        assert!(matches!(created.payload, EventPayload::IncidentCreated(_)));
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert!(events.iter().any(|e| e.event_type == EventType::WorkOrder));
        assert!(events.iter().any(|e| e.event_type == EventType::Agent));

        // Work order priority mirrors the incident's severity
        let severity = match &created.payload {
            EventPayload::IncidentCreated(record) => record.severity,
            _ => unreachable!(),
        };
        let work_order = events
            .iter()
            .find_map(|e| match &e.payload {
                EventPayload::WorkOrderCreated(record) => Some(record),
                _ => None,
            })
            .unwrap();
        assert_eq!(work_order.priority, Some(severity));
        assert!(matches!(
            events.last().map(|e| &e.payload),
            Some(EventPayload::IncidentResolved { .. })
        ));
    }

    #[test]
    fn test_zero_rate_means_no_incidents() {
        let config = HistoryConfig::default().with_hours(3).with_incident_rate(0.0);
        let events = CityHistory::new(5, config).generate();
        assert!(events.iter().all(|e| e.event_type == EventType::Sensor));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_same_seed_same_history(seed in any::<u64>()) {
            let a = CityHistory::new(seed, small()).generate();
            let b = CityHistory::new(seed, small()).generate();
            prop_assert_eq!(a, b);
        }
    }
}
