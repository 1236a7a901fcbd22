//! Scenario Modifier Registry - the static catalog of scenario definitions.

use crate::error::{CatalogError, ScenarioError};
use crate::modifiers::{SensorModifier, SensorSelector, SensorTransform};
use civicpulse_env::{GeoPoint, Severity};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest duration or incident delay a definition may declare (30 days).
pub const MAX_SCENARIO_MS: u64 = 30 * 24 * 60 * 60 * 1000;

/// A synthetic incident fired `delay_ms` after a scenario starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentTemplate {
    #[serde(rename = "type")]
    pub incident_type: String,
    pub category: String,
    pub delay_ms: u64,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
}

impl IncidentTemplate {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// A named, time-bounded perturbation of the city.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub sensor_modifiers: Vec<SensorModifier>,
    #[serde(default)]
    pub triggered_incidents: Vec<IncidentTemplate>,
}

impl ScenarioDefinition {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        let invalid = |reason: String| CatalogError::InvalidDefinition {
            id: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(invalid("empty id".to_string()));
        }
        if self.duration_ms == 0 {
            return Err(invalid("duration must be positive".to_string()));
        }
        if self.duration_ms > MAX_SCENARIO_MS {
            return Err(invalid(format!(
                "duration {}ms exceeds {}ms",
                self.duration_ms, MAX_SCENARIO_MS
            )));
        }
        if let Some(late) = self
            .triggered_incidents
            .iter()
            .find(|t| t.delay_ms > MAX_SCENARIO_MS)
        {
            return Err(invalid(format!(
                "incident '{}' delay {}ms exceeds {}ms",
                late.incident_type, late.delay_ms, MAX_SCENARIO_MS
            )));
        }
        for modifier in &self.sensor_modifiers {
            modifier.transform.validate().map_err(invalid)?;
        }
        Ok(())
    }
}

/// Read-only scenario catalog, loaded once at process start.
#[derive(Debug, Clone, Default)]
pub struct ScenarioCatalog {
    definitions: Vec<ScenarioDefinition>,
}

impl ScenarioCatalog {
    /// Builds a catalog, rejecting duplicate ids and unusable definitions.
    pub fn new(definitions: Vec<ScenarioDefinition>) -> Result<Self, CatalogError> {
        for (i, definition) in definitions.iter().enumerate() {
            definition.validate()?;
            if definitions[..i].iter().any(|d| d.id == definition.id) {
                return Err(CatalogError::DuplicateId(definition.id.clone()));
            }
        }
        Ok(Self { definitions })
    }

    /// Parses a JSON array of definitions.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let definitions: Vec<ScenarioDefinition> = serde_json::from_str(json)?;
        Self::new(definitions)
    }

    /// Looks up a definition by id.
    pub fn definition(&self, id: &str) -> Result<&ScenarioDefinition, ScenarioError> {
        self.definitions
            .iter()
            .find(|d| d.id == id)
            .ok_or_else(|| ScenarioError::NotFound(id.to_string()))
    }

    /// All definitions in catalog order.
    pub fn definitions(&self) -> &[ScenarioDefinition] {
        &self.definitions
    }

    /// The scenarios shipped with the dashboard.
    pub fn builtin() -> Self {
        Self {
            definitions: vec![flood(), fire(), power_outage(), heatwave()],
        }
    }
}

fn incident(
    incident_type: &str,
    category: &str,
    delay_ms: u64,
    severity: Severity,
    description: &str,
    location: Option<GeoPoint>,
) -> IncidentTemplate {
    IncidentTemplate {
        incident_type: incident_type.to_string(),
        category: category.to_string(),
        delay_ms,
        severity,
        description: description.to_string(),
        location,
    }
}

fn flood() -> ScenarioDefinition {
    let riverside = Some(GeoPoint { lat: 40.7061, lng: -74.0087 });
    ScenarioDefinition {
        id: "flood".to_string(),
        name: "Flash Flood".to_string(),
        description: "Heavy rainfall pushes river levels past flood stage".to_string(),
        duration_ms: 300_000,
        sensor_modifiers: vec![
            SensorModifier::new(
                SensorSelector::SensorType("water_level".into()),
                SensorTransform::Multiply { factor: 2.5 },
                "River gauges read 2.5x normal",
            ),
            SensorModifier::new(
                SensorSelector::SensorType("rainfall".into()),
                SensorTransform::Add { delta: 45.0 },
                "Rain gauges +45 mm/h",
            ),
            SensorModifier::new(
                SensorSelector::Zone("riverside".into()),
                SensorTransform::Multiply { factor: 0.4 },
                "Traffic on riverside roads drops",
            ),
        ],
        triggered_incidents: vec![
            incident(
                "flood_warning",
                "environmental",
                30_000,
                Severity::High,
                "River level exceeded flood stage near the embankment",
                riverside,
            ),
            incident(
                "road_closure",
                "traffic",
                120_000,
                Severity::Medium,
                "Underpass flooded, road closed",
                riverside,
            ),
        ],
    }
}

fn fire() -> ScenarioDefinition {
    let warehouse = Some(GeoPoint { lat: 40.7306, lng: -73.9352 });
    ScenarioDefinition {
        id: "fire".to_string(),
        name: "Industrial Fire".to_string(),
        description: "Warehouse fire degrading air quality downwind".to_string(),
        duration_ms: 180_000,
        sensor_modifiers: vec![
            SensorModifier::new(
                SensorSelector::SensorType("air_quality".into()),
                SensorTransform::Multiply { factor: 4.0 },
                "AQI spikes downwind",
            ),
            SensorModifier::new(
                SensorSelector::SensorType("air_quality".into()),
                SensorTransform::Clamp { min: 0.0, max: 500.0 },
                "AQI scale tops out at 500",
            ),
            SensorModifier::new(
                SensorSelector::Zone("industrial".into()),
                SensorTransform::Add { delta: 18.0 },
                "Ambient temperature rises near the blaze",
            ),
        ],
        triggered_incidents: vec![
            incident(
                "structure_fire",
                "emergency",
                10_000,
                Severity::Critical,
                "Smoke and flames reported at warehouse",
                warehouse,
            ),
            incident(
                "air_quality_alert",
                "environmental",
                60_000,
                Severity::High,
                "Hazardous air quality downwind of fire",
                None,
            ),
        ],
    }
}

fn power_outage() -> ScenarioDefinition {
    ScenarioDefinition {
        id: "power_outage".to_string(),
        name: "Grid Outage".to_string(),
        description: "Substation failure blacks out downtown".to_string(),
        duration_ms: 240_000,
        sensor_modifiers: vec![
            SensorModifier::new(
                SensorSelector::SensorType("power_load".into()),
                SensorTransform::Set { value: 0.0 },
                "Feeders report zero load",
            ),
            SensorModifier::new(
                SensorSelector::SensorType("traffic_flow".into()),
                SensorTransform::Multiply { factor: 0.6 },
                "Signals dark, traffic slows",
            ),
        ],
        triggered_incidents: vec![
            incident(
                "power_failure",
                "utilities",
                5_000,
                Severity::Critical,
                "Substation 4 offline",
                None,
            ),
            incident(
                "traffic_signal_outage",
                "traffic",
                45_000,
                Severity::High,
                "Signals dark along Main St corridor",
                None,
            ),
            // Fires after the outage window has closed
            incident(
                "restoration_inspection",
                "utilities",
                300_000,
                Severity::Low,
                "Post-restoration inspection of substation 4",
                None,
            ),
        ],
    }
}

fn heatwave() -> ScenarioDefinition {
    ScenarioDefinition {
        id: "heatwave".to_string(),
        name: "Heatwave".to_string(),
        description: "Sustained extreme heat stressing grid and residents".to_string(),
        duration_ms: 600_000,
        sensor_modifiers: vec![
            SensorModifier::new(
                SensorSelector::SensorType("temperature".into()),
                SensorTransform::Add { delta: 12.0 },
                "+12 C across the city",
            ),
            SensorModifier::new(
                SensorSelector::SensorType("power_load".into()),
                SensorTransform::Multiply { factor: 1.35 },
                "Air-conditioning demand",
            ),
        ],
        triggered_incidents: vec![incident(
            "heat_advisory",
            "public_health",
            60_000,
            Severity::Medium,
            "Cooling centers opening",
            None,
        )],
    }
}
