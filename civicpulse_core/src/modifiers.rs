//! Sensor modifiers - pure numeric transforms applied to live readings while
//! a scenario is active.

use civicpulse_env::SensorReading;
use serde::{Deserialize, Serialize};

/// Which readings a modifier applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum SensorSelector {
    /// Every sensor of a type (e.g. `water_level`)
    SensorType(String),
    /// One sensor
    SensorId(String),
    /// Every sensor in a zone
    Zone(String),
}

impl SensorSelector {
    /// Returns true if the reading is targeted by this selector.
    pub fn matches(&self, reading: &SensorReading) -> bool {
        match self {
            SensorSelector::SensorType(t) => reading.sensor_type == *t,
            SensorSelector::SensorId(id) => reading.sensor_id == *id,
            SensorSelector::Zone(zone) => reading.zone_id.as_deref() == Some(zone.as_str()),
        }
    }
}

impl std::fmt::Display for SensorSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorSelector::SensorType(t) => write!(f, "type={}", t),
            SensorSelector::SensorId(id) => write!(f, "sensor={}", id),
            SensorSelector::Zone(zone) => write!(f, "zone={}", zone),
        }
    }
}

/// A pure numeric transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SensorTransform {
    Multiply { factor: f64 },
    Add { delta: f64 },
    Clamp { min: f64, max: f64 },
    Set { value: f64 },
}

impl SensorTransform {
    /// Applies the transform.
    pub fn apply(&self, value: f64) -> f64 {
        match *self {
            SensorTransform::Multiply { factor } => value * factor,
            SensorTransform::Add { delta } => value + delta,
            // f64::clamp panics on min > max; catalogs are validated on load
            SensorTransform::Clamp { min, max } => value.max(min).min(max),
            SensorTransform::Set { value: fixed } => fixed,
        }
    }

    /// Checks parameters; returns a reason when unusable.
    pub fn validate(&self) -> Result<(), String> {
        let finite = |x: f64, name: &str| {
            if x.is_finite() {
                Ok(())
            } else {
                Err(format!("{} must be finite", name))
            }
        };
        match *self {
            SensorTransform::Multiply { factor } => finite(factor, "factor"),
            SensorTransform::Add { delta } => finite(delta, "delta"),
            SensorTransform::Set { value } => finite(value, "value"),
            SensorTransform::Clamp { min, max } => {
                finite(min, "min")?;
                finite(max, "max")?;
                if min > max {
                    return Err(format!("clamp min {} exceeds max {}", min, max));
                }
                Ok(())
            }
        }
    }
}

/// One entry of a scenario's modifier list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorModifier {
    pub selector: SensorSelector,
    pub transform: SensorTransform,
    #[serde(default)]
    pub description: String,
}

impl SensorModifier {
    pub fn new(selector: SensorSelector, transform: SensorTransform, description: &str) -> Self {
        Self {
            selector,
            transform,
            description: description.to_string(),
        }
    }
}

/// Applies every matching modifier in order, each consuming the previous output.
pub fn apply_chain<'a, I>(modifiers: I, reading: &SensorReading) -> f64
where
    I: IntoIterator<Item = (&'a SensorSelector, &'a SensorTransform)>,
{
    modifiers
        .into_iter()
        .filter(|(selector, _)| selector.matches(reading))
        .fold(reading.value, |value, (_, transform)| transform.apply(value))
}

/// Opaque handle returned by [`SensorPipeline::install_modifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModifierHandle(pub u64);

/// The live sensor-value pipeline, as seen by the scenario scheduler.
pub trait SensorPipeline: Send + Sync + 'static {
    /// Installs a modifier; later installs apply after earlier ones.
    fn install_modifier(&self, selector: SensorSelector, transform: SensorTransform) -> ModifierHandle;

    /// Removes a modifier. Returns false if the handle was not installed.
    fn uninstall_modifier(&self, handle: ModifierHandle) -> bool;
}
