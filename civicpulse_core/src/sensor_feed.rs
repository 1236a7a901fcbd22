//! Live sensor feed - the in-process sensor pipeline.
//!
//! Raw readings enter through [`LiveSensorFeed::surface`] and leave with every
//! installed modifier applied in install order. The scenario scheduler is the
//! only writer of the modifier list.

use crate::modifiers::{apply_chain, ModifierHandle, SensorPipeline, SensorSelector, SensorTransform};
use civicpulse_env::SensorReading;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tracing::debug;

struct Installed {
    handle: ModifierHandle,
    selector: SensorSelector,
    transform: SensorTransform,
}

/// Sensor pipeline holding the currently installed modifiers.
pub struct LiveSensorFeed {
    installed: RwLock<Vec<Installed>>,
    next_handle: AtomicU64,
}

impl LiveSensorFeed {
    pub fn new() -> Self {
        Self {
            installed: RwLock::new(Vec::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Returns the reading as it should be surfaced to the dashboard.
    pub fn surface(&self, reading: &SensorReading) -> SensorReading {
        let installed = self.installed.read().unwrap_or_else(|e| e.into_inner());
        let value = apply_chain(
            installed.iter().map(|m| (&m.selector, &m.transform)),
            reading,
        );
        SensorReading {
            value,
            ..reading.clone()
        }
    }

    /// Number of installed modifiers.
    pub fn active_modifiers(&self) -> usize {
        self.installed.read().map(|m| m.len()).unwrap_or(0)
    }
}

impl Default for LiveSensorFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorPipeline for LiveSensorFeed {
    fn install_modifier(&self, selector: SensorSelector, transform: SensorTransform) -> ModifierHandle {
        let handle = ModifierHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        debug!("Installing modifier {:?}: {} -> {:?}", handle, selector, transform);
        let mut installed = self.installed.write().unwrap_or_else(|e| e.into_inner());
        installed.push(Installed {
            handle,
            selector,
            transform,
        });
        handle
    }

    fn uninstall_modifier(&self, handle: ModifierHandle) -> bool {
        let mut installed = self.installed.write().unwrap_or_else(|e| e.into_inner());
        let before = installed.len();
        installed.retain(|m| m.handle != handle);
        before != installed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn water(value: f64) -> SensorReading {
        SensorReading {
            sensor_id: "wl-3".to_string(),
            sensor_type: "water_level".to_string(),
            zone_id: Some("harbor".to_string()),
            value,
            unit: Some("m".to_string()),
        }
    }

    #[test]
    fn test_surface_without_modifiers_is_identity() {
        let feed = LiveSensorFeed::new();
        assert_eq!(feed.surface(&water(1.5)), water(1.5));
    }

    #[test]
    fn test_install_and_uninstall() {
        let feed = LiveSensorFeed::new();
        let double = feed.install_modifier(
            SensorSelector::SensorType("water_level".into()),
            SensorTransform::Multiply { factor: 2.0 },
        );
        let bump = feed.install_modifier(
            SensorSelector::Zone("harbor".into()),
            SensorTransform::Add { delta: 0.5 },
        );
        assert_relative_eq!(feed.surface(&water(1.0)).value, 2.5);

        assert!(feed.uninstall_modifier(double));
        assert!(!feed.uninstall_modifier(double));
        assert_relative_eq!(feed.surface(&water(1.0)).value, 1.5);

        feed.uninstall_modifier(bump);
        assert_eq!(feed.active_modifiers(), 0);
    }
}
