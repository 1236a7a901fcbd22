//! Engine configuration.
//!
//! Every section has production defaults and `with_*` setters; the whole
//! tree deserializes from JSON with missing fields falling back to defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeline query limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Hard ceiling on `limit` (default: 1000)
    pub max_limit: usize,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self { max_limit: 1000 }
    }
}

/// Snapshot reconstruction bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// How far before the requested instant events are folded (`None` = whole log)
    #[serde(with = "opt_duration_ms")]
    pub max_lookback: Option<Duration>,

    /// Events fetched per store query while folding
    pub page_size: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_lookback: Some(Duration::from_secs(7 * 24 * 3600)),
            page_size: 1000,
        }
    }
}

impl SnapshotConfig {
    /// Sets the look-back window.
    pub fn with_lookback(mut self, lookback: Option<Duration>) -> Self {
        self.max_lookback = lookback;
        self
    }

    /// Sets the fold page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

/// Server-side replay stream limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub min_speed: f64,
    pub max_speed: f64,

    /// Cap on events buffered for one stream (default: 10 000)
    pub max_stream_events: usize,

    /// Frames queued towards a slow client before pacing waits
    pub frame_buffer: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            min_speed: 0.5,
            max_speed: 10.0,
            max_stream_events: 10_000,
            frame_buffer: 64,
        }
    }
}

impl ReplayConfig {
    /// Clamps a requested playback speed into `[min_speed, max_speed]`.
    ///
    /// Non-finite requests fall back to real time (1.0).
    ///
    /// Never panics: with inverted or NaN bounds (rejected by
    /// [`ReplayConfig::validate`]) the upper bound wins.
    pub fn clamp_speed(&self, requested: f64) -> f64 {
        let requested = if requested.is_finite() { requested } else { 1.0 };
        requested.max(self.min_speed).min(self.max_speed)
    }

    /// Checks that the speed bounds are finite, positive and ordered, and
    /// that the stream cap is usable.
    pub fn validate(&self) -> Result<(), String> {
        let finite_positive = |v: f64| v.is_finite() && v > 0.0;
        if !finite_positive(self.min_speed) || !finite_positive(self.max_speed) {
            return Err(format!(
                "speed bounds must be finite and positive (min {}, max {})",
                self.min_speed, self.max_speed
            ));
        }
        if self.min_speed > self.max_speed {
            return Err(format!(
                "min_speed {} exceeds max_speed {}",
                self.min_speed, self.max_speed
            ));
        }
        if self.max_stream_events == 0 || self.max_stream_events == usize::MAX {
            return Err(format!("max_stream_events {} out of range", self.max_stream_events));
        }
        Ok(())
    }
}

/// Client playback loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    #[serde(with = "duration_ms")]
    pub tick_interval: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
        }
    }
}

/// Scenario scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Command channel depth
    pub command_buffer: usize,

    /// Finished runs kept for `history()`
    pub history_len: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            command_buffer: 64,
            history_len: 32,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub timeline: TimelineConfig,
    pub snapshot: SnapshotConfig,
    pub replay: ReplayConfig,
    pub playback: PlaybackConfig,
    pub scheduler: SchedulerConfig,
}

impl EngineConfig {
    /// Parses and validates a JSON config document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: Self = serde_json::from_str(json)?;
        config
            .validate()
            .map_err(<serde_json::Error as serde::de::Error>::custom)?;
        Ok(config)
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        self.replay.validate()?;
        if self.snapshot.page_size == 0 {
            return Err("snapshot.page_size must be positive".to_string());
        }
        if self.playback.tick_interval.is_zero() {
            return Err("playback.tick_interval must be positive".to_string());
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod opt_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_clamping() {
        let config = ReplayConfig::default();
        assert_eq!(config.clamp_speed(0.1), 0.5);
        assert_eq!(config.clamp_speed(2.0), 2.0);
        assert_eq!(config.clamp_speed(50.0), 10.0);
        assert_eq!(config.clamp_speed(f64::NAN), 1.0);
    }

    #[test]
    fn test_inverted_speed_bounds_do_not_panic() {
        let config = ReplayConfig {
            min_speed: 5.0,
            max_speed: 1.0,
            ..ReplayConfig::default()
        };
        assert_eq!(config.clamp_speed(2.0), 1.0);
        assert!(config.validate().is_err());

        let nan = ReplayConfig {
            min_speed: f64::NAN,
            ..ReplayConfig::default()
        };
        assert_eq!(nan.clamp_speed(20.0), 10.0);
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_invalid_json_config_is_rejected() {
        for json in [
            r#"{ "replay": { "min_speed": 5.0, "max_speed": 1.0 } }"#,
            r#"{ "replay": { "min_speed": -1.0 } }"#,
            r#"{ "replay": { "max_stream_events": 0 } }"#,
            r#"{ "replay": { "max_stream_events": 18446744073709551615 } }"#,
            r#"{ "snapshot": { "page_size": 0 } }"#,
            r#"{ "playback": { "tick_interval": 0 } }"#,
        ] {
            assert!(EngineConfig::from_json(json).is_err(), "{}", json);
        }
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(
            r#"{ "timeline": { "max_limit": 250 }, "snapshot": { "max_lookback": null } }"#,
        )
        .unwrap();

        assert_eq!(config.timeline.max_limit, 250);
        assert_eq!(config.snapshot.max_lookback, None);
        assert_eq!(config.snapshot.page_size, 1000);
        assert_eq!(config.replay.max_stream_events, 10_000);
        assert_eq!(config.playback.tick_interval, Duration::from_millis(100));
    }
}
