//! End-to-end demos run by the simulator.

/// Demo identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoId {
    /// Filtered, paged timeline queries
    Timeline,

    /// Snapshot reconstruction at several instants
    Snapshot,

    /// Paced server-side replay stream
    Replay,

    /// Client playback with scrubbing
    Playback,

    /// Live scenario run against the sensor feed
    Scenario,
}

impl DemoId {
    /// Returns a list of all demos.
    pub fn all() -> Vec<DemoId> {
        vec![
            DemoId::Timeline,
            DemoId::Snapshot,
            DemoId::Replay,
            DemoId::Playback,
            DemoId::Scenario,
        ]
    }

    /// Returns the demo name.
    pub fn name(&self) -> &'static str {
        match self {
            DemoId::Timeline => "timeline",
            DemoId::Snapshot => "snapshot",
            DemoId::Replay => "replay",
            DemoId::Playback => "playback",
            DemoId::Scenario => "scenario",
        }
    }

    /// Returns a description of the demo.
    pub fn description(&self) -> &'static str {
        match self {
            DemoId::Timeline => "Incident-only timeline, ascending, pages agree with a single query",
            DemoId::Snapshot => "Snapshots before, during and after the history match a naive fold",
            DemoId::Replay => "Stream the first hour at the requested speed on a virtual clock",
            DemoId::Playback => "Scrub, play to the end, compare with a fresh reconstruction",
            DemoId::Scenario => "Trigger a catalog scenario, reject a second, verify revert and incidents",
        }
    }
}

impl std::fmt::Display for DemoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for DemoId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "timeline" | "query" => Ok(DemoId::Timeline),
            "snapshot" | "snapshots" => Ok(DemoId::Snapshot),
            "replay" | "stream" => Ok(DemoId::Replay),
            "playback" | "scrub" => Ok(DemoId::Playback),
            "scenario" | "scenarios" => Ok(DemoId::Scenario),
            _ => Err(format!("Unknown demo: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for demo in DemoId::all() {
            assert_eq!(demo.name().parse::<DemoId>(), Ok(demo));
        }
        assert_eq!("STREAM".parse::<DemoId>(), Ok(DemoId::Replay));
        assert!("chaos".parse::<DemoId>().is_err());
    }
}
