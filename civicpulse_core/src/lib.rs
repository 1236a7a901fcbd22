//! CivicPulse Core - Temporal Replay and Scenario Simulation
//!
//! This library answers two questions for the city operations dashboard:
//! 1. **What did the city look like at time T?** Timeline queries and
//!    snapshot reconstruction over the append-only event log, plus paced
//!    server-side replay and client-side playback.
//! 2. **What happens if a flood hits now?** A scenario scheduler that, for a
//!    bounded duration, perturbs live sensor values and injects delayed
//!    synthetic incidents, with at most one scenario active at a time.

pub mod catalog;
pub mod config;
pub mod error;
pub mod memory_store;
pub mod modifiers;
pub mod playback;
pub mod push;
pub mod replay_stream;
pub mod scheduler;
pub mod sensor_feed;
pub mod sled_store;
pub mod snapshot;
pub mod timeline;
pub mod timer;

// Re-export key types for convenience
pub use catalog::{IncidentTemplate, ScenarioCatalog, ScenarioDefinition};
pub use config::{
    EngineConfig, PlaybackConfig, ReplayConfig, SchedulerConfig, SnapshotConfig, TimelineConfig,
};
pub use error::{CatalogError, ErrorClass, ReplayError, ScenarioError};
pub use memory_store::MemoryEventStore;
pub use modifiers::{ModifierHandle, SensorModifier, SensorPipeline, SensorSelector, SensorTransform};
pub use playback::{PlaybackController, ReplaySession};
pub use push::{channels, BroadcastPush, PushMessage};
pub use replay_stream::{ReplayFrame, ReplayRequest, ReplayStream, ReplayStreamController, StreamState};
pub use scheduler::{ActiveScenarioRun, RunStatus, ScenarioScheduler, ScenarioStatus, SchedulerBuilder};
pub use sensor_feed::LiveSensorFeed;
pub use sled_store::SledEventStore;
pub use snapshot::{IncidentState, SensorState, SnapshotReconstructor, SystemSnapshot, WorkOrderState};
pub use timeline::{TimelineQuery, TimelineRequest, TypeFilter};
pub use timer::{DeferredTask, TimerSet};
