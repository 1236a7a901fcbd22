//! CivicPulse Environment Abstraction Layer
//!
//! This crate holds everything the replay engine consumes from the outside
//! world, so that the engine runs against **Production** collaborators
//! (tokio clock, durable event log, WebSocket fan-out) and **Simulation**
//! ones (virtual clock, in-memory log) without change:
//! - Time (`now()`, `wall_clock()`, `sleep()`, `spawn()`)
//! - The event log (`query_events()`, `append_event()`)
//! - The push channel (`publish()`)
//!
//! # Example
//!
//! ```ignore
//! use civicpulse_env::{CivicContext, EventStore, TimeRange};
//!
//! async fn recent_incidents<Ctx: CivicContext>(ctx: &Ctx, store: &dyn EventStore) {
//!     let now = ctx.wall_clock();
//!     let range = TimeRange::new(now - chrono::Duration::hours(1), now);
//!     let events = store.query_events(range, None, 100, 0).await;
//! }
//! ```

mod context;
mod error;
mod push;
mod store;
mod tokio_impl;
mod types;

pub use context::CivicContext;
pub use error::EnvError;
pub use push::PushTransport;
pub use store::EventStore;
pub use tokio_impl::TokioContext;
pub use types::{
    AgentDecision, EventPayload, EventType, GeoPoint, IncidentRecord, IncidentStatus,
    IncidentUpdate, SensorReading, Severity, TimeRange, TimelineEvent, Timestamp,
    WorkOrderRecord, WorkOrderStatus, WorkOrderUpdate,
};
