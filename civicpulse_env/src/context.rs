//! Core environment context trait for CivicPulse services.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// The central interface for environment interaction.
///
/// This trait abstracts the clock and the task spawner so that the replay
/// engine and the scenario scheduler run unchanged in production (tokio)
/// and in the deterministic simulator.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`
/// - **Simulation**: `SimContext` - manually advanced virtual clock
///
/// # Determinism
///
/// Every timer in the engine goes through [`CivicContext::sleep`] and every
/// elapsed-time measurement through [`CivicContext::now`], so a context with
/// a controlled clock makes scenario runs and replay pacing reproducible.
#[async_trait]
pub trait CivicContext: Send + Sync + 'static {
    /// Returns the monotonic time since context creation.
    ///
    /// Used for stream pacing and scenario elapsed/remaining calculations.
    fn now(&self) -> Duration;

    /// Returns the wall-clock instant used to stamp events.
    ///
    /// In simulation, this is derived from virtual clock + epoch offset.
    fn wall_clock(&self) -> DateTime<Utc>;

    /// Suspends execution for the given duration.
    ///
    /// Must be cancel-safe: dropping the future abandons the wait.
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task and returns its handle.
    ///
    /// The handle is the cancellation token for deferred work: aborting it
    /// guarantees the task body never resumes.
    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static;
}
