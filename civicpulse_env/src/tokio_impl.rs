//! Production implementation of CivicContext using Tokio.

use crate::CivicContext;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Production context backed by the Tokio timer wheel.
///
/// Monotonic time is read from `tokio::time::Instant`, so a runtime started
/// with a paused clock (tests, and simulator runs without `--realtime`) drives
/// `now()` and `sleep()` consistently. Wall-clock stamps are the creation
/// instant plus monotonic elapsed time, which keeps event timestamps and
/// timer deadlines on the same axis.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,

    /// Wall-clock time at `start`
    epoch: DateTime<Utc>,
}

impl TokioContext {
    /// Creates a new TokioContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            epoch: Utc::now(),
        }
    }

    /// Creates a context whose wall clock starts at a fixed instant.
    pub fn with_epoch(epoch: DateTime<Utc>) -> Self {
        Self {
            start: Instant::now(),
            epoch,
        }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CivicContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn wall_clock(&self) -> DateTime<Utc> {
        self.epoch + chrono::Duration::milliseconds(self.now().as_millis() as i64)
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, _name: &str, future: F) -> JoinHandle<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future)
    }
}
