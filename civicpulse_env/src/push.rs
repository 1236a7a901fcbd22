//! Push transport abstraction (dashboard live channel).

use async_trait::async_trait;
use crate::error::EnvError;

/// Fan-out channel to connected dashboard clients.
///
/// The WebSocket transport itself lives outside this workspace; the engine
/// only needs to publish JSON messages on named channels.
#[async_trait]
pub trait PushTransport: Send + Sync + 'static {
    /// Publishes a message on `channel`.
    ///
    /// # Returns
    /// * `Ok(n)` - Number of subscribers the message was handed to
    /// * `Err(EnvError::TransportClosed)` - No live channel
    async fn publish(&self, channel: &str, message: serde_json::Value) -> Result<usize, EnvError>;
}
