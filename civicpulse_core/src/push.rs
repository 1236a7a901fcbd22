//! In-process push fan-out for scenario notifications and replay frames.

use async_trait::async_trait;
use civicpulse_env::{EnvError, PushTransport};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Channel names used on the push transport.
pub mod channels {
    pub const SCENARIO_STARTED: &str = "scenario.started";
    pub const SCENARIO_STOPPED: &str = "scenario.stopped";
    pub const SCENARIO_COMPLETED: &str = "scenario.completed";
    pub const SCENARIO_INCIDENT: &str = "scenario.incident";
    pub const REPLAY_FRAME: &str = "replay.frame";
}

/// A message as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub channel: String,
    pub body: serde_json::Value,
}

/// Broadcast-channel implementation of [`PushTransport`].
///
/// Stands in for the dashboard's WebSocket hub: every subscriber sees every
/// message published after it subscribed.
pub struct BroadcastPush {
    tx: broadcast::Sender<PushMessage>,
}

impl BroadcastPush {
    /// Creates a hub retaining up to `capacity` undelivered messages per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribes to every channel.
    pub fn subscribe(&self) -> broadcast::Receiver<PushMessage> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastPush {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl PushTransport for BroadcastPush {
    async fn publish(&self, channel: &str, message: serde_json::Value) -> Result<usize, EnvError> {
        self.tx
            .send(PushMessage {
                channel: channel.to_string(),
                body: message,
            })
            .map_err(|_| EnvError::TransportClosed(format!("no subscribers on {}", channel)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let push = BroadcastPush::default();
        let mut rx = push.subscribe();

        let delivered = push
            .publish(channels::SCENARIO_STARTED, serde_json::json!({ "id": "flood" }))
            .await
            .unwrap();
        assert_eq!(delivered, 1);

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.channel, "scenario.started");
        assert_eq!(msg.body["id"], "flood");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_an_error() {
        let push = BroadcastPush::default();
        let result = push.publish(channels::REPLAY_FRAME, serde_json::Value::Null).await;
        assert!(matches!(result, Err(EnvError::TransportClosed(_))));
    }
}
