//! Replay Stream Controller - timed server-side delivery of a fetched window.
//!
//! A stream fetches its window once, then a pacing task emits each event when
//! `(event.timestamp - window_start) / speed` has elapsed on the context's
//! monotonic clock. The pacing task sleeps until the next target instead of
//! polling on a tick, so which events have fired by a given instant depends
//! only on the clock.

use crate::config::ReplayConfig;
use crate::error::ReplayError;
use crate::push::channels;
use crate::timeline::{validate_window, TypeFilter};
use civicpulse_env::{CivicContext, EventStore, PushTransport, TimelineEvent, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Parameters of one replay stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayRequest {
    pub window_start: Timestamp,
    pub window_end: Timestamp,
    /// Playback speed multiplier, clamped on open
    pub speed: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<String>>,
}

impl ReplayRequest {
    pub fn new(window_start: Timestamp, window_end: Timestamp) -> Self {
        Self {
            window_start,
            window_end,
            speed: 1.0,
            types: None,
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types = Some(types.into_iter().map(Into::into).collect());
        self
    }
}

/// One message delivered to the stream's consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum ReplayFrame {
    Event {
        index: usize,
        total: usize,
        event: TimelineEvent,
    },
    /// Terminal marker after the last event
    Complete { emitted: usize },
}

/// Stream lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamState {
    Fetching,
    Streaming,
    Completed,
    Cancelled,
}

impl StreamState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamState::Completed | StreamState::Cancelled)
    }
}

/// Opens replay streams against the event store.
pub struct ReplayStreamController<Ctx: CivicContext> {
    ctx: Arc<Ctx>,
    store: Arc<dyn EventStore>,
    push: Option<Arc<dyn PushTransport>>,
    config: ReplayConfig,
}

impl<Ctx: CivicContext> ReplayStreamController<Ctx> {
    pub fn new(ctx: Arc<Ctx>, store: Arc<dyn EventStore>) -> Self {
        Self {
            ctx,
            store,
            push: None,
            config: ReplayConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ReplayConfig) -> Self {
        self.config = config;
        self
    }

    /// Mirrors every emitted frame on the `replay.frame` push channel.
    pub fn with_push(mut self, push: Arc<dyn PushTransport>) -> Self {
        self.push = Some(push);
        self
    }

    /// Validates the request, fetches the window and starts pacing.
    ///
    /// Validation and fetch errors are returned here; once a stream is
    /// returned it never touches the store again.
    pub async fn open(&self, request: &ReplayRequest) -> Result<ReplayStream, ReplayError> {
        let range = validate_window(request.window_start, request.window_end)?;
        let filter = TypeFilter::parse_optional(request.types.as_deref())?;
        let speed = self.config.clamp_speed(request.speed);
        let id = Uuid::new_v4();

        let (state_tx, state_rx) = watch::channel(StreamState::Fetching);

        let cap = self.config.max_stream_events.max(1);
        let mut events = self
            .store
            .query_events(range, filter.as_ref().map(TypeFilter::types), cap.saturating_add(1), 0)
            .await
            .map_err(|e| ReplayError::store("fetching replay window", e))?;
        if events.len() > cap {
            warn!(
                "Replay stream {} truncated to {} events (window {} .. {})",
                id, cap, range.start, range.end
            );
            events.truncate(cap);
        }

        debug!(
            "Replay stream {} opened: {} events at {}x",
            id,
            events.len(),
            speed
        );

        let total = events.len();
        let (frames_tx, frames_rx) = mpsc::channel(self.config.frame_buffer.max(1));
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let pacer = Pacer {
            id,
            ctx: Arc::clone(&self.ctx),
            push: self.push.clone(),
            window_start: range.start,
            speed,
            frames: frames_tx,
            state: state_tx,
            cancel: cancel_rx,
        };
        let task = self.ctx.spawn("replay-stream", pacer.run(events));

        Ok(ReplayStream {
            id,
            speed,
            total,
            frames: frames_rx,
            state: state_rx,
            cancel: cancel_tx,
            task: Some(task),
        })
    }
}

/// Consumer side of one replay stream.
///
/// Both [`ReplayStream::cancel`] and dropping the stream stop the pacing
/// task; no further frames are produced afterwards.
pub struct ReplayStream {
    id: Uuid,
    speed: f64,
    total: usize,
    frames: mpsc::Receiver<ReplayFrame>,
    state: watch::Receiver<StreamState>,
    cancel: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ReplayStream {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The effective (clamped) speed.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Number of events buffered for this stream.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// A receiver observing state transitions.
    pub fn watch_state(&self) -> watch::Receiver<StreamState> {
        self.state.clone()
    }

    /// Waits for the next frame; `None` once the stream has ended.
    pub async fn next_frame(&mut self) -> Option<ReplayFrame> {
        self.frames.recv().await
    }

    /// Halts the stream and waits for the pacing task to exit.
    ///
    /// Idempotent: cancelling a completed or already-cancelled stream is a
    /// no-op and leaves its state unchanged.
    pub async fn cancel(&mut self) {
        let _ = self.cancel.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
            debug!("Replay stream {} ended as {:?}", self.id, self.state());
        }
    }
}

struct Pacer<Ctx: CivicContext> {
    id: Uuid,
    ctx: Arc<Ctx>,
    push: Option<Arc<dyn PushTransport>>,
    window_start: Timestamp,
    speed: f64,
    frames: mpsc::Sender<ReplayFrame>,
    state: watch::Sender<StreamState>,
    cancel: watch::Receiver<bool>,
}

impl<Ctx: CivicContext> Pacer<Ctx> {
    async fn run(mut self, events: Vec<TimelineEvent>) {
        self.state.send_replace(StreamState::Streaming);
        let started = self.ctx.now();
        let total = events.len();

        for (index, event) in events.into_iter().enumerate() {
            let target = self.target_offset(event.timestamp);
            let elapsed = self.ctx.now().saturating_sub(started);
            if target > elapsed {
                tokio::select! {
                    _ = self.ctx.sleep(target - elapsed) => {}
                    _ = cancelled(&mut self.cancel) => return self.finish(StreamState::Cancelled, index),
                }
            }

            self.mirror(index, total, &event).await;

            let frame = ReplayFrame::Event { index, total, event };
            tokio::select! {
                sent = self.frames.send(frame) => {
                    if sent.is_err() {
                        // consumer went away
                        return self.finish(StreamState::Cancelled, index);
                    }
                }
                _ = cancelled(&mut self.cancel) => return self.finish(StreamState::Cancelled, index),
            }
        }

        let _ = self.frames.send(ReplayFrame::Complete { emitted: total }).await;
        self.finish(StreamState::Completed, total);
    }

    /// Monotonic offset from stream start at which an event is due.
    fn target_offset(&self, timestamp: Timestamp) -> Duration {
        let offset = (timestamp - self.window_start)
            .to_std()
            .unwrap_or(Duration::ZERO);
        Duration::from_secs_f64(offset.as_secs_f64() / self.speed)
    }

    async fn mirror(&self, index: usize, total: usize, event: &TimelineEvent) {
        let Some(push) = &self.push else {
            return;
        };
        let body = serde_json::json!({
            "streamId": self.id,
            "index": index,
            "total": total,
            "event": event,
        });
        if let Err(e) = push.publish(channels::REPLAY_FRAME, body).await {
            debug!("Replay frame {} of stream {} not pushed: {}", index, self.id, e);
        }
    }

    fn finish(&self, state: StreamState, emitted: usize) {
        debug!("Replay stream {} {:?} after {} events", self.id, state, emitted);
        self.state.send_replace(state);
    }
}

/// Resolves once cancellation is requested or the handle is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
