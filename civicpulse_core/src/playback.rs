//! Client Playback Controller - local replay of buffered events.
//!
//! The client fetches a window once, then advances a cursor through it on a
//! fixed tick. Each tick moves the cursor by `tick_interval * speed`,
//! dispatches the buffered events the cursor has passed and folds them into
//! the session's snapshot. Scrubbing jumps the cursor and re-derives the
//! snapshot from the store.

use crate::config::{PlaybackConfig, ReplayConfig};
use crate::error::ReplayError;
use crate::snapshot::{SnapshotReconstructor, SystemSnapshot};
use crate::timeline::validate_window;
use civicpulse_env::{CivicContext, TimelineEvent, Timestamp};
use serde::Serialize;
use std::ops::ControlFlow;
use std::time::Duration;
use tracing::debug;

/// State of one playback session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaySession {
    pub window_start: Timestamp,
    pub window_end: Timestamp,
    pub cursor_time: Timestamp,
    pub speed_multiplier: f64,
    pub is_playing: bool,
    /// Sorted by `(timestamp, sequence)`
    pub buffered_events: Vec<TimelineEvent>,
    /// State at `cursor_time`
    pub snapshot: SystemSnapshot,
    #[serde(skip)]
    dispatched: usize,
}

impl ReplaySession {
    fn new(
        window_start: Timestamp,
        window_end: Timestamp,
        mut buffered_events: Vec<TimelineEvent>,
        speed: f64,
    ) -> Self {
        buffered_events.sort_by_key(TimelineEvent::order_key);
        Self {
            window_start,
            window_end,
            cursor_time: window_start,
            speed_multiplier: speed,
            is_playing: false,
            buffered_events,
            snapshot: SystemSnapshot::empty(window_start),
            dispatched: 0,
        }
    }

    /// Events not yet dispatched.
    pub fn remaining(&self) -> &[TimelineEvent] {
        &self.buffered_events[self.dispatched..]
    }

    pub fn at_end(&self) -> bool {
        self.cursor_time >= self.window_end
    }

    /// Moves the cursor forward by `elapsed` of wall time.
    fn advance(&mut self, elapsed: Duration) -> Vec<TimelineEvent> {
        let step = chrono::Duration::from_std(elapsed.mul_f64(self.speed_multiplier))
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.cursor_time = (self.cursor_time + step).min(self.window_end);

        let cursor = self.cursor_time;
        let due = self
            .remaining()
            .iter()
            .take_while(|e| e.timestamp <= cursor)
            .count();
        let batch = self.buffered_events[self.dispatched..self.dispatched + due].to_vec();
        self.dispatched += due;

        for event in &batch {
            self.snapshot.apply(event);
        }
        self.snapshot.timestamp = cursor;

        if self.at_end() {
            self.is_playing = false;
        }
        batch
    }
}

/// Drives a single [`ReplaySession`].
pub struct PlaybackController {
    config: PlaybackConfig,
    limits: ReplayConfig,
    session: Option<ReplaySession>,
}

impl PlaybackController {
    pub fn new(config: PlaybackConfig) -> Self {
        Self {
            config,
            limits: ReplayConfig::default(),
            session: None,
        }
    }

    /// Uses the given speed bounds.
    pub fn with_limits(mut self, limits: ReplayConfig) -> Self {
        self.limits = limits;
        self
    }

    pub fn session(&self) -> Option<&ReplaySession> {
        self.session.as_ref()
    }

    pub fn is_playing(&self) -> bool {
        self.session.as_ref().map_or(false, |s| s.is_playing)
    }

    /// Starts a paused session with the cursor at `window_start`.
    ///
    /// Replaces any existing session. The session snapshot starts empty;
    /// scrub to `window_start` to seed it from the store.
    pub fn enter(
        &mut self,
        window_start: Timestamp,
        window_end: Timestamp,
        buffered_events: Vec<TimelineEvent>,
        speed: f64,
    ) -> Result<&ReplaySession, ReplayError> {
        validate_window(window_start, window_end)?;
        let speed = self.limits.clamp_speed(speed);
        debug!(
            "Entering replay {} .. {} with {} buffered events",
            window_start,
            window_end,
            buffered_events.len()
        );
        let session = ReplaySession::new(window_start, window_end, buffered_events, speed);
        Ok(&*self.session.insert(session))
    }

    /// Resumes playback. Returns false when there is nothing left to play.
    pub fn play(&mut self) -> bool {
        match &mut self.session {
            Some(session) if !session.at_end() => {
                session.is_playing = true;
                true
            }
            _ => false,
        }
    }

    pub fn pause(&mut self) {
        if let Some(session) = &mut self.session {
            session.is_playing = false;
        }
    }

    /// Changes speed; returns the clamped value applied.
    pub fn set_speed(&mut self, speed: f64) -> f64 {
        let speed = self.limits.clamp_speed(speed);
        if let Some(session) = &mut self.session {
            session.speed_multiplier = speed;
        }
        speed
    }

    /// Advances one tick. Returns the events dispatched by this tick.
    pub fn tick(&mut self) -> Vec<TimelineEvent> {
        match &mut self.session {
            Some(session) if session.is_playing => session.advance(self.config.tick_interval),
            _ => Vec::new(),
        }
    }

    /// Plays until the end of the window, a pause requested by `on_event`,
    /// or `exit`.
    ///
    /// Sleeps one tick interval on `ctx` between ticks.
    pub async fn run<Ctx, F>(&mut self, ctx: &Ctx, mut on_event: F)
    where
        Ctx: CivicContext,
        F: FnMut(&TimelineEvent) -> ControlFlow<()>,
    {
        while self.is_playing() {
            ctx.sleep(self.config.tick_interval).await;
            for event in self.tick() {
                if on_event(&event).is_break() {
                    self.pause();
                }
            }
        }
    }

    /// Jumps the cursor to `target` (clamped to the window).
    ///
    /// The session snapshot is replaced by a fresh reconstruction at the new
    /// cursor and dispatch resumes with the first buffered event after it.
    /// On error the session is left unchanged.
    pub async fn scrub(
        &mut self,
        target: Timestamp,
        reconstructor: &SnapshotReconstructor,
    ) -> Result<(), ReplayError> {
        let Some((start, end)) = self.session.as_ref().map(|s| (s.window_start, s.window_end)) else {
            return Ok(());
        };
        let target = target.clamp(start, end);
        let snapshot = reconstructor.snapshot_at(target).await?;

        if let Some(session) = &mut self.session {
            session.cursor_time = target;
            session.snapshot = snapshot;
            session.dispatched = session
                .buffered_events
                .partition_point(|e| e.timestamp <= target);
            if session.at_end() {
                session.is_playing = false;
            }
            debug!("Scrubbed to {} ({} events pending)", target, session.remaining().len());
        }
        Ok(())
    }

    /// Discards the session.
    pub fn exit(&mut self) -> Option<ReplaySession> {
        self.session.take()
    }
}

impl Default for PlaybackController {
    fn default() -> Self {
        Self::new(PlaybackConfig::default())
    }
}
