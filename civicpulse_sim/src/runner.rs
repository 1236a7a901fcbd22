//! Demo runner - executes end-to-end demos against an event store.

use crate::context::SimContext;
use crate::demos::DemoId;
use crate::exporter::{SimEvent, SimExport, SimFrame};
use crate::history::{CityHistory, HistoryConfig};

use civicpulse_core::modifiers::apply_chain;
use civicpulse_core::{
    channels, BroadcastPush, EngineConfig, LiveSensorFeed, PlaybackController, ReplayFrame,
    ReplayRequest, ReplayStreamController, RunStatus, ScenarioCatalog, ScenarioDefinition,
    ScenarioError, ScenarioScheduler, SensorSelector, SnapshotReconstructor, StreamState,
    SystemSnapshot, TimelineQuery, TimelineRequest,
};
use civicpulse_env::{
    CivicContext, EnvError, EventPayload, EventStore, EventType, SensorReading, TimeRange,
    TimelineEvent, Timestamp, TokioContext,
};
use serde::Serialize;
use std::fmt::Display;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// RNG stream used for history generation
const HISTORY_STREAM: u64 = 1;

/// Playback ticks between exported frames
const FRAME_EVERY_TICKS: u64 = 50;

/// Results from running a demo.
#[derive(Debug, Clone)]
pub struct DemoResult {
    /// Demo that was run
    pub demo: DemoId,

    /// Seed used
    pub seed: u64,

    /// Whether every check passed
    pub passed: bool,

    /// Clock time consumed by the demo (virtual or paused tokio time)
    pub elapsed_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: DemoMetrics,

    /// Frame export (playback only)
    pub export: Option<SimExport>,
}

/// Metrics collected during demo execution.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DemoMetrics {
    /// Events read back and verified
    pub events_checked: usize,

    /// Replay frames received
    pub frames_emitted: usize,

    /// Snapshots reconstructed
    pub snapshots_built: usize,

    /// Incidents injected by a scenario run
    pub incidents_injected: usize,

    /// Push notifications observed
    pub notifications: usize,
}

type Outcome = Result<(DemoMetrics, Duration, Option<SimExport>), String>;

fn ensure(condition: bool, reason: impl FnOnce() -> String) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(reason())
    }
}

fn fail(e: impl Display) -> String {
    e.to_string()
}

/// Runs demos over generated city history.
pub struct DemoRunner {
    seed: u64,
    history: HistoryConfig,
    speed: f64,
    scenario_id: String,
    config: EngineConfig,
    catalog: Arc<ScenarioCatalog>,
}

impl DemoRunner {
    /// Creates a new demo runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            history: HistoryConfig::default(),
            speed: 4.0,
            scenario_id: "flood".to_string(),
            config: EngineConfig::default(),
            catalog: Arc::new(ScenarioCatalog::builtin()),
        }
    }

    /// Sets the generated history.
    pub fn with_history(mut self, history: HistoryConfig) -> Self {
        self.history = history;
        self
    }

    /// Sets the replay/playback speed.
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    /// Sets the scenario triggered by the scenario demo.
    pub fn with_scenario(mut self, scenario_id: &str) -> Self {
        self.scenario_id = scenario_id.to_string();
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<ScenarioCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn history(&self) -> &HistoryConfig {
        &self.history
    }

    /// Generates the seeded history and appends it to the store.
    ///
    /// A store that already holds events inside the history window (a
    /// reopened `--db` log) is left as is; returns the number of events
    /// appended.
    pub async fn seed_store(&self, store: &dyn EventStore) -> Result<usize, EnvError> {
        let window = TimeRange::new(self.history.start, self.history.end());
        if !store.query_events(window, None, 1, 0).await?.is_empty() {
            info!(
                "Event log already holds history from {}, skipping seeding",
                self.history.start
            );
            return Ok(0);
        }

        let rng = SimContext::new(self.seed).derive_rng(HISTORY_STREAM);
        let events = CityHistory::from_rng(rng, self.history.clone()).generate();
        let count = events.len();
        for event in events {
            store.append_event(event).await?;
        }
        info!(
            "Seeded {} events ({}h from {})",
            count, self.history.hours, self.history.start
        );
        Ok(count)
    }

    /// Runs a demo and returns the result.
    pub async fn run(&self, demo: DemoId, store: Arc<dyn EventStore>) -> DemoResult {
        info!("Starting demo: {} (seed={})", demo.name(), self.seed);
        debug!("  {}", demo.description());

        let outcome = match demo {
            DemoId::Timeline => self.run_timeline(store).await,
            DemoId::Snapshot => self.run_snapshot(store).await,
            DemoId::Replay => self.run_replay(store).await,
            DemoId::Playback => self.run_playback(store).await,
            DemoId::Scenario => self.run_scenario(store).await,
        };

        match outcome {
            Ok((metrics, elapsed, export)) => DemoResult {
                demo,
                seed: self.seed,
                passed: true,
                elapsed_secs: elapsed.as_secs_f64(),
                failure_reason: None,
                metrics,
                export,
            },
            Err(reason) => {
                warn!("Demo {} failed: {}", demo.name(), reason);
                DemoResult {
                    demo,
                    seed: self.seed,
                    passed: false,
                    elapsed_secs: 0.0,
                    failure_reason: Some(reason),
                    metrics: DemoMetrics::default(),
                    export: None,
                }
            }
        }
    }

    /// First hour of history (or all of it, if shorter).
    fn replay_window(&self) -> (Timestamp, Timestamp) {
        let start = self.history.start;
        let end = (start + chrono::Duration::hours(1)).min(self.history.end());
        (start, end)
    }

    fn page_size(&self) -> usize {
        self.config.timeline.max_limit.max(1)
    }

    /// Timeline: filtered query is incident-only and ordered, and paging
    /// through it yields the same events.
    async fn run_timeline(&self, store: Arc<dyn EventStore>) -> Outcome {
        let query = TimelineQuery::with_config(store, self.config.timeline.clone());
        let (start, end) = (self.history.start, self.history.end());

        let request = TimelineRequest::new(start, end)
            .with_types(["INCIDENT"])
            .with_page(1000, 0);
        let incidents = query.timeline(&request).await.map_err(fail)?;

        ensure(incidents.len() <= 1000, || format!("{} events above limit", incidents.len()))?;
        ensure(
            incidents.iter().all(|e| e.event_type == EventType::Incident),
            || "non-incident event in filtered timeline".to_string(),
        )?;
        ensure(
            incidents.windows(2).all(|w| w[0].order_key() <= w[1].order_key()),
            || "timeline not ascending".to_string(),
        )?;

        let mut paged = Vec::new();
        while paged.len() < incidents.len() {
            let page = query
                .timeline(&request.clone().with_page(25, paged.len()))
                .await
                .map_err(fail)?;
            if page.is_empty() {
                break;
            }
            paged.extend(page);
        }
        ensure(paged == incidents, || {
            format!("paged timeline ({}) differs from single query ({})", paged.len(), incidents.len())
        })?;

        let backwards = query.timeline(&TimelineRequest::new(end, start)).await;
        ensure(
            matches!(&backwards, Err(e) if e.class().status_code() == 400),
            || "reversed window was not rejected".to_string(),
        )?;

        info!("  {} incident events, {} pages consistent", incidents.len(), paged.len().div_ceil(25));
        let metrics = DemoMetrics {
            events_checked: incidents.len(),
            ..DemoMetrics::default()
        };
        Ok((metrics, Duration::ZERO, None))
    }

    /// Snapshot: reconstructions agree with a naive fold of the raw log.
    async fn run_snapshot(&self, store: Arc<dyn EventStore>) -> Outcome {
        let reconstructor = SnapshotReconstructor::with_config(store.clone(), self.config.snapshot.clone());
        let (start, end) = (self.history.start, self.history.end());
        let span = end - start;

        let instants = [
            start - chrono::Duration::hours(1),
            start,
            start + span / 4,
            start + span / 2,
            end,
        ];

        let mut metrics = DemoMetrics::default();
        for at in instants {
            let snapshot = reconstructor.snapshot_at(at).await.map_err(fail)?;
            let raw = fetch_all(
                store.as_ref(),
                TimeRange::new(reconstructor.fold_start(at), at),
                self.page_size(),
            )
            .await?;
            let reference = SystemSnapshot::fold(at, &raw);

            ensure(snapshot == reference, || format!("snapshot at {} differs from naive fold", at))?;
            debug!(
                "  {} -> {} sensors, {} incidents, {} work orders",
                at,
                snapshot.sensors.len(),
                snapshot.incidents.len(),
                snapshot.work_orders.len()
            );
            metrics.snapshots_built += 1;
            metrics.events_checked += raw.len();
        }

        info!("  {} snapshots match the naive fold", metrics.snapshots_built);
        Ok((metrics, Duration::ZERO, None))
    }

    /// Replay: the first hour streams in order, completes, and takes
    /// `(last event offset) / speed` of virtual time.
    async fn run_replay(&self, store: Arc<dyn EventStore>) -> Outcome {
        let (start, end) = self.replay_window();
        let ctx = Arc::new(SimContext::with_epoch(self.seed, start));
        let controller = ReplayStreamController::new(ctx.clone(), store)
            .with_config(self.config.replay.clone());

        let mut stream = controller
            .open(&ReplayRequest::new(start, end).with_speed(self.speed))
            .await
            .map_err(fail)?;
        let speed = stream.speed();
        let opened = ctx.now();

        let mut metrics = DemoMetrics::default();
        let mut last: Option<TimelineEvent> = None;
        let mut completed = None;
        while let Some(frame) = stream.next_frame().await {
            match frame {
                ReplayFrame::Event { event, .. } => {
                    if let Some(previous) = &last {
                        ensure(previous.order_key() <= event.order_key(), || {
                            format!("frame at {} arrived after {}", event.timestamp, previous.timestamp)
                        })?;
                    }
                    metrics.frames_emitted += 1;
                    last = Some(event);
                }
                ReplayFrame::Complete { emitted } => completed = Some(emitted),
            }
        }

        ensure(completed == Some(metrics.frames_emitted), || {
            format!("completion marker {:?} after {} frames", completed, metrics.frames_emitted)
        })?;
        ensure(stream.state() == StreamState::Completed, || {
            format!("stream ended as {:?}", stream.state())
        })?;

        let elapsed = ctx.now().saturating_sub(opened);
        if let Some(last) = &last {
            let offset = (last.timestamp - start).to_std().unwrap_or_default();
            let expected = Duration::from_secs_f64(offset.as_secs_f64() / speed);
            ensure(elapsed + Duration::from_millis(1) >= expected, || {
                format!("stream finished after {:?}, last event due at {:?}", elapsed, expected)
            })?;
        }

        info!(
            "  {} frames at {}x in {:.1}s virtual",
            metrics.frames_emitted,
            speed,
            elapsed.as_secs_f64()
        );
        metrics.events_checked = metrics.frames_emitted;
        Ok((metrics, elapsed, None))
    }

    /// Playback: play to the end, scrub back to the midpoint, play again;
    /// the final state matches a fresh reconstruction.
    async fn run_playback(&self, store: Arc<dyn EventStore>) -> Outcome {
        let (start, end) = self.replay_window();
        let ctx = SimContext::with_epoch(self.seed, start);
        let reconstructor = SnapshotReconstructor::with_config(store.clone(), self.config.snapshot.clone());
        let buffered = fetch_all(store.as_ref(), TimeRange::new(start, end), self.page_size()).await?;
        let buffered_len = buffered.len();

        let mut playback = PlaybackController::new(self.config.playback.clone())
            .with_limits(self.config.replay.clone());
        playback.enter(start, end, buffered, self.speed).map_err(fail)?;
        playback.scrub(start, &reconstructor).await.map_err(fail)?;

        let mut export = SimExport::new(DemoId::Playback.name(), self.seed, start, end);
        let mut pending: Vec<SimEvent> = Vec::new();
        let mut ticks = 0u64;
        let mut dispatched = 0usize;

        playback.play();
        while playback.is_playing() {
            ctx.sleep(self.config.playback.tick_interval).await;
            let events = playback.tick();
            dispatched += events.len();
            pending.extend(events.iter().map(SimEvent::from));
            ticks += 1;

            if ticks % FRAME_EVERY_TICKS == 0 || !playback.is_playing() {
                if let Some(session) = playback.session() {
                    export.add_frame(SimFrame::from_snapshot(&session.snapshot, std::mem::take(&mut pending)));
                }
            }
        }

        let midpoint = start + (end - start) / 2;
        playback.scrub(midpoint, &reconstructor).await.map_err(fail)?;
        playback.play();
        playback
            .run(&ctx, |_| {
                dispatched += 1;
                ControlFlow::Continue(())
            })
            .await;

        let session = playback
            .exit()
            .ok_or_else(|| "playback session vanished".to_string())?;
        let reference = reconstructor.snapshot_at(end).await.map_err(fail)?;
        let matches = session.snapshot.sensors == reference.sensors
            && session.snapshot.incidents == reference.incidents
            && session.snapshot.work_orders == reference.work_orders;

        export.finalize(matches, Some(session.snapshot.clone()));
        ensure(session.cursor_time == end, || format!("cursor stopped at {}", session.cursor_time))?;
        ensure(matches, || "state after playback differs from reconstruction".to_string())?;

        info!(
            "  {} buffered, {} dispatched over {} ticks, {} frames",
            buffered_len,
            dispatched,
            ticks,
            export.frames.len()
        );
        let metrics = DemoMetrics {
            events_checked: dispatched,
            snapshots_built: 3,
            ..DemoMetrics::default()
        };
        Ok((metrics, ctx.now(), Some(export)))
    }

    /// Scenario: trigger, reject a concurrent trigger, let the run expire
    /// (including late incidents), and verify revert and injection.
    async fn run_scenario(&self, store: Arc<dyn EventStore>) -> Outcome {
        let definition = self.catalog.definition(&self.scenario_id).map_err(fail)?.clone();
        let ctx = Arc::new(TokioContext::with_epoch(self.history.end()));
        let feed = Arc::new(LiveSensorFeed::new());
        let push = Arc::new(BroadcastPush::default());
        let mut notifications = push.subscribe();

        let scheduler = ScenarioScheduler::builder(ctx.clone(), self.catalog.clone(), store.clone(), feed.clone())
            .with_push(push.clone())
            .with_config(self.config.scheduler.clone())
            .spawn();

        let sample = sample_reading(&definition);
        let run = scheduler.trigger(&definition.id).await.map_err(fail)?;

        if let Some(sample) = &sample {
            let expected = apply_chain(
                definition.sensor_modifiers.iter().map(|m| (&m.selector, &m.transform)),
                sample,
            );
            let surfaced = feed.surface(sample).value;
            ensure((surfaced - expected).abs() < 1e-9, || {
                format!("{} surfaced as {} while active, expected {}", sample.sensor_id, surfaced, expected)
            })?;
        }

        match scheduler.trigger(&definition.id).await {
            Err(ScenarioError::Conflict { run_id, .. }) if run_id == run.run_id => {}
            other => return Err(format!("second trigger was not rejected: {:?}", other.map(|r| r.run_id))),
        }

        let horizon = definition
            .triggered_incidents
            .iter()
            .map(|t| t.delay())
            .chain(std::iter::once(definition.duration()))
            .max()
            .unwrap_or_default();
        ctx.sleep(horizon + Duration::from_secs(1)).await;

        ensure(!scheduler.status().active, || "scenario still active after expiry".to_string())?;
        ensure(feed.active_modifiers() == 0, || {
            format!("{} modifiers left installed", feed.active_modifiers())
        })?;
        if let Some(sample) = &sample {
            ensure(feed.surface(sample).value == sample.value, || "modifiers not reverted".to_string())?;
        }

        let finished = scheduler
            .history()
            .await
            .map_err(fail)?
            .into_iter()
            .find(|r| r.run_id == run.run_id)
            .ok_or_else(|| "run missing from history".to_string())?;
        ensure(finished.status == RunStatus::Completed, || {
            format!("run ended as {:?}", finished.status)
        })?;
        ensure(
            finished.triggered_incident_ids.len() == definition.triggered_incidents.len(),
            || {
                format!(
                    "{} of {} incidents injected",
                    finished.triggered_incident_ids.len(),
                    definition.triggered_incidents.len()
                )
            },
        )?;

        let injected = store
            .query_events(
                TimeRange::new(run.start_time, ctx.wall_clock()),
                Some(&[EventType::Incident][..]),
                self.page_size(),
                0,
            )
            .await
            .map_err(fail)?;
        let source = format!("scenario:{}", definition.id);
        let stored = injected
            .iter()
            .filter(|e| matches!(&e.payload, EventPayload::IncidentCreated(r) if r.source.as_deref() == Some(source.as_str())))
            .count();
        ensure(stored >= finished.triggered_incident_ids.len(), || {
            format!("{} injected incidents found in store", stored)
        })?;

        let mut channels_seen = Vec::new();
        while let Ok(message) = notifications.try_recv() {
            channels_seen.push(message.channel);
        }
        ensure(channels_seen.first().map(String::as_str) == Some(channels::SCENARIO_STARTED), || {
            format!("first notification was {:?}", channels_seen.first())
        })?;
        ensure(channels_seen.iter().any(|c| c == channels::SCENARIO_COMPLETED), || {
            "no completion notification".to_string()
        })?;

        info!(
            "  '{}' ran {}ms, {} incidents injected, {} notifications",
            definition.id,
            definition.duration_ms,
            finished.triggered_incident_ids.len(),
            channels_seen.len()
        );
        let metrics = DemoMetrics {
            events_checked: stored,
            incidents_injected: finished.triggered_incident_ids.len(),
            notifications: channels_seen.len(),
            ..DemoMetrics::default()
        };
        Ok((metrics, ctx.now(), None))
    }
}

/// Reads every event in `range`, page by page.
async fn fetch_all(
    store: &dyn EventStore,
    range: TimeRange,
    page_size: usize,
) -> Result<Vec<TimelineEvent>, String> {
    let mut events = Vec::new();
    loop {
        let page = store
            .query_events(range, None, page_size, events.len())
            .await
            .map_err(fail)?;
        let done = page.len() < page_size;
        events.extend(page);
        if done {
            return Ok(events);
        }
    }
}

/// A reading targeted by the scenario's first modifier.
fn sample_reading(definition: &ScenarioDefinition) -> Option<SensorReading> {
    let selector = &definition.sensor_modifiers.first()?.selector;
    let mut reading = SensorReading {
        sensor_id: "sample-1".to_string(),
        sensor_type: "sample".to_string(),
        zone_id: None,
        value: 10.0,
        unit: None,
    };
    match selector {
        SensorSelector::SensorType(t) => reading.sensor_type = t.clone(),
        SensorSelector::SensorId(id) => reading.sensor_id = id.clone(),
        SensorSelector::Zone(zone) => reading.zone_id = Some(zone.clone()),
    }
    Some(reading)
}
