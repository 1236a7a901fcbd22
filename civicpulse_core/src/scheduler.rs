//! Scenario Scheduler - runs at most one scenario at a time.
//!
//! # Architecture
//!
//! ```text
//!  ScenarioScheduler (cloneable handle)
//!     │ trigger / stop / history            status() reads the watch channel
//!     ▼                                                ▲
//!  ┌──────────────── SchedulerActor (one task) ────────┴──────┐
//!  │  active slot ─── RunState { modifiers, timers, pending }  │
//!  │  lingering   ─── completed runs with late incidents       │
//!  └───────────────────────────▲──────────────────────────────┘
//!                              │ IncidentDue / Expire
//!                     DeferredTask timers
//! ```
//!
//! Every transition of the active slot (trigger, stop, expiry, incident
//! firing) is a message handled by the single actor task, so the
//! "at most one ACTIVE run" invariant needs no further locking. Timers never
//! touch state themselves; they post a message back to the actor, and the
//! actor drops messages for runs that were stopped.

use crate::catalog::{ScenarioCatalog, ScenarioDefinition};
use crate::config::SchedulerConfig;
use crate::error::ScenarioError;
use crate::modifiers::{ModifierHandle, SensorPipeline};
use crate::push::channels;
use crate::timer::{DeferredTask, TimerSet};
use civicpulse_env::{
    CivicContext, EventPayload, EventStore, IncidentRecord, IncidentStatus, PushTransport,
    TimelineEvent, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

const TERMINAL_TIMER: &str = "terminal";

fn incident_timer(index: usize) -> String {
    format!("incident-{}", index)
}

/// Lifecycle of a scenario run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Active,
    Completed,
    Stopped,
}

/// One execution of a scenario definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveScenarioRun {
    pub run_id: Uuid,
    pub definition_id: String,
    pub definition_name: String,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub triggered_incident_ids: Vec<String>,
    pub status: RunStatus,
}

/// Answer to `status()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioStatus {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<ActiveScenarioRun>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_ms: Option<u64>,
}

impl ScenarioStatus {
    fn idle() -> Self {
        Self {
            active: false,
            run: None,
            elapsed_ms: None,
            remaining_ms: None,
        }
    }
}

/// What the actor publishes for `status()` readers.
#[derive(Debug, Clone)]
struct LiveView {
    run: ActiveScenarioRun,
    started_at: Duration,
    duration: Duration,
}

enum Command {
    Trigger {
        definition_id: String,
        reply: oneshot::Sender<Result<ActiveScenarioRun, ScenarioError>>,
    },
    Stop {
        reply: oneshot::Sender<Option<ActiveScenarioRun>>,
    },
    History {
        reply: oneshot::Sender<Vec<ActiveScenarioRun>>,
    },
    IncidentDue {
        run_id: Uuid,
        index: usize,
    },
    Expire {
        run_id: Uuid,
    },
}

/// Builder for [`ScenarioScheduler`].
pub struct SchedulerBuilder<Ctx: CivicContext> {
    ctx: Arc<Ctx>,
    catalog: Arc<ScenarioCatalog>,
    store: Arc<dyn EventStore>,
    pipeline: Arc<dyn SensorPipeline>,
    push: Option<Arc<dyn PushTransport>>,
    config: SchedulerConfig,
}

impl<Ctx: CivicContext> SchedulerBuilder<Ctx> {
    /// Publishes lifecycle notifications on the given transport.
    pub fn with_push(mut self, push: Arc<dyn PushTransport>) -> Self {
        self.push = Some(push);
        self
    }

    /// Overrides the scheduler configuration.
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Starts the actor task and returns a handle to it.
    pub fn spawn(self) -> ScenarioScheduler<Ctx> {
        let (tx, inbox) = mpsc::channel(self.config.command_buffer.max(1));
        let (status_tx, status_rx) = watch::channel(None);

        let actor = SchedulerActor {
            ctx: Arc::clone(&self.ctx),
            catalog: self.catalog,
            store: self.store,
            pipeline: self.pipeline,
            push: self.push,
            config: self.config,
            inbox,
            loopback: tx.downgrade(),
            status_tx,
            active: None,
            lingering: HashMap::new(),
            history: VecDeque::new(),
        };
        self.ctx.spawn("scenario-scheduler", actor.run());

        ScenarioScheduler {
            ctx: self.ctx,
            commands: tx,
            status_rx,
        }
    }
}

/// Handle to the scenario scheduler actor.
///
/// Cloning the handle is cheap; the actor shuts down (cancelling timers and
/// uninstalling modifiers) once every handle is dropped.
pub struct ScenarioScheduler<Ctx: CivicContext> {
    ctx: Arc<Ctx>,
    commands: mpsc::Sender<Command>,
    status_rx: watch::Receiver<Option<LiveView>>,
}

impl<Ctx: CivicContext> Clone for ScenarioScheduler<Ctx> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            commands: self.commands.clone(),
            status_rx: self.status_rx.clone(),
        }
    }
}

impl<Ctx: CivicContext> ScenarioScheduler<Ctx> {
    /// Starts building a scheduler.
    pub fn builder(
        ctx: Arc<Ctx>,
        catalog: Arc<ScenarioCatalog>,
        store: Arc<dyn EventStore>,
        pipeline: Arc<dyn SensorPipeline>,
    ) -> SchedulerBuilder<Ctx> {
        SchedulerBuilder {
            ctx,
            catalog,
            store,
            pipeline,
            push: None,
            config: SchedulerConfig::default(),
        }
    }

    /// Starts a scenario.
    ///
    /// Fails with `Conflict` while another run is active (that run is left
    /// untouched), with `NotFound` for unknown ids and with `Unschedulable`
    /// when the run's end time cannot be represented.
    pub async fn trigger(&self, definition_id: &str) -> Result<ActiveScenarioRun, ScenarioError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Trigger {
            definition_id: definition_id.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| ScenarioError::SchedulerUnavailable)?
    }

    /// Stops the active run, if any.
    ///
    /// Returns the stopped run, or `None` when nothing was active. Once this
    /// returns, no incident of the stopped run can be created.
    pub async fn stop(&self) -> Result<Option<ActiveScenarioRun>, ScenarioError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop { reply }).await?;
        rx.await.map_err(|_| ScenarioError::SchedulerUnavailable)
    }

    /// Current state, derived from the last published run and the clock.
    pub fn status(&self) -> ScenarioStatus {
        let view = self.status_rx.borrow().clone();
        match view {
            None => ScenarioStatus::idle(),
            Some(view) => {
                let elapsed = self.ctx.now().saturating_sub(view.started_at);
                let remaining = view.duration.saturating_sub(elapsed);
                ScenarioStatus {
                    active: true,
                    run: Some(view.run),
                    elapsed_ms: Some(elapsed.as_millis() as u64),
                    remaining_ms: Some(remaining.as_millis() as u64),
                }
            }
        }
    }

    /// Recently finished runs, oldest first.
    pub async fn history(&self) -> Result<Vec<ActiveScenarioRun>, ScenarioError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::History { reply }).await?;
        rx.await.map_err(|_| ScenarioError::SchedulerUnavailable)
    }

    async fn send(&self, command: Command) -> Result<(), ScenarioError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ScenarioError::SchedulerUnavailable)
    }
}

/// Runtime state of one run.
struct RunState {
    run: ActiveScenarioRun,
    definition: ScenarioDefinition,
    started_at: Duration,
    modifiers: Vec<ModifierHandle>,
    timers: TimerSet,
    /// Incident templates not yet fired
    pending: BTreeSet<usize>,
}

struct SchedulerActor<Ctx: CivicContext> {
    ctx: Arc<Ctx>,
    catalog: Arc<ScenarioCatalog>,
    store: Arc<dyn EventStore>,
    pipeline: Arc<dyn SensorPipeline>,
    push: Option<Arc<dyn PushTransport>>,
    config: SchedulerConfig,

    inbox: mpsc::Receiver<Command>,
    loopback: mpsc::WeakSender<Command>,
    status_tx: watch::Sender<Option<LiveView>>,

    active: Option<RunState>,
    /// Completed runs whose incident delays exceed the scenario duration
    lingering: HashMap<Uuid, RunState>,
    history: VecDeque<ActiveScenarioRun>,
}

impl<Ctx: CivicContext> SchedulerActor<Ctx> {
    async fn run(mut self) {
        debug!("Scenario scheduler started");
        while let Some(command) = self.inbox.recv().await {
            match command {
                Command::Trigger { definition_id, reply } => {
                    let result = self.trigger(&definition_id).await;
                    let _ = reply.send(result);
                }
                Command::Stop { reply } => {
                    let stopped = self.stop().await;
                    let _ = reply.send(stopped);
                }
                Command::History { reply } => {
                    let _ = reply.send(self.history.iter().cloned().collect());
                }
                Command::IncidentDue { run_id, index } => {
                    self.fire_incident(run_id, index).await;
                }
                Command::Expire { run_id } => {
                    self.expire(run_id).await;
                }
            }
        }
        self.shutdown();
    }

    async fn trigger(&mut self, definition_id: &str) -> Result<ActiveScenarioRun, ScenarioError> {
        if let Some(active) = &self.active {
            debug!(
                "Rejecting '{}': scenario '{}' already active",
                definition_id, active.run.definition_id
            );
            return Err(ScenarioError::Conflict {
                active: active.run.definition_id.clone(),
                run_id: active.run.run_id,
            });
        }

        let definition = self.catalog.definition(definition_id)?.clone();
        let run_id = Uuid::new_v4();
        let started_at = self.ctx.now();
        let start_time = self.ctx.wall_clock();
        let end_time = i64::try_from(definition.duration_ms)
            .ok()
            .and_then(chrono::Duration::try_milliseconds)
            .and_then(|duration| start_time.checked_add_signed(duration))
            .ok_or_else(|| ScenarioError::Unschedulable {
                id: definition.id.clone(),
                reason: format!("end of {}ms run from {} is out of range", definition.duration_ms, start_time),
            })?;

        let modifiers = definition
            .sensor_modifiers
            .iter()
            .map(|m| self.pipeline.install_modifier(m.selector.clone(), m.transform))
            .collect();

        let mut timers = TimerSet::new();
        for (index, template) in definition.triggered_incidents.iter().enumerate() {
            timers.insert(
                incident_timer(index),
                self.schedule(template.delay(), Command::IncidentDue { run_id, index }),
            );
        }
        timers.insert(
            TERMINAL_TIMER,
            self.schedule(definition.duration(), Command::Expire { run_id }),
        );

        let run = ActiveScenarioRun {
            run_id,
            definition_id: definition.id.clone(),
            definition_name: definition.name.clone(),
            start_time,
            end_time,
            triggered_incident_ids: Vec::new(),
            status: RunStatus::Active,
        };
        info!(
            "Scenario '{}' started (run {}, {}ms, {} modifiers, {} incidents)",
            definition.id,
            run_id,
            definition.duration_ms,
            definition.sensor_modifiers.len(),
            definition.triggered_incidents.len()
        );

        self.active = Some(RunState {
            run: run.clone(),
            pending: (0..definition.triggered_incidents.len()).collect(),
            definition,
            started_at,
            modifiers,
            timers,
        });
        self.publish_status();
        self.notify(channels::SCENARIO_STARTED, &run).await;

        Ok(run)
    }

    async fn stop(&mut self) -> Option<ActiveScenarioRun> {
        let mut state = self.active.take()?;

        state.timers.cancel_all();
        state.pending.clear();
        self.uninstall(&mut state);
        state.run.status = RunStatus::Stopped;

        info!(
            "Scenario '{}' stopped (run {}, {} incidents fired)",
            state.run.definition_id,
            state.run.run_id,
            state.run.triggered_incident_ids.len()
        );
        self.publish_status();
        self.record_history(state.run.clone());
        self.notify(channels::SCENARIO_STOPPED, &state.run).await;

        Some(state.run)
    }

    async fn expire(&mut self, run_id: Uuid) {
        let due: Vec<usize> = match &self.active {
            Some(state) if state.run.run_id == run_id => {
                let duration = state.definition.duration();
                state
                    .pending
                    .iter()
                    .copied()
                    .filter(|&i| state.definition.triggered_incidents[i].delay() < duration)
                    .collect()
            }
            _ => {
                debug!("Ignoring expiry of finished run {}", run_id);
                return;
            }
        };

        // Incidents due inside the window always land before completion
        for index in due {
            self.fire_incident(run_id, index).await;
        }

        let Some(mut state) = self.active.take() else {
            return;
        };
        state.timers.cancel(TERMINAL_TIMER);
        self.uninstall(&mut state);
        state.run.status = RunStatus::Completed;

        info!(
            "Scenario '{}' completed (run {}, {} incidents fired, {} still scheduled)",
            state.run.definition_id,
            run_id,
            state.run.triggered_incident_ids.len(),
            state.pending.len()
        );
        self.publish_status();
        self.record_history(state.run.clone());
        self.notify(channels::SCENARIO_COMPLETED, &state.run).await;

        if !state.pending.is_empty() {
            self.lingering.insert(run_id, state);
        }
    }

    async fn fire_incident(&mut self, run_id: Uuid, index: usize) {
        let (template, definition_id) = match self
            .run_mut(run_id)
            .filter(|state| state.pending.contains(&index))
        {
            Some(state) => {
                state.pending.remove(&index);
                state.timers.cancel(&incident_timer(index));
                (
                    state.definition.triggered_incidents[index].clone(),
                    state.definition.id.clone(),
                )
            }
            _ => {
                debug!("Dropping incident {} of inactive run {}", index, run_id);
                return;
            }
        };

        let incident_id = format!("inc-{}", Uuid::new_v4());
        let record = IncidentRecord {
            incident_id: incident_id.clone(),
            incident_type: template.incident_type.clone(),
            category: template.category.clone(),
            severity: template.severity,
            status: IncidentStatus::Open,
            description: template.description.clone(),
            location: template.location,
            priority_score: None,
            source: Some(format!("scenario:{}", definition_id)),
        };
        let event = TimelineEvent::new(self.ctx.wall_clock(), EventPayload::IncidentCreated(record));

        match self.store.append_event(event).await {
            Ok(_) => {
                info!(
                    "Scenario '{}' injected {} ({})",
                    definition_id, template.incident_type, incident_id
                );
                if let Some(state) = self.run_mut(run_id) {
                    state.run.triggered_incident_ids.push(incident_id.clone());
                }
                if let Some(entry) = self.history.iter_mut().find(|r| r.run_id == run_id) {
                    entry.triggered_incident_ids.push(incident_id.clone());
                }
                self.publish_status();
                let body = serde_json::json!({
                    "runId": run_id,
                    "scenarioId": definition_id,
                    "incidentId": incident_id,
                    "type": template.incident_type,
                    "severity": template.severity,
                });
                self.publish(channels::SCENARIO_INCIDENT, body).await;
            }
            Err(e) => {
                warn!(
                    "Scenario '{}' failed to inject {}: {} (skipped)",
                    definition_id, template.incident_type, e
                );
            }
        }

        if self
            .lingering
            .get(&run_id)
            .map_or(false, |state| state.pending.is_empty())
        {
            self.lingering.remove(&run_id);
        }
    }

    fn run_mut(&mut self, run_id: Uuid) -> Option<&mut RunState> {
        match &mut self.active {
            Some(state) if state.run.run_id == run_id => Some(state),
            _ => self.lingering.get_mut(&run_id),
        }
    }

    fn schedule(&self, delay: Duration, command: Command) -> DeferredTask {
        let loopback = self.loopback.clone();
        DeferredTask::schedule(&self.ctx, "scenario-timer", delay, async move {
            if let Some(tx) = loopback.upgrade() {
                let _ = tx.send(command).await;
            }
        })
    }

    fn uninstall(&self, state: &mut RunState) {
        for handle in state.modifiers.drain(..) {
            self.pipeline.uninstall_modifier(handle);
        }
    }

    fn publish_status(&self) {
        let view = self.active.as_ref().map(|state| LiveView {
            run: state.run.clone(),
            started_at: state.started_at,
            duration: state.definition.duration(),
        });
        self.status_tx.send_replace(view);
    }

    fn record_history(&mut self, run: ActiveScenarioRun) {
        if self.config.history_len == 0 {
            return;
        }
        while self.history.len() >= self.config.history_len {
            self.history.pop_front();
        }
        self.history.push_back(run);
    }

    async fn notify(&self, channel: &str, run: &ActiveScenarioRun) {
        match serde_json::to_value(run) {
            Ok(body) => self.publish(channel, body).await,
            Err(e) => warn!("Failed to encode {} notification: {}", channel, e),
        }
    }

    async fn publish(&self, channel: &str, body: serde_json::Value) {
        if let Some(push) = &self.push {
            if let Err(e) = push.publish(channel, body).await {
                debug!("Push on {} not delivered: {}", channel, e);
            }
        }
    }

    fn shutdown(&mut self) {
        if let Some(mut state) = self.active.take() {
            state.timers.cancel_all();
            self.uninstall(&mut state);
            info!("Scheduler shut down with '{}' active", state.run.definition_id);
        }
        for (_, mut state) in self.lingering.drain() {
            state.timers.cancel_all();
        }
        self.status_tx.send_replace(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryEventStore;
    use crate::push::BroadcastPush;
    use crate::sensor_feed::LiveSensorFeed;
    use approx::assert_relative_eq;
    use chrono::{TimeZone, Utc};
    use civicpulse_env::{SensorReading, TimeRange, TokioContext};

    struct Harness {
        scheduler: ScenarioScheduler<TokioContext>,
        store: Arc<MemoryEventStore>,
        feed: Arc<LiveSensorFeed>,
        push: Arc<BroadcastPush>,
    }

    fn harness() -> Harness {
        let ctx = Arc::new(TokioContext::with_epoch(
            Utc.with_ymd_and_hms(2024, 9, 1, 12, 0, 0).unwrap(),
        ));
        let store = Arc::new(MemoryEventStore::new());
        let feed = Arc::new(LiveSensorFeed::new());
        let push = Arc::new(BroadcastPush::default());
        let scheduler = ScenarioScheduler::builder(
            ctx,
            Arc::new(ScenarioCatalog::builtin()),
            store.clone(),
            feed.clone(),
        )
        .with_push(push.clone())
        .spawn();

        Harness {
            scheduler,
            store,
            feed,
            push,
        }
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    fn incidents_of_type(store: &MemoryEventStore, incident_type: &str) -> Vec<IncidentRecord> {
        store
            .all_events()
            .into_iter()
            .filter_map(|e| match e.payload {
                EventPayload::IncidentCreated(r) if r.incident_type == incident_type => Some(r),
                _ => None,
            })
            .collect()
    }

    fn water(value: f64) -> SensorReading {
        SensorReading {
            sensor_id: "wl-1".to_string(),
            sensor_type: "water_level".to_string(),
            zone_id: None,
            value,
            unit: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flood_run_lifecycle() {
        let h = harness();
        let run = h.scheduler.trigger("flood").await.unwrap();
        assert_eq!(run.status, RunStatus::Active);
        assert_eq!((run.end_time - run.start_time).num_milliseconds(), 300_000);

        advance(31_000).await;
        let status = h.scheduler.status();
        assert!(status.active);
        assert!(status.elapsed_ms.unwrap() >= 31_000);
        assert!(status.remaining_ms.unwrap() <= 269_000);

        let warnings = incidents_of_type(&h.store, "flood_warning");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].source.as_deref(), Some("scenario:flood"));
        assert_eq!(
            status.run.unwrap().triggered_incident_ids,
            vec![warnings[0].incident_id.clone()]
        );

        advance(300_001 - 31_000).await;
        assert!(!h.scheduler.status().active);

        let history = h.scheduler.history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, RunStatus::Completed);
        assert_eq!(history[0].triggered_incident_ids.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_trigger_conflicts_and_keeps_first_run() {
        let h = harness();
        let flood = h.scheduler.trigger("flood").await.unwrap();

        let err = h.scheduler.trigger("fire").await.unwrap_err();
        assert!(matches!(err, ScenarioError::Conflict { ref active, run_id }
            if active == "flood" && run_id == flood.run_id));
        assert_eq!(err.class().status_code(), 409);

        let status = h.scheduler.status();
        assert!(status.active);
        assert_eq!(status.run.unwrap().run_id, flood.run_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_triggers_admit_exactly_one() {
        let h = harness();
        let ids = ["flood", "fire", "heatwave", "power_outage", "flood", "fire"];

        let mut joins = Vec::new();
        for id in ids {
            let scheduler = h.scheduler.clone();
            joins.push(tokio::spawn(async move { scheduler.trigger(id).await }));
        }

        let mut admitted = 0;
        let mut conflicts = 0;
        for join in joins {
            match join.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(ScenarioError::Conflict { .. }) => conflicts += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(conflicts, ids.len() - 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_scenario_is_not_found() {
        let h = harness();
        assert!(matches!(
            h.scheduler.trigger("volcano").await,
            Err(ScenarioError::NotFound(_))
        ));
        assert!(!h.scheduler.status().active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_end_time_is_rejected_and_scheduler_survives() {
        let ctx = Arc::new(TokioContext::with_epoch(
            chrono::DateTime::<Utc>::MAX_UTC - chrono::Duration::minutes(1),
        ));
        let feed = Arc::new(LiveSensorFeed::new());
        let scheduler = ScenarioScheduler::builder(
            ctx,
            Arc::new(ScenarioCatalog::builtin()),
            Arc::new(MemoryEventStore::new()),
            feed.clone(),
        )
        .spawn();

        let err = scheduler.trigger("flood").await.unwrap_err();
        assert!(matches!(err, ScenarioError::Unschedulable { ref id, .. } if id == "flood"));
        assert_eq!(err.class().status_code(), 400);
        assert_eq!(feed.active_modifiers(), 0);

        assert!(!scheduler.status().active);
        assert!(scheduler.stop().await.unwrap().is_none());
        assert!(scheduler.history().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let h = harness();
        assert!(h.scheduler.stop().await.unwrap().is_none());

        h.scheduler.trigger("heatwave").await.unwrap();
        let stopped = h.scheduler.stop().await.unwrap().unwrap();
        assert_eq!(stopped.status, RunStatus::Stopped);

        assert!(h.scheduler.stop().await.unwrap().is_none());
        assert!(!h.scheduler.status().active);

        // Slot is free again
        assert!(h.scheduler.trigger("fire").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_delay_prevents_incident() {
        let h = harness();
        h.scheduler.trigger("flood").await.unwrap();

        advance(10_000).await;
        h.scheduler.stop().await.unwrap();
        advance(600_000).await;

        assert!(incidents_of_type(&h.store, "flood_warning").is_empty());
        assert!(incidents_of_type(&h.store, "road_closure").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_after_delay_keeps_fired_incident() {
        let h = harness();
        h.scheduler.trigger("flood").await.unwrap();

        advance(31_000).await;
        let stopped = h.scheduler.stop().await.unwrap().unwrap();
        advance(600_000).await;

        assert_eq!(stopped.triggered_incident_ids.len(), 1);
        assert_eq!(incidents_of_type(&h.store, "flood_warning").len(), 1);
        assert!(incidents_of_type(&h.store, "road_closure").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_modifiers_apply_only_while_active() {
        let h = harness();
        assert_relative_eq!(h.feed.surface(&water(1.0)).value, 1.0);

        h.scheduler.trigger("flood").await.unwrap();
        assert_relative_eq!(h.feed.surface(&water(1.0)).value, 2.5);

        advance(300_001).await;
        assert_eq!(h.feed.active_modifiers(), 0);
        assert_relative_eq!(h.feed.surface(&water(1.0)).value, 1.0);

        h.scheduler.trigger("flood").await.unwrap();
        h.scheduler.stop().await.unwrap();
        assert_eq!(h.feed.active_modifiers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_incident_fires_after_completion() {
        let h = harness();
        h.scheduler.trigger("power_outage").await.unwrap();

        advance(241_000).await;
        assert!(!h.scheduler.status().active);
        assert!(incidents_of_type(&h.store, "restoration_inspection").is_empty());

        advance(60_000).await;
        assert_eq!(incidents_of_type(&h.store, "restoration_inspection").len(), 1);

        let history = h.scheduler.history().await.unwrap();
        assert_eq!(history[0].status, RunStatus::Completed);
        assert_eq!(history[0].triggered_incident_ids.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_injection_is_skipped() {
        let h = harness();
        h.store.set_appends_down(true);
        h.scheduler.trigger("fire").await.unwrap();

        advance(11_000).await;
        h.store.set_appends_down(false);
        advance(50_000).await;

        assert!(incidents_of_type(&h.store, "structure_fire").is_empty());
        assert_eq!(incidents_of_type(&h.store, "air_quality_alert").len(), 1);

        let status = h.scheduler.status();
        assert!(status.active);
        assert_eq!(status.run.unwrap().triggered_incident_ids.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_notifications() {
        let h = harness();
        let mut rx = h.push.subscribe();

        h.scheduler.trigger("fire").await.unwrap();
        advance(10_500).await;
        h.scheduler.stop().await.unwrap();

        let channels: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|m| m.channel)
            .collect();
        assert_eq!(
            channels,
            vec!["scenario.started", "scenario.incident", "scenario.stopped"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_every_handle_shuts_down() {
        let h = harness();
        h.scheduler.trigger("flood").await.unwrap();
        assert_eq!(h.feed.active_modifiers(), 3);

        drop(h.scheduler);
        advance(1).await;
        assert_eq!(h.feed.active_modifiers(), 0);

        advance(600_000).await;
        let range = TimeRange::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        );
        let events = h.store.query_events(range, None, 100, 0).await.unwrap();
        assert!(events.is_empty());
    }
}
