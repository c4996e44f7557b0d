//! Execution scheduler: drives one simulation run from goal text to result.
//!
//! The scheduler wires the goal parser, the agent coordinator and the state
//! store into a single decision loop.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                    ExecutionScheduler                      │
//! │                                                            │
//! │  run("title", "both agents meet at the crate")             │
//! │       │                                                    │
//! │       ▼                                                    │
//! │  ┌──────────┐   parsed    ┌─────────────────────────────┐  │
//! │  │GoalParser│────goals───▶│      SimulationStore        │  │
//! │  └──────────┘             │  lifecycle / logs / metrics │  │
//! │                           └──────────────▲──────────────┘  │
//! │  decision loop (every decision_interval) │ state updates   │
//! │  ┌────────────────────┐                  │                 │
//! │  │  AgentCoordinator  │──────────────────┘                 │
//! │  └────────────────────┘                                    │
//! │                                                            │
//! │  store snapshots ──▶ derived ExecutionEvents ──▶ listeners │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The loop is push-driven: it waits on the store's status watch instead of
//! polling, so pause, resume, stop and completion all take effect within one
//! scheduler wakeup.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::coordinator::{AgentCoordinator, CoordinationStats};
use crate::error::{CoordinatorError, StoreError};
use crate::events::{EventKind, ExecutionEvent, ListenerSet};
use crate::goal::{GoalParser, SceneContext};
use crate::metrics::SimulationMetrics;
use crate::state::{
    ErrorKind, ErrorSeverity, SimulationState, SimulationStatus, StopReason,
};
use crate::store::{SimulationStore, StoreConfig};
use tandem_env::RuntimeContext;

/// Delay before a retry is attempted after a critical error.
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// How far back a critical error still counts as "recent" for the retry
/// policy.
const RECENT_ERROR_WINDOW: Duration = Duration::from_secs(10);

/// Configuration for one scheduler instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Period between decision ticks (default: 3s)
    pub decision_interval: Duration,

    /// Period between environment refreshes (default: 1s)
    pub update_interval: Duration,

    /// Retries granted before critical errors fail the run (default: 3)
    pub max_retries: u32,

    /// Retry critical errors at all; false fails the run on the first one
    /// (default: true)
    pub retry_on_failure: bool,

    /// Wall-clock budget for the run; ZERO means unbounded (default)
    pub max_duration: Duration,

    /// Step budget for the run; 0 means unbounded (default)
    pub max_steps: usize,

    /// Consecutive failed steps before an agent is marked stuck (default: 5)
    pub stuck_threshold: u32,

    /// Lifetime errors before an agent is marked errored (default: 10)
    pub error_threshold: u32,

    /// Pause instead of retrying when the coordinator fails (default: false)
    pub pause_on_error: bool,

    /// Per-tick progress lines at info level; warnings always log
    /// (default: true)
    pub enable_logging: bool,

    /// Recompute log-derived metrics on every mutation (default: true)
    pub enable_metrics: bool,

    /// Let `run` start the simulation itself rather than wait for an
    /// external `start_execution` call (default: true)
    pub auto_start: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            decision_interval: Duration::from_secs(3),
            update_interval: Duration::from_secs(1),
            max_retries: 3,
            retry_on_failure: true,
            max_duration: Duration::ZERO,
            max_steps: 0,
            stuck_threshold: 5,
            error_threshold: 10,
            pause_on_error: false,
            enable_logging: true,
            enable_metrics: true,
            auto_start: true,
        }
    }
}

impl From<&ExecutionConfig> for StoreConfig {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            update_interval: config.update_interval,
            stuck_threshold: config.stuck_threshold,
            error_threshold: config.error_threshold,
            max_duration: config.max_duration,
            max_steps: config.max_steps,
            enable_metrics: config.enable_metrics,
        }
    }
}

/// Final report for one run.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// Run id assigned at initialization
    pub simulation_id: Uuid,

    /// Run name
    pub name: String,

    /// True only for a run that completed all its objectives
    pub success: bool,

    /// Terminal lifecycle status
    pub status: SimulationStatus,

    /// Why the run stopped
    pub stop_reason: Option<StopReason>,

    /// Human-readable completion reason
    pub reason: String,

    /// Time between start and settle
    pub duration: Duration,

    /// Steps recorded
    pub total_steps: usize,

    /// Objectives credited
    pub objectives_completed: usize,

    /// Objectives defined
    pub total_objectives: usize,

    /// Final overall progress percentage
    pub final_progress: f64,

    /// Messages of every error recorded during the run (resolved or not)
    pub errors: Vec<String>,

    /// Metrics derived from the step log
    pub metrics: SimulationMetrics,

    /// Coordinator-side counters
    pub coordination: CoordinationStats,
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionStatus {
    /// Lifecycle status of the underlying store
    pub simulation: SimulationStatus,

    /// Decision ticks executed so far
    pub tick_count: u64,

    /// Retries consumed so far
    pub retry_count: u32,
}

/// High-water marks for derived event emission. Comparing each snapshot
/// against these yields every event exactly once.
struct EmittedMarks {
    run_id: Option<Uuid>,
    revision: u64,
    status: SimulationStatus,
    progress: u32,
    phase: usize,
    completed: BTreeSet<String>,
    error_count: usize,
}

impl EmittedMarks {
    fn empty() -> Self {
        Self {
            run_id: None,
            revision: 0,
            status: SimulationStatus::Idle,
            progress: 0,
            phase: 1,
            completed: BTreeSet::new(),
            error_count: 0,
        }
    }

    /// Marks everything in `snapshot` as already seen. Used when a new run
    /// id appears, so state carried over from setup emits nothing.
    fn baseline(snapshot: &SimulationState) -> Self {
        let completed = snapshot
            .agents
            .iter()
            .flat_map(|(_, agent)| agent.completed_objectives.iter().cloned())
            .collect();
        Self {
            run_id: Some(snapshot.id),
            revision: snapshot.revision,
            status: snapshot.status,
            progress: snapshot.progress.round() as u32,
            phase: snapshot.current_phase,
            completed,
            error_count: snapshot.errors.len(),
        }
    }
}

struct SchedulerInner<C: RuntimeContext> {
    ctx: Arc<C>,
    config: ExecutionConfig,
    store: SimulationStore<C>,
    events: ListenerSet<ExecutionEvent>,
    tick_count: AtomicU64,
    retry_count: AtomicU32,

    /// Wakes any select waiting inside a decision tick when a stop arrives.
    stop_notify: Notify,

    marks: Mutex<EmittedMarks>,
}

/// Drives simulations end to end.
///
/// Generic over the runtime context, the goal parser and the agent
/// coordinator, so the same scheduler runs against a live decision backend
/// or scripted test doubles.
pub struct ExecutionScheduler<C, P, A>
where
    C: RuntimeContext,
    P: GoalParser,
    A: AgentCoordinator<C>,
{
    inner: Arc<SchedulerInner<C>>,
    parser: P,
    coordinator: AsyncMutex<A>,
}

impl<C, P, A> ExecutionScheduler<C, P, A>
where
    C: RuntimeContext,
    P: GoalParser,
    A: AgentCoordinator<C>,
{
    /// Creates a scheduler with a fresh store.
    pub fn new(ctx: Arc<C>, parser: P, coordinator: A, config: ExecutionConfig) -> Self {
        let store = SimulationStore::new(Arc::clone(&ctx), StoreConfig::from(&config));
        let inner = Arc::new(SchedulerInner {
            ctx,
            config,
            store,
            events: ListenerSet::new(),
            tick_count: AtomicU64::new(0),
            retry_count: AtomicU32::new(0),
            stop_notify: Notify::new(),
            marks: Mutex::new(EmittedMarks::empty()),
        });

        // Every store snapshot is diffed against the emitted marks; the weak
        // handle keeps the subscription from cycling the scheduler alive
        let weak = Arc::downgrade(&inner);
        inner.store.subscribe("scheduler-events", move |snapshot| {
            if let Some(inner) = weak.upgrade() {
                emit_derived_events(&inner, snapshot);
            }
        });

        Self {
            inner,
            parser,
            coordinator: AsyncMutex::new(coordinator),
        }
    }

    // =========================================================================
    // EXECUTION
    // =========================================================================

    /// Runs one simulation to its terminal status and reports the result.
    ///
    /// Parsing or setup failures settle the run as `Failed` and still return
    /// a result, and a stop that lands while the parser is working reports
    /// the settled run; an `Err` here means the store could not accept a new
    /// run (one is already in progress).
    pub async fn run(
        &self,
        name: &str,
        description: &str,
        scene: &SceneContext,
    ) -> Result<ExecutionResult, StoreError> {
        let store = &self.inner.store;

        let simulation_id = store.initialize(name, Vec::new(), scene.spawn_positions)?;
        self.inner.tick_count.store(0, Ordering::SeqCst);
        self.inner.retry_count.store(0, Ordering::SeqCst);
        info!("Executing simulation '{}' ({})", name, simulation_id);

        // Parse the goal into structured objectives
        let parsed = match self.parser.parse(name, description, scene).await {
            Ok(parsed) if parsed.total_objectives() == 0 => {
                let _ = store.record_error(
                    ErrorKind::Ai,
                    "Goal parsing produced no objectives",
                    ErrorSeverity::Critical,
                    None,
                    false,
                );
                store.stop(StopReason::Failed);
                return Ok(self.build_result(CoordinationStats::default()));
            }
            Ok(parsed) => parsed,
            Err(e) => {
                let _ = store.record_error(
                    ErrorKind::Ai,
                    &format!("Goal parsing failed: {}", e),
                    ErrorSeverity::Critical,
                    None,
                    false,
                );
                store.stop(StopReason::Failed);
                return Ok(self.build_result(CoordinationStats::default()));
            }
        };
        if let Err(e) = store.apply_parsed(&parsed) {
            // A stop that landed while the parser was working has already
            // settled the run; report that result instead of the rejection
            if store.status().is_terminal() {
                info!("Stop arrived during parsing; reporting the settled run");
                return Ok(self.build_result(CoordinationStats::default()));
            }
            return Err(e);
        }
        debug!(
            "Parsed {} objectives across {} goals",
            parsed.total_objectives(),
            parsed.goals.len()
        );

        // Prepare the coordinator before anything starts moving
        {
            let mut coordinator = self.coordinator.lock().await;
            if let Err(e) = coordinator.setup(&parsed, &scene.spawn_positions).await {
                let _ = store.record_error(
                    ErrorKind::System,
                    &format!("Coordinator setup failed: {}", e),
                    ErrorSeverity::Critical,
                    None,
                    false,
                );
                store.stop(StopReason::Failed);
                return Ok(self.build_result(CoordinationStats::default()));
            }
        }

        if self.inner.config.auto_start {
            store.start();
        } else {
            debug!("Initialized; waiting for start_execution()");
        }

        // Decision loop: one tick per interval until the run settles. The
        // status watch doubles as the wakeup for start, pause, resume and
        // stop.
        let mut status_rx = store.status_watch();
        loop {
            let status = *status_rx.borrow_and_update();
            match status {
                SimulationStatus::Running => {
                    tokio::select! {
                        _ = self.inner.ctx.sleep(self.inner.config.decision_interval) => {
                            self.execution_step().await;
                        }
                        _ = status_rx.changed() => {}
                    }
                }
                SimulationStatus::Initializing | SimulationStatus::Paused => {
                    let _ = status_rx.changed().await;
                }
                _ => break,
            }
        }

        let coordination = {
            let mut coordinator = self.coordinator.lock().await;
            coordinator.shutdown().await;
            coordinator.coordination_stats()
        };

        let result = self.build_result(coordination);
        info!(
            "Simulation '{}' finished: {} ({})",
            result.name,
            if result.success { "SUCCESS" } else { "FAILURE" },
            result.reason
        );
        Ok(result)
    }

    /// One decision tick: deadlock check, agent advancement, error recovery.
    async fn execution_step(&self) {
        let store = &self.inner.store;

        // A fully blocked pair fails fast, before more decisions are spent
        if store.check_deadlock() {
            return;
        }
        if !store.should_continue() {
            return;
        }

        let tick = self.inner.tick_count.fetch_add(1, Ordering::SeqCst) + 1;
        if self.inner.config.enable_logging {
            let state = store.snapshot();
            info!(
                "Tick {}: progress {:.1}%, {} steps",
                tick,
                state.progress,
                state.steps.len()
            );
        } else {
            debug!("Decision tick {}", tick);
        }

        let advance = {
            let mut coordinator = self.coordinator.lock().await;
            tokio::select! {
                result = coordinator.advance_agents(store) => Some(result),
                _ = self.inner.stop_notify.notified() => None,
            }
        };
        let Some(outcome) = advance else {
            debug!("Decision tick {} abandoned by stop request", tick);
            return;
        };

        if let Err(e) = outcome {
            warn!("Coordinator failure on tick {}: {}", tick, e);
            let agent = match &e {
                CoordinatorError::DecisionFailed { agent, .. } => Some(*agent),
                _ => None,
            };
            if store
                .record_error(ErrorKind::Ai, &e.to_string(), ErrorSeverity::Critical, agent, true)
                .is_err()
            {
                // The run settled while the coordinator was deciding
                return;
            }
            if self.inner.config.pause_on_error {
                store.pause();
                return;
            }
        }

        self.handle_critical_errors().await;
    }

    /// Retry policy: recent unresolved critical errors consume one retry
    /// (after a fixed delay) until the budget is exhausted, then the run
    /// fails.
    async fn handle_critical_errors(&self) {
        let store = &self.inner.store;
        let snapshot = store.snapshot();
        if snapshot.status != SimulationStatus::Running {
            return;
        }

        let now = self.inner.ctx.now();
        let recent: Vec<Uuid> = snapshot
            .errors
            .iter()
            .filter(|e| e.is_unresolved_critical())
            .filter(|e| now.saturating_sub(e.timestamp) <= RECENT_ERROR_WINDOW)
            .map(|e| e.id)
            .collect();
        if recent.is_empty() {
            return;
        }

        if !self.inner.config.retry_on_failure {
            warn!("Critical error with retries disabled; failing run");
            store.stop(StopReason::Failed);
            return;
        }

        let max = self.inner.config.max_retries;
        let used = self.inner.retry_count.load(Ordering::SeqCst);
        if used >= max {
            warn!("Retry budget exhausted after {} retries; failing run", max);
            let _ = store.record_error(
                ErrorKind::System,
                &format!("Maximum retries ({}) exceeded", max),
                ErrorSeverity::Critical,
                None,
                false,
            );
            store.stop(StopReason::Failed);
            return;
        }

        let retry = used + 1;
        self.inner.retry_count.store(retry, Ordering::SeqCst);
        info!(
            "Critical error; retry {}/{} in {:?}",
            retry, max, RETRY_DELAY
        );

        tokio::select! {
            _ = self.inner.ctx.sleep(RETRY_DELAY) => {}
            _ = self.inner.stop_notify.notified() => return,
        }

        // An environment tick can settle the run (budget expiry, completion)
        // while the delay runs; a settled log keeps its records untouched
        if !store.should_continue() {
            debug!("Run settled during retry delay; retry {} abandoned", retry);
            return;
        }

        for id in recent {
            store.resolve_error(id, &format!("Recovered by retry {}", retry));
        }
    }

    // =========================================================================
    // CONTROL
    // =========================================================================

    /// Starts an initialized simulation. Only meaningful with
    /// `auto_start` off, where `run` idles until this is called. Returns
    /// false unless the store was waiting in `Initializing`.
    pub fn start_execution(&self) -> bool {
        self.inner.store.start()
    }

    /// Suspends the running simulation. Returns false if nothing was
    /// running.
    pub fn pause_execution(&self) -> bool {
        self.inner.store.pause()
    }

    /// Resumes a paused simulation. Returns false if nothing was paused.
    pub fn resume_execution(&self) -> bool {
        self.inner.store.resume()
    }

    /// Stops the current run with the given reason. Returns false if there
    /// was no live run to stop.
    ///
    /// Safe from any task; the decision loop observes the transition and
    /// winds down, abandoning any in-flight coordinator call.
    pub fn stop_execution(&self, reason: StopReason) -> bool {
        let stopped = self.inner.store.stop(reason);
        self.inner.stop_notify.notify_waiters();
        if stopped {
            info!("Stop requested ({:?})", reason);
        }
        stopped
    }

    /// Tears the scheduler down: stops any live run, shuts the coordinator
    /// down and drops all listeners.
    pub async fn destroy(&self) {
        self.stop_execution(StopReason::UserStop);
        {
            let mut coordinator = self.coordinator.lock().await;
            coordinator.shutdown().await;
        }
        self.inner.store.unsubscribe("scheduler-events");
        self.inner.events.clear();
        debug!("Scheduler destroyed");
    }

    // =========================================================================
    // OBSERVATION
    // =========================================================================

    /// Registers an event listener (replacing any previous one under the
    /// same id).
    pub fn on_event(
        &self,
        listener_id: &str,
        callback: impl Fn(&ExecutionEvent) + Send + Sync + 'static,
    ) {
        self.inner.events.register(listener_id, callback);
    }

    /// Removes an event listener. Returns false for unknown ids.
    pub fn remove_listener(&self, listener_id: &str) -> bool {
        self.inner.events.remove(listener_id)
    }

    /// The store this scheduler drives.
    pub fn store(&self) -> &SimulationStore<C> {
        &self.inner.store
    }

    /// The scheduler's configuration.
    pub fn config(&self) -> &ExecutionConfig {
        &self.inner.config
    }

    /// Counters and lifecycle status in one view.
    pub fn execution_status(&self) -> ExecutionStatus {
        ExecutionStatus {
            simulation: self.inner.store.status(),
            tick_count: self.inner.tick_count.load(Ordering::SeqCst),
            retry_count: self.inner.retry_count.load(Ordering::SeqCst),
        }
    }

    /// Full snapshot of the driven simulation.
    pub fn observed_state(&self) -> SimulationState {
        self.inner.store.snapshot()
    }

    /// Coordinator-side counters.
    pub async fn coordination_stats(&self) -> CoordinationStats {
        self.coordinator.lock().await.coordination_stats()
    }

    fn build_result(&self, coordination: CoordinationStats) -> ExecutionResult {
        let state = self.inner.store.snapshot();
        let duration = match (state.started_at, state.ended_at) {
            (Some(start), Some(end)) => end.saturating_sub(start),
            (Some(start), None) => self.inner.ctx.now().saturating_sub(start),
            _ => Duration::ZERO,
        };
        let success = state.status == SimulationStatus::Completed
            && state.stop_reason == Some(StopReason::Completed);
        ExecutionResult {
            simulation_id: state.id,
            name: state.name.clone(),
            success,
            status: state.status,
            stop_reason: state.stop_reason,
            reason: completion_reason(&state),
            duration,
            total_steps: state.steps.len(),
            objectives_completed: state.completed_objective_count(),
            total_objectives: state.total_objectives(),
            final_progress: state.progress,
            errors: state.errors.iter().map(|e| e.message.clone()).collect(),
            metrics: state.metrics.clone(),
            coordination,
        }
    }
}

/// Maps terminal state onto the human-readable reason in the result.
fn completion_reason(state: &SimulationState) -> String {
    match state.status {
        SimulationStatus::Completed => match state.stop_reason {
            Some(StopReason::UserStop) => "Simulation stopped by user".to_string(),
            _ => "All objectives completed successfully".to_string(),
        },
        SimulationStatus::Failed => state
            .first_unresolved_critical()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| {
                let unresolved = state.errors.iter().filter(|e| !e.resolved).count();
                format!("Simulation failed with {} unresolved errors", unresolved)
            }),
        SimulationStatus::Paused => "Simulation paused by user".to_string(),
        status => format!("Simulation ended with status {:?}", status),
    }
}

/// Diffs a snapshot against the emitted marks and delivers the difference
/// as events: new errors first, then objective credits, progress, phase,
/// and the lifecycle transition last.
fn emit_derived_events<C: RuntimeContext>(inner: &SchedulerInner<C>, snapshot: &SimulationState) {
    let mut pending: Vec<ExecutionEvent> = Vec::new();
    {
        let mut marks = inner.marks.lock().unwrap();
        let now = snapshot.updated_at;

        if marks.run_id != Some(snapshot.id) {
            // A new run begins with a clean slate and no replayed events
            *marks = EmittedMarks::baseline(snapshot);
            return;
        }

        // Mutators emit outside the state lock, so deliveries can cross on a
        // multi-threaded runtime; a snapshot at or below the high-water
        // revision has already been superseded
        if snapshot.revision <= marks.revision {
            debug!(
                "Dropping stale snapshot (revision {} <= {})",
                snapshot.revision, marks.revision
            );
            return;
        }
        marks.revision = snapshot.revision;

        if snapshot.errors.len() > marks.error_count {
            for record in &snapshot.errors[marks.error_count..] {
                pending.push(ExecutionEvent::new(
                    EventKind::Error,
                    now,
                    json!({
                        "kind": record.kind,
                        "severity": record.severity,
                        "agent": record.agent,
                        "message": record.message,
                    }),
                    &record.message,
                ));
            }
            marks.error_count = snapshot.errors.len();
        }

        for (agent_id, agent) in snapshot.agents.iter() {
            for objective in &agent.completed_objectives {
                if marks.completed.insert(objective.clone()) {
                    pending.push(ExecutionEvent::new(
                        EventKind::ObjectiveCompleted,
                        now,
                        json!({"objective": objective, "agent": agent_id.name()}),
                        &format!("Objective '{}' completed by {}", objective, agent_id),
                    ));
                }
            }
        }

        let progress = snapshot.progress.round() as u32;
        if progress != marks.progress {
            marks.progress = progress;
            pending.push(ExecutionEvent::new(
                EventKind::Progress,
                now,
                json!({
                    "progress": snapshot.progress,
                    "objectives_completed": snapshot.completed_objective_count(),
                    "total_objectives": snapshot.total_objectives(),
                }),
                &format!("Progress: {:.0}%", snapshot.progress),
            ));
        }

        if snapshot.current_phase != marks.phase {
            marks.phase = snapshot.current_phase;
            pending.push(ExecutionEvent::new(
                EventKind::PhaseChanged,
                now,
                json!({
                    "phase": snapshot.current_phase,
                    "total_phases": snapshot.total_phases,
                }),
                &format!(
                    "Entered phase {}/{}",
                    snapshot.current_phase, snapshot.total_phases
                ),
            ));
        }

        if marks.status != snapshot.status {
            let transition = match (marks.status, snapshot.status) {
                (SimulationStatus::Initializing, SimulationStatus::Running) => {
                    Some(ExecutionEvent::new(
                        EventKind::Started,
                        now,
                        json!({"simulation_id": snapshot.id, "name": snapshot.name}),
                        &format!("Simulation '{}' started", snapshot.name),
                    ))
                }
                (_, SimulationStatus::Paused) => Some(ExecutionEvent::new(
                    EventKind::Paused,
                    now,
                    json!({"simulation_id": snapshot.id}),
                    "Simulation paused",
                )),
                (SimulationStatus::Paused, SimulationStatus::Running) => {
                    Some(ExecutionEvent::new(
                        EventKind::Resumed,
                        now,
                        json!({"simulation_id": snapshot.id}),
                        "Simulation resumed",
                    ))
                }
                (_, status) if status.is_terminal() => Some(ExecutionEvent::new(
                    EventKind::Stopped,
                    now,
                    json!({
                        "simulation_id": snapshot.id,
                        "status": snapshot.status,
                        "stop_reason": snapshot.stop_reason,
                    }),
                    &format!("Simulation stopped ({:?})", snapshot.status),
                )),
                _ => None,
            };
            pending.extend(transition);
            marks.status = snapshot.status;
        }
    }

    // Marks are released before listeners run; a listener may safely call
    // back into the scheduler or the store
    for event in &pending {
        inner.events.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goal::{
        AgentRole, Complexity, EnvironmentSpec, Objective, ObjectiveKind, ObjectiveTarget,
        ParsedSimulation, SimulationGoal, Timeline,
    };
    use crate::state::{AgentId, PerAgent, StepResult};
    use async_trait::async_trait;
    use crate::error::ParseError;
    use nalgebra::Vector3;
    use std::sync::atomic::AtomicUsize;
    use tandem_env::TokioContext;

    // ---------------------------------------------------------------------
    // Scripted test doubles
    // ---------------------------------------------------------------------

    enum ParserScript {
        TwoObjectives,
        /// Parks until notified, then parses like `TwoObjectives`
        GatedTwoObjectives(Arc<Notify>),
        Empty,
        Fail,
    }

    struct ScriptedParser {
        script: ParserScript,
    }

    fn two_objective_parse(name: &str) -> ParsedSimulation {
        let mut goal = SimulationGoal::new(
            name,
            "both agents reach their marks",
            Complexity::Simple,
            Duration::ZERO,
        );
        goal.objectives.push(Objective::new(
            "reach-a",
            ObjectiveKind::Movement,
            "P1 reaches mark A",
            ObjectiveTarget::AgentP1,
        ));
        goal.objectives.push(Objective::new(
            "reach-b",
            ObjectiveKind::Movement,
            "P2 reaches mark B",
            ObjectiveTarget::AgentP2,
        ));
        ParsedSimulation {
            goals: vec![goal],
            agent_roles: PerAgent::new(
                AgentRole::new("Scout", "curious"),
                AgentRole::new("Carrier", "methodical"),
            ),
            environment: EnvironmentSpec::default(),
            timeline: Timeline::default(),
        }
    }

    #[async_trait]
    impl GoalParser for ScriptedParser {
        async fn parse(
            &self,
            name: &str,
            _description: &str,
            _scene: &SceneContext,
        ) -> Result<ParsedSimulation, ParseError> {
            match &self.script {
                ParserScript::Fail => Err(ParseError::Unparseable(
                    "decision backend rejected the goal".to_string(),
                )),
                ParserScript::Empty => Ok(ParsedSimulation {
                    goals: vec![SimulationGoal::new(
                        name,
                        "nothing to do",
                        Complexity::Simple,
                        Duration::ZERO,
                    )],
                    agent_roles: PerAgent::new(
                        AgentRole::new("Scout", "curious"),
                        AgentRole::new("Carrier", "methodical"),
                    ),
                    environment: EnvironmentSpec::default(),
                    timeline: Timeline::default(),
                }),
                ParserScript::GatedTwoObjectives(gate) => {
                    gate.notified().await;
                    Ok(two_objective_parse(name))
                }
                ParserScript::TwoObjectives => Ok(two_objective_parse(name)),
            }
        }
    }

    enum CoordinatorScript {
        /// Credits one open objective per decision round
        CompleteOnePerRound,
        /// Every decision round fails
        AlwaysFail,
        /// Takes partial steps forever, never crediting anything
        Drift,
    }

    struct ScriptedCoordinator {
        script: CoordinatorScript,
        stats: CoordinationStats,
        shutdowns: Arc<AtomicUsize>,
    }

    impl ScriptedCoordinator {
        fn new(script: CoordinatorScript) -> Self {
            Self {
                script,
                stats: CoordinationStats::default(),
                shutdowns: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl AgentCoordinator<TokioContext> for ScriptedCoordinator {
        async fn setup(
            &mut self,
            _parsed: &ParsedSimulation,
            _spawn_positions: &PerAgent<Vector3<f64>>,
        ) -> Result<(), CoordinatorError> {
            Ok(())
        }

        async fn advance_agents(
            &mut self,
            store: &SimulationStore<TokioContext>,
        ) -> Result<(), CoordinatorError> {
            self.stats.rounds += 1;
            match self.script {
                CoordinatorScript::AlwaysFail => {
                    self.stats.failures += 1;
                    Err(CoordinatorError::decision_failed(
                        AgentId::P1,
                        "scripted decision failure",
                    ))
                }
                CoordinatorScript::Drift => {
                    for agent in AgentId::ALL {
                        if store
                            .update_agent_state(
                                agent,
                                "wander",
                                StepResult::Partial,
                                Vector3::zeros(),
                                Vector3::zeros(),
                                None,
                                "",
                            )
                            .is_ok()
                        {
                            self.stats.decisions += 1;
                        }
                    }
                    Ok(())
                }
                CoordinatorScript::CompleteOnePerRound => {
                    let state = store.snapshot();
                    for agent in AgentId::ALL {
                        let assigned = state.assigned_objective_ids(agent);
                        let open = assigned.iter().find(|id| {
                            !state.agents.get(agent).completed_objectives.contains(*id)
                        });
                        if let Some(objective) = open {
                            if store
                                .update_agent_state(
                                    agent,
                                    "complete_objective",
                                    StepResult::Success,
                                    Vector3::new(1.0, 0.0, 0.0),
                                    Vector3::zeros(),
                                    Some(objective),
                                    "scripted completion",
                                )
                                .is_ok()
                            {
                                self.stats.decisions += 1;
                            }
                            break;
                        }
                    }
                    Ok(())
                }
            }
        }

        fn coordination_stats(&self) -> CoordinationStats {
            self.stats
        }

        async fn shutdown(&mut self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn make_scheduler(
        parser: ParserScript,
        coordinator: CoordinatorScript,
        config: ExecutionConfig,
    ) -> ExecutionScheduler<TokioContext, ScriptedParser, ScriptedCoordinator> {
        ExecutionScheduler::new(
            TokioContext::shared(),
            ScriptedParser { script: parser },
            ScriptedCoordinator::new(coordinator),
            config,
        )
    }

    fn event_collector(
        scheduler: &ExecutionScheduler<TokioContext, ScriptedParser, ScriptedCoordinator>,
    ) -> Arc<Mutex<Vec<EventKind>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            scheduler.on_event("collector", move |event| {
                seen.lock().unwrap().push(event.kind);
            });
        }
        seen
    }

    // ---------------------------------------------------------------------
    // Runs
    // ---------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_run_completes_when_objectives_met() {
        let scheduler = make_scheduler(
            ParserScript::TwoObjectives,
            CoordinatorScript::CompleteOnePerRound,
            ExecutionConfig::default(),
        );
        let events = event_collector(&scheduler);

        let result = scheduler
            .run("meetup", "both agents reach their marks", &SceneContext::default())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.status, SimulationStatus::Completed);
        assert_eq!(result.stop_reason, Some(StopReason::Completed));
        assert_eq!(result.reason, "All objectives completed successfully");
        assert_eq!(result.objectives_completed, 2);
        assert_eq!(result.total_objectives, 2);
        assert_eq!(result.total_steps, 2);
        assert!((result.final_progress - 100.0).abs() < f64::EPSILON);
        assert!(result.errors.is_empty());
        assert_eq!(result.coordination.rounds, 2);
        assert_eq!(result.coordination.decisions, 2);
        // One objective per 3s decision tick
        assert_eq!(result.duration, Duration::from_secs(6));
        assert_eq!(scheduler.execution_status().tick_count, 2);

        let kinds = events.lock().unwrap().clone();
        assert_eq!(
            kinds,
            vec![
                EventKind::Started,
                EventKind::ObjectiveCompleted,
                EventKind::Progress,
                EventKind::ObjectiveCompleted,
                EventKind::Progress,
                EventKind::Stopped,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_fails_on_parse_error() {
        let scheduler = make_scheduler(
            ParserScript::Fail,
            CoordinatorScript::CompleteOnePerRound,
            ExecutionConfig::default(),
        );
        let events = event_collector(&scheduler);

        let result = scheduler
            .run("bad", "gibberish", &SceneContext::default())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.status, SimulationStatus::Failed);
        assert!(result.reason.contains("Goal parsing failed"));
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("decision backend rejected the goal"));
        assert_eq!(result.total_steps, 0);
        // The coordinator was never engaged
        assert_eq!(result.coordination.rounds, 0);
        assert_eq!(scheduler.execution_status().tick_count, 0);

        let kinds = events.lock().unwrap().clone();
        assert_eq!(kinds, vec![EventKind::Error, EventKind::Stopped]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_fails_without_objectives() {
        let scheduler = make_scheduler(
            ParserScript::Empty,
            CoordinatorScript::CompleteOnePerRound,
            ExecutionConfig::default(),
        );

        let result = scheduler
            .run("hollow", "do nothing in particular", &SceneContext::default())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.status, SimulationStatus::Failed);
        assert!(result.reason.contains("no objectives"));
        assert_eq!(result.total_objectives, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_rejected_while_another_is_live() {
        let scheduler = Arc::new(make_scheduler(
            ParserScript::TwoObjectives,
            CoordinatorScript::Drift,
            ExecutionConfig::default(),
        ));

        let runner = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move {
                scheduler
                    .run("first", "drift around", &SceneContext::default())
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(4)).await;
        let err = scheduler
            .run("second", "overlap", &SceneContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        scheduler.stop_execution(StopReason::UserStop);
        let result = runner.await.unwrap().unwrap();
        assert_eq!(result.name, "first");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_parse_returns_settled_result() {
        let gate = Arc::new(Notify::new());
        let scheduler = Arc::new(make_scheduler(
            ParserScript::GatedTwoObjectives(Arc::clone(&gate)),
            CoordinatorScript::CompleteOnePerRound,
            ExecutionConfig::default(),
        ));

        let runner = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move {
                scheduler
                    .run("interrupted", "stopped mid-parse", &SceneContext::default())
                    .await
            })
        };

        // The stop lands while the parser is still parked
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(scheduler.stop_execution(StopReason::UserStop));
        assert_eq!(
            scheduler.execution_status().simulation,
            SimulationStatus::Completed
        );

        // Once released, the parse output is rejected by the settled store
        // and the run still reports a result
        gate.notify_one();
        let result = runner.await.unwrap().unwrap();
        assert!(!result.success);
        assert_eq!(result.status, SimulationStatus::Completed);
        assert_eq!(result.stop_reason, Some(StopReason::UserStop));
        assert_eq!(result.reason, "Simulation stopped by user");
        assert_eq!(result.total_steps, 0);
        assert_eq!(result.coordination.rounds, 0);
    }

    // ---------------------------------------------------------------------
    // Retry policy
    // ---------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhaust_and_fail_run() {
        let scheduler = make_scheduler(
            ParserScript::TwoObjectives,
            CoordinatorScript::AlwaysFail,
            ExecutionConfig::default(),
        );

        let result = scheduler
            .run("doomed", "never works", &SceneContext::default())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.status, SimulationStatus::Failed);
        assert_eq!(result.stop_reason, Some(StopReason::Failed));
        // The surfaced reason is the cause, not the budget bookkeeping
        assert!(result.reason.contains("scripted decision failure"));
        assert_eq!(scheduler.execution_status().retry_count, 3);
        // Three retried ticks plus the one that exhausted the budget
        assert_eq!(scheduler.execution_status().tick_count, 4);
        // Four coordinator errors plus the retries-exceeded record
        assert_eq!(result.errors.len(), 5);

        let state = scheduler.observed_state();
        let resolved = state.errors.iter().filter(|e| e.resolved).count();
        assert_eq!(resolved, 3);
        assert!(state
            .errors
            .iter()
            .any(|e| e.message.contains("Maximum retries (3) exceeded")));
        assert!(state.errors[0]
            .resolution
            .as_deref()
            .unwrap()
            .contains("Recovered by retry 1"));

        // Ticks at 3s, 8s, 13s, 18s with a 2s retry delay after the first
        // three; the run fails on the fourth tick
        assert_eq!(result.duration, Duration::from_secs(18));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_during_retry_delay_leaves_records_unresolved() {
        let config = ExecutionConfig {
            decision_interval: Duration::from_secs(1),
            max_duration: Duration::from_millis(1500),
            ..ExecutionConfig::default()
        };
        let scheduler = make_scheduler(
            ParserScript::TwoObjectives,
            CoordinatorScript::AlwaysFail,
            config,
        );

        // The tick at 1s records the error and starts the 2s retry delay;
        // the environment tick at 2s exhausts the duration budget first
        let result = scheduler
            .run("expiring", "budget runs out mid-retry", &SceneContext::default())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.status, SimulationStatus::Failed);
        assert_eq!(scheduler.execution_status().retry_count, 1);

        // The settled log keeps its records exactly as the run left them
        let state = scheduler.observed_state();
        assert!(state.errors.iter().all(|e| !e.resolved));
        assert!(state
            .errors
            .iter()
            .any(|e| e.message.contains("Maximum duration")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_disabled_fail_on_first_critical_error() {
        let config = ExecutionConfig {
            retry_on_failure: false,
            ..ExecutionConfig::default()
        };
        let scheduler = make_scheduler(
            ParserScript::TwoObjectives,
            CoordinatorScript::AlwaysFail,
            config,
        );

        let result = scheduler
            .run("fragile", "no second chances", &SceneContext::default())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.status, SimulationStatus::Failed);
        assert_eq!(result.errors.len(), 1);
        assert!(result.reason.contains("scripted decision failure"));
        assert_eq!(scheduler.execution_status().retry_count, 0);
        assert_eq!(scheduler.execution_status().tick_count, 1);
        // The single tick at 3s is also where the run fails
        assert_eq!(result.duration, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_on_error_suspends_instead_of_retrying() {
        let config = ExecutionConfig {
            pause_on_error: true,
            ..ExecutionConfig::default()
        };
        let scheduler = Arc::new(make_scheduler(
            ParserScript::TwoObjectives,
            CoordinatorScript::AlwaysFail,
            config,
        ));
        let events = event_collector(&scheduler);

        let runner = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move {
                scheduler
                    .run("fragile", "fails once", &SceneContext::default())
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(
            scheduler.execution_status().simulation,
            SimulationStatus::Paused
        );
        assert_eq!(scheduler.execution_status().retry_count, 0);

        scheduler.stop_execution(StopReason::Failed);
        let result = runner.await.unwrap().unwrap();
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert!(result.reason.contains("scripted decision failure"));

        let kinds = events.lock().unwrap().clone();
        assert_eq!(
            kinds,
            vec![
                EventKind::Started,
                EventKind::Error,
                EventKind::Paused,
                EventKind::Stopped,
            ]
        );
    }

    // ---------------------------------------------------------------------
    // Pause / resume / stop
    // ---------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_pause_resume_and_user_stop() {
        let scheduler = Arc::new(make_scheduler(
            ParserScript::TwoObjectives,
            CoordinatorScript::Drift,
            ExecutionConfig::default(),
        ));
        let events = event_collector(&scheduler);

        let runner = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move {
                scheduler
                    .run("strolling", "wander", &SceneContext::default())
                    .await
            })
        };

        // Two ticks land at 3s and 6s
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert_eq!(scheduler.execution_status().tick_count, 2);

        assert!(scheduler.pause_execution());
        assert!(!scheduler.pause_execution());

        // The decision loop is quiet while paused
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(scheduler.execution_status().tick_count, 2);
        assert_eq!(
            scheduler.execution_status().simulation,
            SimulationStatus::Paused
        );

        assert!(scheduler.resume_execution());
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(scheduler.execution_status().tick_count, 3);

        assert!(scheduler.stop_execution(StopReason::UserStop));
        assert!(!scheduler.stop_execution(StopReason::UserStop));

        let result = runner.await.unwrap().unwrap();
        assert!(!result.success);
        assert_eq!(result.status, SimulationStatus::Completed);
        assert_eq!(result.stop_reason, Some(StopReason::UserStop));
        assert_eq!(result.reason, "Simulation stopped by user");

        let kinds = events.lock().unwrap().clone();
        assert_eq!(
            kinds,
            vec![
                EventKind::Started,
                EventKind::Paused,
                EventKind::Resumed,
                EventKind::Stopped,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_snapshot_delivery_cannot_forge_transitions() {
        let scheduler = Arc::new(make_scheduler(
            ParserScript::TwoObjectives,
            CoordinatorScript::Drift,
            ExecutionConfig::default(),
        ));
        let events = event_collector(&scheduler);

        let runner = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move {
                scheduler
                    .run("strolling", "wander", &SceneContext::default())
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(4)).await;
        let stale = scheduler.observed_state();
        assert_eq!(stale.status, SimulationStatus::Running);

        assert!(scheduler.pause_execution());

        // Listeners run outside the state lock, so a snapshot captured
        // before the pause can be delivered after it; the old revision must
        // not read as a fresh Paused -> Running transition
        emit_derived_events(&scheduler.inner, &stale);
        {
            let kinds = events.lock().unwrap();
            assert_eq!(kinds.last(), Some(&EventKind::Paused));
            assert!(!kinds.contains(&EventKind::Resumed));
        }

        // A real resume still comes through
        assert!(scheduler.resume_execution());
        assert_eq!(events.lock().unwrap().last(), Some(&EventKind::Resumed));

        scheduler.stop_execution(StopReason::UserStop);
        runner.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_start_waits_for_start_execution() {
        let config = ExecutionConfig {
            auto_start: false,
            ..ExecutionConfig::default()
        };
        let scheduler = Arc::new(make_scheduler(
            ParserScript::TwoObjectives,
            CoordinatorScript::CompleteOnePerRound,
            config,
        ));

        let runner = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move {
                scheduler
                    .run("deferred", "hold until started", &SceneContext::default())
                    .await
            })
        };

        // Without auto_start the run idles in Initializing, tick-free
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(
            scheduler.execution_status().simulation,
            SimulationStatus::Initializing
        );
        assert_eq!(scheduler.execution_status().tick_count, 0);

        assert!(scheduler.start_execution());
        assert!(!scheduler.start_execution());

        let result = runner.await.unwrap().unwrap();
        assert!(result.success);
        assert_eq!(result.status, SimulationStatus::Completed);
        assert_eq!(scheduler.execution_status().tick_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_after_run() {
        let scheduler = make_scheduler(
            ParserScript::TwoObjectives,
            CoordinatorScript::CompleteOnePerRound,
            ExecutionConfig::default(),
        );
        let shutdowns = scheduler.coordinator.lock().await.shutdowns.clone();

        let result = scheduler
            .run("meetup", "both agents reach their marks", &SceneContext::default())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);

        scheduler.destroy().await;
        assert_eq!(shutdowns.load(Ordering::SeqCst), 2);
        // The terminal state is untouched and the subscription is gone
        assert_eq!(scheduler.execution_status().simulation, SimulationStatus::Completed);
        assert!(!scheduler.store().unsubscribe("scheduler-events"));
    }
}
