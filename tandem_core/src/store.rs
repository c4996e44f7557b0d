//! Simulation state store.
//!
//! The store is the single authoritative holder of one run's
//! [`SimulationState`]. Every mutation validates the lifecycle first, stamps
//! time from the [`RuntimeContext`], recomputes all derived values inside
//! one lock scope, and broadcasts a cloned snapshot after the lock is
//! released. Consumers never hold references into live state.

use nalgebra::Vector3;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::events::ListenerSet;
use crate::goal::{ParsedSimulation, SimulationGoal};
use crate::metrics::{self, SimulationMetrics};
use crate::state::{
    AgentId, AgentState, AgentStatus, ErrorKind, ErrorRecord, ErrorSeverity, PerAgent,
    SimulationState, SimulationStatus, SimulationStep, StepResult, StopReason,
};
use tandem_env::RuntimeContext;

/// Tuning knobs for the state store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Environment tick period
    pub update_interval: Duration,

    /// Consecutive failed steps before an agent is marked stuck
    pub stuck_threshold: u32,

    /// Lifetime errors before an agent is marked errored
    pub error_threshold: u32,

    /// Wall-clock budget for the run (ZERO = unbounded)
    pub max_duration: Duration,

    /// Step budget for the run (0 = unbounded)
    pub max_steps: usize,

    /// Recompute log-derived metrics on every mutation
    pub enable_metrics: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(1),
            stuck_threshold: 5,
            error_threshold: 10,
            max_duration: Duration::ZERO,
            max_steps: 0,
            enable_metrics: true,
        }
    }
}

struct StoreInner<C: RuntimeContext> {
    ctx: Arc<C>,
    config: StoreConfig,
    state: Mutex<SimulationState>,
    subscribers: ListenerSet<SimulationState>,
    status_tx: watch::Sender<SimulationStatus>,

    /// Generation counter for the environment tick loop. Bumping it retires
    /// any loop spawned under an earlier value.
    tick_epoch: AtomicU64,
}

/// Handle to the shared simulation state.
///
/// Cheap to clone; all clones address the same underlying aggregate.
pub struct SimulationStore<C: RuntimeContext> {
    inner: Arc<StoreInner<C>>,
}

impl<C: RuntimeContext> Clone for SimulationStore<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: RuntimeContext> SimulationStore<C> {
    /// Creates an idle store.
    pub fn new(ctx: Arc<C>, config: StoreConfig) -> Self {
        let now = ctx.now();
        let (status_tx, _) = watch::channel(SimulationStatus::Idle);
        Self {
            inner: Arc::new(StoreInner {
                ctx,
                config,
                state: Mutex::new(SimulationState::new("", now)),
                subscribers: ListenerSet::new(),
                status_tx,
                tick_epoch: AtomicU64::new(0),
            }),
        }
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Resets the aggregate for a new run and moves it to `Initializing`.
    ///
    /// Valid from `Idle` or a terminal status; the store is reusable across
    /// runs. Returns the new run id.
    pub fn initialize(
        &self,
        name: &str,
        goals: Vec<SimulationGoal>,
        initial_positions: PerAgent<Vector3<f64>>,
    ) -> Result<Uuid, StoreError> {
        let (snapshot, id) = {
            let mut state = self.inner.state.lock().unwrap();
            if !matches!(
                state.status,
                SimulationStatus::Idle | SimulationStatus::Completed | SimulationStatus::Failed
            ) {
                return Err(StoreError::InvalidTransition {
                    from: state.status,
                    operation: "initialize",
                });
            }
            let now = self.inner.ctx.now();
            let mut next = SimulationState::new(name, now);
            next.status = SimulationStatus::Initializing;
            next.goals = goals;
            next.agents = initial_positions.map(|p| AgentState::at(*p));
            next.initial_positions = initial_positions;
            // The broadcast ordinal spans runs, so a straggler snapshot from
            // the previous run can never outrank the new run's first one
            next.revision = state.revision;
            recompute_derived(&mut next, &self.inner.config, now);
            *state = next;
            (snapshot_for_broadcast(&mut state), state.id)
        };
        self.inner
            .status_tx
            .send_replace(SimulationStatus::Initializing);
        self.inner.subscribers.emit(&snapshot);
        info!(
            "Simulation '{}' initialized ({} objectives)",
            snapshot.name,
            snapshot.total_objectives()
        );
        Ok(id)
    }

    /// Records parser output that shapes the run: goals, environment and
    /// timeline. Valid only while `Initializing`.
    pub fn apply_parsed(&self, parsed: &ParsedSimulation) -> Result<(), StoreError> {
        let snapshot = {
            let mut state = self.inner.state.lock().unwrap();
            if state.status != SimulationStatus::Initializing {
                return Err(StoreError::InvalidTransition {
                    from: state.status,
                    operation: "apply_parsed",
                });
            }
            let now = self.inner.ctx.now();
            state.goals = parsed.goals.clone();
            state.environment.scene = parsed.environment.scene.clone();
            state.environment.available_objects = parsed.environment.available_objects.clone();
            state.environment.physics_enabled = parsed.environment.physics_enabled;
            state.total_phases = parsed.timeline.phases.len().max(1);
            recompute_derived(&mut state, &self.inner.config, now);
            snapshot_for_broadcast(&mut state)
        };
        self.inner.subscribers.emit(&snapshot);
        Ok(())
    }

    /// Moves `Initializing` to `Running` and spawns the environment tick
    /// loop. Guarded no-op (returns false) from any other status.
    pub fn start(&self) -> bool {
        let snapshot = {
            let mut state = self.inner.state.lock().unwrap();
            if state.status != SimulationStatus::Initializing {
                debug!("start ignored (status: {:?})", state.status);
                return false;
            }
            let now = self.inner.ctx.now();
            state.status = SimulationStatus::Running;
            state.started_at = Some(now);
            for agent_id in AgentId::ALL {
                let agent = state.agents.get_mut(agent_id);
                if agent.status == AgentStatus::Idle {
                    agent.status = AgentStatus::Active;
                }
            }
            update_environment_clock(&mut state, &self.inner.config, now);
            state.updated_at = now;
            snapshot_for_broadcast(&mut state)
        };
        self.inner.status_tx.send_replace(SimulationStatus::Running);
        self.inner.subscribers.emit(&snapshot);
        self.spawn_tick_loop();
        info!("Simulation '{}' running", snapshot.name);
        true
    }

    /// Suspends a running simulation. Guarded no-op unless `Running`.
    pub fn pause(&self) -> bool {
        let snapshot = {
            let mut state = self.inner.state.lock().unwrap();
            if state.status != SimulationStatus::Running {
                debug!("pause ignored (status: {:?})", state.status);
                return false;
            }
            state.status = SimulationStatus::Paused;
            state.updated_at = self.inner.ctx.now();
            snapshot_for_broadcast(&mut state)
        };
        // Retire the tick loop; resume spawns a fresh one
        self.inner.tick_epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.status_tx.send_replace(SimulationStatus::Paused);
        self.inner.subscribers.emit(&snapshot);
        info!("Simulation '{}' paused", snapshot.name);
        true
    }

    /// Resumes a paused simulation. Guarded no-op unless `Paused`.
    pub fn resume(&self) -> bool {
        let snapshot = {
            let mut state = self.inner.state.lock().unwrap();
            if state.status != SimulationStatus::Paused {
                debug!("resume ignored (status: {:?})", state.status);
                return false;
            }
            state.status = SimulationStatus::Running;
            state.updated_at = self.inner.ctx.now();
            snapshot_for_broadcast(&mut state)
        };
        self.inner.status_tx.send_replace(SimulationStatus::Running);
        self.inner.subscribers.emit(&snapshot);
        self.spawn_tick_loop();
        info!("Simulation '{}' resumed", snapshot.name);
        true
    }

    /// Moves the run to its terminal status for `reason`.
    ///
    /// Valid from `Initializing`, `Running` or `Paused`; a second stop (or a
    /// stop while idle) is a guarded no-op returning false.
    pub fn stop(&self, reason: StopReason) -> bool {
        let snapshot = {
            let mut state = self.inner.state.lock().unwrap();
            if !matches!(
                state.status,
                SimulationStatus::Initializing
                    | SimulationStatus::Running
                    | SimulationStatus::Paused
            ) {
                debug!("stop ignored (status: {:?})", state.status);
                return false;
            }
            let now = self.inner.ctx.now();
            update_environment_clock(&mut state, &self.inner.config, now);
            recompute_derived(&mut state, &self.inner.config, now);
            apply_stop(&mut state, reason, now);
            snapshot_for_broadcast(&mut state)
        };
        self.inner.tick_epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.status_tx.send_replace(snapshot.status);
        self.inner.subscribers.emit(&snapshot);
        info!(
            "Simulation '{}' stopped ({:?} -> {:?})",
            snapshot.name, reason, snapshot.status
        );
        true
    }

    // =========================================================================
    // MUTATIONS
    // =========================================================================

    /// Applies one agent action: appends a step record and updates the
    /// acting agent's kinematics, counters and objective credit.
    ///
    /// Rejected outside `Running`, so straggler updates arriving after a
    /// stop or pause cannot corrupt a settled run.
    #[allow(clippy::too_many_arguments)]
    pub fn update_agent_state(
        &self,
        agent: AgentId,
        action: &str,
        result: StepResult,
        new_position: Vector3<f64>,
        new_velocity: Vector3<f64>,
        objective: Option<&str>,
        details: &str,
    ) -> Result<(), StoreError> {
        let (snapshot, transition) = {
            let mut state = self.inner.state.lock().unwrap();
            if state.status != SimulationStatus::Running {
                return Err(StoreError::NotRunning {
                    status: state.status,
                });
            }
            let now = self.inner.ctx.now();

            // Objectives are credited only on success and only when the id
            // is actually assigned to the acting agent
            let creditable = match (objective, result) {
                (Some(obj), StepResult::Success) => state
                    .goals
                    .iter()
                    .flat_map(|g| g.objectives.iter())
                    .any(|o| o.id == obj && o.target.includes(agent)),
                _ => false,
            };
            if objective.is_some() && result == StepResult::Success && !creditable {
                debug!(
                    "objective '{}' not assigned to {}; credit skipped",
                    objective.unwrap_or_default(),
                    agent
                );
            }

            let previous_ts = state
                .steps
                .iter()
                .rev()
                .find(|s| s.agent == agent)
                .map(|s| s.timestamp)
                .or(state.started_at)
                .unwrap_or(state.created_at);

            state.steps.push(SimulationStep {
                id: Uuid::new_v4(),
                timestamp: now,
                agent,
                action: action.to_string(),
                result,
                details: details.to_string(),
                position: new_position,
                objective: objective.map(str::to_string),
                duration: now.saturating_sub(previous_ts),
            });

            {
                let agent_state = state.agents.get_mut(agent);
                agent_state.position = new_position;
                agent_state.velocity = new_velocity;
                agent_state.last_action = Some(action.to_string());
                agent_state.last_action_at = Some(now);
                if let Some(obj) = objective {
                    agent_state.current_objective = Some(obj.to_string());
                }
                match result {
                    StepResult::Success => {
                        agent_state.stuck_count = 0;
                        if creditable {
                            if let Some(obj) = objective {
                                agent_state.completed_objectives.insert(obj.to_string());
                            }
                        }
                    }
                    StepResult::Failure => {
                        agent_state.stuck_count += 1;
                        agent_state.error_count += 1;
                    }
                    StepResult::Partial => {}
                }
            }

            recompute_derived(&mut state, &self.inner.config, now);
            let transition = maybe_complete(&mut state, now);
            (snapshot_for_broadcast(&mut state), transition)
        };

        if let Some(status) = transition {
            self.inner.tick_epoch.fetch_add(1, Ordering::SeqCst);
            self.inner.status_tx.send_replace(status);
        }
        self.inner.subscribers.emit(&snapshot);
        Ok(())
    }

    /// Appends an error record and attributes it to an agent if given.
    ///
    /// Accepted while `Initializing`, `Running` or `Paused`; rejected once
    /// the run has settled. Returns the record id.
    pub fn record_error(
        &self,
        kind: ErrorKind,
        message: &str,
        severity: ErrorSeverity,
        agent: Option<AgentId>,
        recoverable: bool,
    ) -> Result<Uuid, StoreError> {
        let (snapshot, id) = {
            let mut state = self.inner.state.lock().unwrap();
            if !matches!(
                state.status,
                SimulationStatus::Initializing
                    | SimulationStatus::Running
                    | SimulationStatus::Paused
            ) {
                return Err(StoreError::NotRunning {
                    status: state.status,
                });
            }
            let now = self.inner.ctx.now();
            let id = Uuid::new_v4();
            state.errors.push(ErrorRecord {
                id,
                timestamp: now,
                kind,
                severity,
                message: message.to_string(),
                agent,
                recoverable,
                resolved: false,
                resolution: None,
            });
            if let Some(agent_id) = agent {
                state.agents.get_mut(agent_id).error_count += 1;
            }
            recompute_derived(&mut state, &self.inner.config, now);
            (snapshot_for_broadcast(&mut state), id)
        };
        self.inner.subscribers.emit(&snapshot);
        warn!("Simulation error ({:?}/{:?}): {}", kind, severity, message);
        Ok(id)
    }

    /// Marks a recorded error resolved. Returns false for unknown ids and
    /// once the run has settled (the terminal log stays as recorded);
    /// resolving twice on a live run is a no-op returning true.
    pub fn resolve_error(&self, id: Uuid, resolution: &str) -> bool {
        let snapshot = {
            let mut state = self.inner.state.lock().unwrap();
            if state.status.is_terminal() {
                debug!("resolve ignored (status: {:?})", state.status);
                return false;
            }
            let now = self.inner.ctx.now();
            let Some(record) = state.errors.iter_mut().find(|e| e.id == id) else {
                return false;
            };
            if record.resolved {
                return true;
            }
            record.resolved = true;
            record.resolution = Some(resolution.to_string());
            state.updated_at = now;
            snapshot_for_broadcast(&mut state)
        };
        self.inner.subscribers.emit(&snapshot);
        debug!("Error {} resolved", id);
        true
    }

    // =========================================================================
    // QUERIES AND PERIODIC WORK
    // =========================================================================

    /// Pure continuation predicate: true only while `Running`.
    pub fn should_continue(&self) -> bool {
        self.inner.state.lock().unwrap().status == SimulationStatus::Running
    }

    /// Detects total deadlock (every agent stuck or errored) and fails the
    /// run: records a critical system error and stops with `Failed`.
    ///
    /// Returns true when the deadlock transition fired.
    pub fn check_deadlock(&self) -> bool {
        let snapshot = {
            let mut state = self.inner.state.lock().unwrap();
            if state.status != SimulationStatus::Running {
                return false;
            }
            let all_blocked = AgentId::ALL.iter().all(|id| {
                matches!(
                    state.agents.get(*id).status,
                    AgentStatus::Stuck | AgentStatus::Error
                )
            });
            if !all_blocked {
                return false;
            }
            let now = self.inner.ctx.now();
            state.errors.push(ErrorRecord {
                id: Uuid::new_v4(),
                timestamp: now,
                kind: ErrorKind::System,
                severity: ErrorSeverity::Critical,
                message: "All agents are stuck or errored; simulation cannot progress"
                    .to_string(),
                agent: None,
                recoverable: false,
                resolved: false,
                resolution: None,
            });
            update_environment_clock(&mut state, &self.inner.config, now);
            recompute_derived(&mut state, &self.inner.config, now);
            apply_stop(&mut state, StopReason::Failed, now);
            snapshot_for_broadcast(&mut state)
        };
        self.inner.tick_epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.status_tx.send_replace(SimulationStatus::Failed);
        self.inner.subscribers.emit(&snapshot);
        warn!("Deadlock detected; simulation '{}' failed", snapshot.name);
        true
    }

    /// One environment refresh: advances the run clock, recomputes derived
    /// values, enforces duration and step budgets, and applies completion.
    ///
    /// Returns false once the simulation is no longer running, so periodic
    /// drivers know to stop.
    pub fn environment_tick(&self) -> bool {
        let (snapshot, transition, still_running) = {
            let mut state = self.inner.state.lock().unwrap();
            if state.status != SimulationStatus::Running {
                return false;
            }
            let now = self.inner.ctx.now();
            update_environment_clock(&mut state, &self.inner.config, now);
            recompute_derived(&mut state, &self.inner.config, now);

            let mut transition = maybe_complete(&mut state, now);
            if transition.is_none() {
                let config = &self.inner.config;
                let exhausted = if !config.max_duration.is_zero()
                    && state.environment.elapsed >= config.max_duration
                {
                    Some(format!(
                        "Maximum duration of {:?} reached",
                        config.max_duration
                    ))
                } else if config.max_steps > 0 && state.steps.len() >= config.max_steps {
                    Some(format!(
                        "Maximum step budget of {} reached",
                        config.max_steps
                    ))
                } else {
                    None
                };
                if let Some(message) = exhausted {
                    state.errors.push(ErrorRecord {
                        id: Uuid::new_v4(),
                        timestamp: now,
                        kind: ErrorKind::Timeout,
                        severity: ErrorSeverity::Critical,
                        message,
                        agent: None,
                        recoverable: false,
                        resolved: false,
                        resolution: None,
                    });
                    apply_stop(&mut state, StopReason::Failed, now);
                    transition = Some(SimulationStatus::Failed);
                }
            }

            let still_running = state.status == SimulationStatus::Running;
            (snapshot_for_broadcast(&mut state), transition, still_running)
        };
        if let Some(status) = transition {
            self.inner.tick_epoch.fetch_add(1, Ordering::SeqCst);
            self.inner.status_tx.send_replace(status);
        }
        self.inner.subscribers.emit(&snapshot);
        still_running
    }

    /// Returns a full clone of the current state.
    pub fn snapshot(&self) -> SimulationState {
        self.inner.state.lock().unwrap().clone()
    }

    /// Returns the current lifecycle status.
    pub fn status(&self) -> SimulationStatus {
        self.inner.state.lock().unwrap().status
    }

    /// Watch channel carrying every status transition.
    ///
    /// Waiters use this instead of polling the store on an interval.
    pub fn status_watch(&self) -> watch::Receiver<SimulationStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Registers a snapshot listener (replacing any previous one under the
    /// same id). Listeners receive a cloned snapshot after every mutation.
    pub fn subscribe(
        &self,
        listener_id: &str,
        callback: impl Fn(&SimulationState) + Send + Sync + 'static,
    ) {
        self.inner.subscribers.register(listener_id, callback);
    }

    /// Removes a snapshot listener. Returns false for unknown ids.
    pub fn unsubscribe(&self, listener_id: &str) -> bool {
        self.inner.subscribers.remove(listener_id)
    }

    /// The store's configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    fn spawn_tick_loop(&self) {
        let epoch = self.inner.tick_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let store = self.clone();
        let interval = self.inner.config.update_interval;
        self.inner.ctx.spawn("environment-tick", async move {
            loop {
                store.inner.ctx.sleep(interval).await;
                if store.inner.tick_epoch.load(Ordering::SeqCst) != epoch {
                    break;
                }
                if !store.environment_tick() {
                    break;
                }
            }
        });
    }
}

// =============================================================================
// DERIVATION HELPERS
// =============================================================================

/// Recomputes everything derivable from the logs and goals: per-agent
/// progress, current objective, agent status, overall progress, phase, and
/// (when enabled) log metrics.
fn recompute_derived(state: &mut SimulationState, config: &StoreConfig, now: Duration) {
    let active = matches!(
        state.status,
        SimulationStatus::Running | SimulationStatus::Paused
    );
    let assigned = PerAgent::new(
        state.assigned_objective_ids(AgentId::P1),
        state.assigned_objective_ids(AgentId::P2),
    );

    for agent_id in AgentId::ALL {
        let ids = assigned.get(agent_id);
        let agent = state.agents.get_mut(agent_id);

        let completed = ids
            .iter()
            .filter(|id| agent.completed_objectives.contains(*id))
            .count();
        agent.progress = if ids.is_empty() {
            0.0
        } else {
            completed as f64 / ids.len() as f64 * 100.0
        };

        // Advance to the next open objective once the current one is done
        let current_done = agent
            .current_objective
            .as_ref()
            .map_or(true, |id| agent.completed_objectives.contains(id));
        if current_done {
            agent.current_objective = ids
                .iter()
                .find(|id| !agent.completed_objectives.contains(*id))
                .cloned();
        }

        if active {
            agent.status = if agent.stuck_count >= config.stuck_threshold {
                AgentStatus::Stuck
            } else if agent.error_count >= config.error_threshold {
                AgentStatus::Error
            } else if agent.completed_all(ids) {
                AgentStatus::Completed
            } else {
                AgentStatus::Active
            };
        }
    }

    let completed_sum = state.completed_objective_count();
    let total = state.total_objectives();
    state.progress = metrics::overall_progress(completed_sum, total);
    state.current_phase = metrics::current_phase(state.progress, state.total_phases);

    if config.enable_metrics {
        state.metrics = SimulationMetrics::recompute(
            &state.steps,
            &state.initial_positions,
            completed_sum,
            total,
        );
    } else {
        state.metrics.total_steps = state.steps.len();
        state.metrics.objectives_completed = completed_sum;
        state.metrics.total_objectives = total;
    }

    state.updated_at = now;
}

/// Refreshes elapsed time and the remaining duration budget.
fn update_environment_clock(state: &mut SimulationState, config: &StoreConfig, now: Duration) {
    if let Some(started) = state.started_at {
        state.environment.elapsed = now.saturating_sub(started);
    }
    state.environment.time_remaining = if config.max_duration.is_zero() {
        // Unbounded runs report zero remaining rather than a fake deadline
        Duration::ZERO
    } else {
        config
            .max_duration
            .saturating_sub(state.environment.elapsed)
    };
}

/// Applies the terminal transition. Callers have already validated the
/// current status and recomputed derived values.
fn apply_stop(state: &mut SimulationState, reason: StopReason, now: Duration) {
    state.status = reason.terminal_status();
    state.stop_reason = Some(reason);
    state.ended_at = Some(now);
    state.updated_at = now;
}

/// Stamps the next broadcast ordinal and clones the state for emission.
///
/// Listeners run after the state lock is released, so two mutations can
/// deliver their snapshots in either order; the ordinal lets consumers
/// recognize and drop the stale one.
fn snapshot_for_broadcast(state: &mut SimulationState) -> SimulationState {
    state.revision += 1;
    state.clone()
}

/// Completion detection: a running simulation with every objective credited
/// stops as `Completed`. Returns the new status when the transition fired.
fn maybe_complete(state: &mut SimulationState, now: Duration) -> Option<SimulationStatus> {
    if state.status == SimulationStatus::Running
        && state.total_objectives() > 0
        && state.progress >= 100.0
    {
        apply_stop(state, StopReason::Completed, now);
        info!("Simulation '{}' completed (100% progress)", state.name);
        Some(state.status)
    } else {
        None
    }
}
