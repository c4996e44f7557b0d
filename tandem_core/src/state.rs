//! Core data model for dual-agent simulation runs.
//!
//! Everything in this module is plain data: the aggregate
//! [`SimulationState`] plus the records it is built from. All mutation goes
//! through the store; consumers only ever see cloned snapshots.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::goal::{Objective, SimulationGoal};
use crate::metrics::SimulationMetrics;

/// Identifier for one of the two simulated agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentId {
    P1,
    P2,
}

impl AgentId {
    /// Both agents, in canonical order.
    pub const ALL: [AgentId; 2] = [AgentId::P1, AgentId::P2];

    /// Returns the other agent.
    pub fn partner(&self) -> AgentId {
        match self {
            AgentId::P1 => AgentId::P2,
            AgentId::P2 => AgentId::P1,
        }
    }

    /// Returns the canonical name.
    pub fn name(&self) -> &'static str {
        match self {
            AgentId::P1 => "agent-p1",
            AgentId::P2 => "agent-p2",
        }
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for AgentId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "agent-p1" | "agent_p1" | "p1" => Ok(AgentId::P1),
            "agent-p2" | "agent_p2" | "p2" => Ok(AgentId::P2),
            _ => Err(format!("Unknown agent: {}", s)),
        }
    }
}

/// A value held once per agent.
///
/// Total map over [`AgentId`]: lookups cannot miss and iteration order is
/// fixed (P1 first), which keeps snapshots and event emission deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PerAgent<T> {
    pub p1: T,
    pub p2: T,
}

impl<T> PerAgent<T> {
    /// Creates a pair from explicit values.
    pub fn new(p1: T, p2: T) -> Self {
        Self { p1, p2 }
    }

    /// Creates a pair holding the same value for both agents.
    pub fn splat(value: T) -> Self
    where
        T: Clone,
    {
        Self {
            p1: value.clone(),
            p2: value,
        }
    }

    pub fn get(&self, agent: AgentId) -> &T {
        match agent {
            AgentId::P1 => &self.p1,
            AgentId::P2 => &self.p2,
        }
    }

    pub fn get_mut(&mut self, agent: AgentId) -> &mut T {
        match agent {
            AgentId::P1 => &mut self.p1,
            AgentId::P2 => &mut self.p2,
        }
    }

    /// Iterates both entries in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (AgentId, &T)> {
        [(AgentId::P1, &self.p1), (AgentId::P2, &self.p2)].into_iter()
    }

    /// Builds a new pair by applying `f` to each entry.
    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> PerAgent<U> {
        PerAgent {
            p1: f(&self.p1),
            p2: f(&self.p2),
        }
    }
}

/// Lifecycle status of the simulation aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationStatus {
    /// No run has been set up yet (or the previous run was cleared)
    Idle,
    /// Goals accepted, agents placed, execution not started
    Initializing,
    /// Tick loops live, mutations accepted
    Running,
    /// Execution suspended; may resume
    Paused,
    /// Terminal: the run ended cleanly
    Completed,
    /// Terminal: the run ended due to errors or exhausted budgets
    Failed,
}

impl SimulationStatus {
    /// Returns true for the two end states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SimulationStatus::Completed | SimulationStatus::Failed)
    }
}

/// Why a run was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// All objectives were met
    Completed,
    /// Unrecoverable errors or an exhausted budget
    Failed,
    /// Explicit stop request from the outside
    UserStop,
}

impl StopReason {
    /// The terminal status this reason maps to.
    pub fn terminal_status(&self) -> SimulationStatus {
        match self {
            StopReason::Completed | StopReason::UserStop => SimulationStatus::Completed,
            StopReason::Failed => SimulationStatus::Failed,
        }
    }
}

/// Derived status of a single agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Before the run starts
    Idle,
    /// Making progress
    Active,
    /// Too many consecutive failures
    Stuck,
    /// All assigned objectives done
    Completed,
    /// Lifetime error budget exceeded
    Error,
}

/// Outcome of a single recorded action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepResult {
    Success,
    Failure,
    Partial,
}

/// Classification of a recorded error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Movement,
    Physics,
    Ai,
    System,
    Timeout,
}

/// Severity of a recorded error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Live state of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// Derived status (see [`AgentStatus`])
    pub status: AgentStatus,

    /// Position [x, y, z] in meters (scene frame)
    pub position: Vector3<f64>,

    /// Orientation as Euler angles [roll, pitch, yaw] in radians
    pub rotation: Vector3<f64>,

    /// Velocity [vx, vy, vz] in m/s
    pub velocity: Vector3<f64>,

    /// Objective the agent is currently pursuing
    pub current_objective: Option<String>,

    /// Objective ids credited to this agent (at most once each)
    pub completed_objectives: BTreeSet<String>,

    /// Share of assigned objectives completed, 0-100
    pub progress: f64,

    /// Most recent action description
    pub last_action: Option<String>,

    /// Context time of the most recent action
    pub last_action_at: Option<Duration>,

    /// Consecutive failed steps (reset by any success)
    pub stuck_count: u32,

    /// Lifetime errors attributed to this agent
    pub error_count: u32,
}

impl AgentState {
    /// Creates an idle agent at the given spawn position.
    pub fn at(position: Vector3<f64>) -> Self {
        Self {
            status: AgentStatus::Idle,
            position,
            rotation: Vector3::zeros(),
            velocity: Vector3::zeros(),
            current_objective: None,
            completed_objectives: BTreeSet::new(),
            progress: 0.0,
            last_action: None,
            last_action_at: None,
            stuck_count: 0,
            error_count: 0,
        }
    }

    /// Returns true once every id in `assigned` has been credited.
    pub fn completed_all(&self, assigned: &[String]) -> bool {
        !assigned.is_empty()
            && assigned
                .iter()
                .all(|id| self.completed_objectives.contains(id))
    }
}

impl Default for AgentState {
    fn default() -> Self {
        Self::at(Vector3::zeros())
    }
}

/// One entry in the append-only step log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationStep {
    /// Unique step id
    pub id: Uuid,

    /// Context time when the step was recorded
    pub timestamp: Duration,

    /// Acting agent
    pub agent: AgentId,

    /// Action description (e.g. "move_toward")
    pub action: String,

    /// Outcome of the action
    pub result: StepResult,

    /// Free-form detail text
    pub details: String,

    /// Agent position after the action
    pub position: Vector3<f64>,

    /// Objective the action served, if any
    pub objective: Option<String>,

    /// Gap since this agent's previous step (or since run start)
    pub duration: Duration,
}

/// One entry in the append-only error log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Unique error id
    pub id: Uuid,

    /// Context time when the error was recorded
    pub timestamp: Duration,

    /// Classification
    pub kind: ErrorKind,

    /// Severity
    pub severity: ErrorSeverity,

    /// Human-readable message
    pub message: String,

    /// Agent the error is attributed to, if any
    pub agent: Option<AgentId>,

    /// Whether the recovery policy may retry past this error
    pub recoverable: bool,

    /// Set once the error has been handled
    pub resolved: bool,

    /// How the error was handled
    pub resolution: Option<String>,
}

impl ErrorRecord {
    /// Returns true for errors that still require attention.
    pub fn is_unresolved_critical(&self) -> bool {
        self.severity == ErrorSeverity::Critical && !self.resolved
    }
}

/// Snapshot of the simulated environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    /// Scene name (e.g. "warehouse")
    pub scene: String,

    /// Objects agents may interact with
    pub available_objects: Vec<String>,

    /// Whether physics simulation is active
    pub physics_enabled: bool,

    /// Time since the run started
    pub elapsed: Duration,

    /// Time left before the duration budget expires (ZERO when unbounded)
    pub time_remaining: Duration,
}

impl Default for EnvironmentSnapshot {
    fn default() -> Self {
        Self {
            scene: "default".to_string(),
            available_objects: Vec::new(),
            physics_enabled: true,
            elapsed: Duration::ZERO,
            time_remaining: Duration::ZERO,
        }
    }
}

/// The aggregate record of one simulation run.
///
/// Holds identity, lifecycle status, goals, both agent states, the
/// append-only step and error logs, and metrics derived from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationState {
    /// Unique run id
    pub id: Uuid,

    /// Run name
    pub name: String,

    /// Lifecycle status
    pub status: SimulationStatus,

    /// Context time when the run entered `Running`
    pub started_at: Option<Duration>,

    /// Context time when the run reached a terminal status
    pub ended_at: Option<Duration>,

    /// Why the run stopped (set together with `ended_at`)
    pub stop_reason: Option<StopReason>,

    /// 1-based phase index derived from overall progress
    pub current_phase: usize,

    /// Total phases in the parsed timeline (at least 1)
    pub total_phases: usize,

    /// Overall progress percentage, 0-100
    pub progress: f64,

    /// Goals driving this run
    pub goals: Vec<SimulationGoal>,

    /// Live agent states
    pub agents: PerAgent<AgentState>,

    /// Spawn positions, anchoring distance computation
    pub initial_positions: PerAgent<Vector3<f64>>,

    /// Environment snapshot
    pub environment: EnvironmentSnapshot,

    /// Append-only step log
    pub steps: Vec<SimulationStep>,

    /// Append-only error log
    pub errors: Vec<ErrorRecord>,

    /// Metrics recomputed from the logs
    pub metrics: SimulationMetrics,

    /// Context time when the aggregate was initialized
    pub created_at: Duration,

    /// Context time of the latest mutation
    pub updated_at: Duration,

    /// Broadcast ordinal; every emitted snapshot carries a strictly larger
    /// value than the one before it
    pub revision: u64,
}

impl SimulationState {
    /// Creates an idle aggregate with both agents at the origin.
    pub fn new(name: &str, now: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            status: SimulationStatus::Idle,
            started_at: None,
            ended_at: None,
            stop_reason: None,
            current_phase: 1,
            total_phases: 1,
            progress: 0.0,
            goals: Vec::new(),
            agents: PerAgent::default(),
            initial_positions: PerAgent::splat(Vector3::zeros()),
            environment: EnvironmentSnapshot::default(),
            steps: Vec::new(),
            errors: Vec::new(),
            metrics: SimulationMetrics::default(),
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// Total objectives across all goals.
    pub fn total_objectives(&self) -> usize {
        self.goals.iter().map(|g| g.objectives.len()).sum()
    }

    /// Objectives credited so far, summed over both agents.
    pub fn completed_objective_count(&self) -> usize {
        self.agents
            .iter()
            .map(|(_, agent)| agent.completed_objectives.len())
            .sum()
    }

    /// Looks up an objective by id across all goals.
    pub fn find_objective(&self, id: &str) -> Option<&Objective> {
        self.goals
            .iter()
            .flat_map(|g| g.objectives.iter())
            .find(|o| o.id == id)
    }

    /// Ids of objectives assigned to the given agent, in goal order.
    pub fn assigned_objective_ids(&self, agent: AgentId) -> Vec<String> {
        self.goals
            .iter()
            .flat_map(|g| g.objectives.iter())
            .filter(|o| o.target.includes(agent))
            .map(|o| o.id.clone())
            .collect()
    }

    /// First critical error that has not been resolved.
    pub fn first_unresolved_critical(&self) -> Option<&ErrorRecord> {
        self.errors.iter().find(|e| e.is_unresolved_critical())
    }

    /// Number of errors still unresolved, at any severity.
    pub fn unresolved_error_count(&self) -> usize {
        self.errors.iter().filter(|e| !e.resolved).count()
    }
}
