//! Tandem Core - Dual-Agent Simulation Orchestration
//!
//! This library owns the full lifecycle of a goal-directed two-agent
//! simulation run:
//! 1. **State**: one authoritative aggregate per run with append-only step
//!    and error logs, mutated only through the store
//! 2. **Scheduling**: a push-driven decision loop with pause/resume/stop,
//!    bounded retry and deadlock detection
//! 3. **Derivation**: progress, agent status, phase and metrics are always
//!    recomputed from the logs, never stored ad hoc

pub mod coordinator;
pub mod error;
pub mod events;
pub mod goal;
pub mod metrics;
pub mod scheduler;
pub mod state;
pub mod store;

// Re-export key types for convenience
pub use coordinator::{AgentCoordinator, CoordinationStats};
pub use error::{CoordinatorError, ParseError, StoreError};
pub use events::{EventKind, ExecutionEvent, ListenerSet};
pub use goal::{
    GoalParser, Objective, ObjectiveKind, ObjectiveTarget, ParsedSimulation, SceneContext,
    SimulationGoal,
};
pub use metrics::SimulationMetrics;
pub use scheduler::{ExecutionConfig, ExecutionResult, ExecutionScheduler, ExecutionStatus};
pub use state::{
    AgentId, AgentState, AgentStatus, ErrorKind, ErrorRecord, ErrorSeverity, PerAgent,
    SimulationState, SimulationStatus, SimulationStep, StepResult, StopReason,
};
pub use store::{SimulationStore, StoreConfig};
