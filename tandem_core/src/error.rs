//! Error types for the orchestration core.

use thiserror::Error;

use crate::state::{AgentId, SimulationStatus};

/// Errors returned by the simulation state store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// The requested lifecycle transition is not allowed from the current
    /// status
    #[error("Cannot {operation} while simulation is {from:?}")]
    InvalidTransition {
        from: SimulationStatus,
        operation: &'static str,
    },

    /// A mutation arrived outside the `Running` state (e.g. a straggler
    /// update landing after a stop)
    #[error("Simulation is not running (status: {status:?})")]
    NotRunning { status: SimulationStatus },
}

/// Errors surfaced by a goal parser implementation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    /// The goal description was empty or whitespace
    #[error("Goal description is empty")]
    EmptyDescription,

    /// The parser could not extract a structured goal
    #[error("Goal could not be parsed: {0}")]
    Unparseable(String),

    /// Parsing succeeded but produced no objectives to execute
    #[error("Parsed goal contains no objectives")]
    NoObjectives,

    /// The parser backend was unreachable
    #[error("Parser backend unavailable: {0}")]
    BackendUnavailable(String),
}

/// Errors surfaced by an agent coordinator implementation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordinatorError {
    /// Setup has not completed (or failed) before a decision tick
    #[error("Coordinator is not ready: {0}")]
    NotReady(String),

    /// A decision could not be produced for one agent
    #[error("Decision failed for {agent}: {message}")]
    DecisionFailed { agent: AgentId, message: String },

    /// The coordinator backend was unreachable
    #[error("Coordinator backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl CoordinatorError {
    /// Creates a not-ready error.
    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::NotReady(msg.into())
    }

    /// Creates a per-agent decision failure.
    pub fn decision_failed(agent: AgentId, msg: impl Into<String>) -> Self {
        Self::DecisionFailed {
            agent,
            message: msg.into(),
        }
    }
}
