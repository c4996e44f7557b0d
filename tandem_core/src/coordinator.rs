//! Agent coordinator seam.
//!
//! The coordinator owns per-tick decision generation for both agents. The
//! scheduler calls it once per decision tick and the coordinator reports
//! outcomes back through the store's mutation methods, so every consequence
//! of a decision flows through the same validated path.

use async_trait::async_trait;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tandem_env::RuntimeContext;

use crate::error::CoordinatorError;
use crate::goal::ParsedSimulation;
use crate::state::PerAgent;
use crate::store::SimulationStore;

/// Introspection counters exposed by a coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinationStats {
    /// Decision rounds completed
    pub rounds: u64,

    /// Individual agent decisions issued
    pub decisions: u64,

    /// Decisions that ended in a failed action
    pub failures: u64,
}

/// Drives per-agent decision generation.
///
/// Implementations turn the current simulation state into one action per
/// agent per tick. State changes go through
/// [`SimulationStore::update_agent_state`] and
/// [`SimulationStore::record_error`]; the scheduler never mutates agent
/// state itself.
///
/// `advance_agents` returning an error signals an infrastructure failure
/// (backend down, decision engine wedged), not a failed agent action.
/// Failed actions are ordinary `StepResult::Failure` updates.
#[async_trait]
pub trait AgentCoordinator<C: RuntimeContext>: Send {
    /// Prepares per-agent decision state from the parsed simulation.
    async fn setup(
        &mut self,
        parsed: &ParsedSimulation,
        spawn_positions: &PerAgent<Vector3<f64>>,
    ) -> Result<(), CoordinatorError>;

    /// Advances every agent by one decision.
    async fn advance_agents(&mut self, store: &SimulationStore<C>) -> Result<(), CoordinatorError>;

    /// Counters for logging and result summaries.
    fn coordination_stats(&self) -> CoordinationStats;

    /// Releases per-run resources.
    async fn shutdown(&mut self);
}
