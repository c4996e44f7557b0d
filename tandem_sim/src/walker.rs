//! Waypoint-walking agent coordinator.
//!
//! A deterministic stand-in for the production decision backend: each
//! decision round it walks every agent toward the target position of its
//! current objective and credits the objective on arrival. Fault modes turn
//! the same walker into a stuck-agent generator or a failing backend, which
//! is how the scenario suite exercises deadlock detection and the retry
//! policy.

use async_trait::async_trait;
use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use tracing::{debug, info};

use tandem_core::coordinator::{AgentCoordinator, CoordinationStats};
use tandem_core::goal::{Objective, ParsedSimulation};
use tandem_core::{
    AgentId, AgentState, CoordinatorError, PerAgent, SimulationState, SimulationStore, StepResult,
};
use tandem_env::RuntimeContext;

/// How the walker behaves each decision round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkerMode {
    /// Walk toward assigned objectives, crediting each on arrival.
    Steady,

    /// Report failed steps without moving; drives agents into stuck
    /// detection.
    Immobile,

    /// Fail the first `failing_rounds` decision rounds, then behave like
    /// `Steady`.
    Faulty { failing_rounds: u64 },

    /// Every decision round fails.
    Broken,
}

/// Outcome of one per-agent decision.
struct Decision {
    action: String,
    details: String,
    result: StepResult,
    position: Vector3<f64>,
    velocity: Vector3<f64>,
    credit: Option<String>,
}

/// Walks both agents toward their objectives at a fixed pace.
pub struct WaypointWalker {
    /// Behavior for this run
    mode: WalkerMode,

    /// Meters covered per decision round
    speed: f64,

    /// Distance at which an objective counts as reached
    arrival_radius: f64,

    /// Seed for the stride jitter
    seed: u64,

    /// Stride jitter source, reseeded on every setup
    rng: ChaCha8Rng,

    /// Script captured at setup
    parsed: Option<Arc<ParsedSimulation>>,

    rounds: u64,
    decisions: u64,
    failures: u64,
}

impl WaypointWalker {
    /// Creates a steady walker with a 1 m stride.
    pub fn new(seed: u64) -> Self {
        Self {
            mode: WalkerMode::Steady,
            speed: 1.0,
            arrival_radius: 0.5,
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            parsed: None,
            rounds: 0,
            decisions: 0,
            failures: 0,
        }
    }

    /// Sets the behavior mode.
    pub fn with_mode(mut self, mode: WalkerMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the stride length in meters per round.
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed.max(0.01);
        self
    }

    fn decide(
        &mut self,
        agent_id: AgentId,
        agent: &AgentState,
        objective_id: &str,
        parsed: &ParsedSimulation,
        snapshot: &SimulationState,
    ) -> Decision {
        if matches!(self.mode, WalkerMode::Immobile) {
            return Decision {
                action: "attempt advance".to_string(),
                details: "Actuators unresponsive".to_string(),
                result: StepResult::Failure,
                position: agent.position,
                velocity: Vector3::zeros(),
                credit: None,
            };
        }

        let Some(objective) = parsed.objective(objective_id) else {
            return Decision {
                action: format!("scan for {}", objective_id),
                details: "Objective missing from the script".to_string(),
                result: StepResult::Partial,
                position: agent.position,
                velocity: Vector3::zeros(),
                credit: None,
            };
        };

        if !dependencies_met(objective, snapshot) {
            return Decision {
                action: format!("hold for {}", objective.dependencies.join(", ")),
                details: "Waiting on prerequisite objectives".to_string(),
                result: StepResult::Partial,
                position: agent.position,
                velocity: Vector3::zeros(),
                credit: None,
            };
        }

        let Some(target) = objective.target_position() else {
            // No spatial target; the objective completes in place.
            return Decision {
                action: format!("complete {}", objective.id),
                details: objective.description.clone(),
                result: StepResult::Success,
                position: agent.position,
                velocity: Vector3::zeros(),
                credit: Some(objective.id.clone()),
            };
        };

        let offset = target - agent.position;
        let distance = offset.norm();
        if distance <= self.arrival_radius {
            debug!("{} arrived at '{}'", agent_id, objective.id);
            return Decision {
                action: format!("complete {}", objective.id),
                details: objective.description.clone(),
                result: StepResult::Success,
                position: target,
                velocity: Vector3::zeros(),
                credit: Some(objective.id.clone()),
            };
        }

        let stride = (self.speed * self.rng.gen_range(0.9..1.1)).min(distance);
        let direction = offset / distance;
        Decision {
            action: format!("advance toward {}", objective.id),
            details: format!("{:.1} m to go", distance),
            result: StepResult::Success,
            position: agent.position + direction * stride,
            velocity: direction * self.speed,
            credit: None,
        }
    }
}

#[async_trait]
impl<C: RuntimeContext> AgentCoordinator<C> for WaypointWalker {
    async fn setup(
        &mut self,
        parsed: &ParsedSimulation,
        _spawn_positions: &PerAgent<Vector3<f64>>,
    ) -> Result<(), CoordinatorError> {
        self.parsed = Some(Arc::new(parsed.clone()));
        self.rng = ChaCha8Rng::seed_from_u64(self.seed);
        self.rounds = 0;
        self.decisions = 0;
        self.failures = 0;
        info!(
            "Walker ready: {} and {} covering {} objectives",
            parsed.agent_roles.get(AgentId::P1).name,
            parsed.agent_roles.get(AgentId::P2).name,
            parsed.total_objectives()
        );
        Ok(())
    }

    async fn advance_agents(&mut self, store: &SimulationStore<C>) -> Result<(), CoordinatorError> {
        let parsed = self
            .parsed
            .clone()
            .ok_or_else(|| CoordinatorError::not_ready("walker setup has not run"))?;
        self.rounds += 1;

        let failing = match self.mode {
            WalkerMode::Broken => true,
            WalkerMode::Faulty { failing_rounds } => self.rounds <= failing_rounds,
            _ => false,
        };
        if failing {
            self.failures += 1;
            let agent = if self.rounds % 2 == 1 {
                AgentId::P1
            } else {
                AgentId::P2
            };
            return Err(CoordinatorError::decision_failed(
                agent,
                "actuator bus offline",
            ));
        }

        let snapshot = store.snapshot();
        for (agent_id, agent) in snapshot.agents.iter() {
            let Some(objective_id) = agent.current_objective.clone() else {
                continue;
            };

            let decision = self.decide(agent_id, agent, &objective_id, &parsed, &snapshot);
            self.decisions += 1;
            if decision.result == StepResult::Failure {
                self.failures += 1;
            }

            if let Err(err) = store.update_agent_state(
                agent_id,
                &decision.action,
                decision.result,
                decision.position,
                decision.velocity,
                decision.credit.as_deref(),
                &decision.details,
            ) {
                // The run settled or was stopped while this round was in
                // flight; the remaining agents sit the round out.
                debug!("round abandoned: {}", err);
                return Ok(());
            }
        }
        Ok(())
    }

    fn coordination_stats(&self) -> CoordinationStats {
        CoordinationStats {
            rounds: self.rounds,
            decisions: self.decisions,
            failures: self.failures,
        }
    }

    async fn shutdown(&mut self) {
        self.parsed = None;
        debug!("Walker shut down after {} rounds", self.rounds);
    }
}

/// True when every dependency has been credited to some agent.
fn dependencies_met(objective: &Objective, snapshot: &SimulationState) -> bool {
    objective.dependencies.iter().all(|dep| {
        snapshot
            .agents
            .iter()
            .any(|(_, agent)| agent.completed_objectives.contains(dep))
    })
}
