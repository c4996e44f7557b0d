//! Tandem Metrics Module
//! ======================
//!
//! Derived measurements over the append-only step log:
//! - **Distance**: per-agent path length over recorded positions
//! - **Efficiency / Error rate**: success and failure share of all steps
//! - **Collaboration**: action-count balance between the two agents
//!
//! Nothing here is incrementally maintained. Every value is recomputed from
//! the full log on demand, so dropped or replayed updates cannot leave the
//! metrics out of sync with the steps they describe.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::state::{AgentId, PerAgent, SimulationStep, StepResult};

/// Metrics derived from the step log of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationMetrics {
    /// All recorded steps
    pub total_steps: usize,
    /// Steps that succeeded
    pub successful_steps: usize,
    /// Steps that failed
    pub failed_steps: usize,
    /// Mean gap between an agent's consecutive steps
    pub average_step_duration: Duration,
    /// Cumulative path length per agent (meters)
    pub distance_traveled: PerAgent<f64>,
    /// Objectives credited so far (unclamped count)
    pub objectives_completed: usize,
    /// Objectives defined by the goals
    pub total_objectives: usize,
    /// successful_steps / total_steps, 0.0 for an empty log
    pub efficiency: f64,
    /// failed_steps / total_steps, 0.0 for an empty log
    pub error_rate: f64,
    /// Action balance in [0, 1]; 1.0 = perfectly even split
    pub collaboration_score: f64,
}

impl SimulationMetrics {
    /// Recomputes every derived value from the full step log.
    pub fn recompute(
        steps: &[SimulationStep],
        initial_positions: &PerAgent<Vector3<f64>>,
        objectives_completed: usize,
        total_objectives: usize,
    ) -> Self {
        let total_steps = steps.len();
        let successful_steps = steps
            .iter()
            .filter(|s| s.result == StepResult::Success)
            .count();
        let failed_steps = steps
            .iter()
            .filter(|s| s.result == StepResult::Failure)
            .count();

        let average_step_duration = if total_steps > 0 {
            steps.iter().map(|s| s.duration).sum::<Duration>() / total_steps as u32
        } else {
            Duration::ZERO
        };

        let distance_traveled = PerAgent::new(
            distance_traveled(steps, AgentId::P1, *initial_positions.get(AgentId::P1)),
            distance_traveled(steps, AgentId::P2, *initial_positions.get(AgentId::P2)),
        );

        let actions = PerAgent::new(
            steps.iter().filter(|s| s.agent == AgentId::P1).count(),
            steps.iter().filter(|s| s.agent == AgentId::P2).count(),
        );

        Self {
            total_steps,
            successful_steps,
            failed_steps,
            average_step_duration,
            distance_traveled,
            objectives_completed,
            total_objectives,
            efficiency: ratio(successful_steps, total_steps),
            error_rate: ratio(failed_steps, total_steps),
            collaboration_score: collaboration_score(actions.p1, actions.p2),
        }
    }
}

// =============================================================================
// DISTANCE
// =============================================================================

/// Path length over an agent's recorded positions, anchored at its spawn
/// point.
///
/// ```text
/// d = |p_1 - p_0| + |p_2 - p_1| + ... + |p_n - p_{n-1}|
/// ```
///
/// where `p_0` is the spawn position and `p_1..p_n` are the positions of the
/// agent's steps in log order.
pub fn distance_traveled(steps: &[SimulationStep], agent: AgentId, spawn: Vector3<f64>) -> f64 {
    let mut previous = spawn;
    let mut total = 0.0;
    for step in steps.iter().filter(|s| s.agent == agent) {
        total += (step.position - previous).norm();
        previous = step.position;
    }
    total
}

// =============================================================================
// RATES
// =============================================================================

/// Share of `part` in `whole`; 0.0 when the log is empty.
fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Action-count balance between the two agents.
///
/// ```text
/// score = 1 - |a1 - a2| / (a1 + a2)
/// ```
///
/// Returns 0.0 before any action has been recorded, 1.0 when both agents
/// have acted equally often, and approaches 0.0 as one agent dominates.
pub fn collaboration_score(actions_p1: usize, actions_p2: usize) -> f64 {
    let total = actions_p1 + actions_p2;
    if total == 0 {
        return 0.0;
    }
    1.0 - (actions_p1 as f64 - actions_p2 as f64).abs() / total as f64
}

// =============================================================================
// PROGRESS
// =============================================================================

/// Overall progress percentage from objective counts, clamped to [0, 100].
///
/// The completed count is unclamped (an objective credited to both agents
/// counts twice), so the clamp keeps the percentage meaningful.
pub fn overall_progress(completed: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        (completed as f64 / total as f64 * 100.0).min(100.0)
    }
}

/// Derives the 1-based phase index from overall progress.
///
/// Progress maps linearly onto the phases; 100% always lands on the final
/// phase.
pub fn current_phase(progress: f64, total_phases: usize) -> usize {
    let total = total_phases.max(1);
    if progress >= 100.0 {
        total
    } else {
        (1 + (progress / 100.0 * total as f64) as usize).min(total)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn step_at(agent: AgentId, position: Vector3<f64>, result: StepResult) -> SimulationStep {
        SimulationStep {
            id: Uuid::new_v4(),
            timestamp: Duration::ZERO,
            agent,
            action: "move".to_string(),
            result,
            details: String::new(),
            position,
            objective: None,
            duration: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_distance_two_legs() {
        let spawn = Vector3::new(0.0, 0.0, 0.0);
        let steps = vec![
            step_at(AgentId::P1, Vector3::new(3.0, 4.0, 0.0), StepResult::Success),
            step_at(AgentId::P1, Vector3::new(3.0, 4.0, 12.0), StepResult::Success),
        ];

        // 5 (3-4-5 triangle) + 12 along z
        assert_relative_eq!(
            distance_traveled(&steps, AgentId::P1, spawn),
            17.0,
            epsilon = 1e-12
        );
        // No steps for P2
        assert_relative_eq!(
            distance_traveled(&steps, AgentId::P2, spawn),
            0.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_distance_ignores_other_agent() {
        let spawn = Vector3::zeros();
        let steps = vec![
            step_at(AgentId::P1, Vector3::new(1.0, 0.0, 0.0), StepResult::Success),
            step_at(AgentId::P2, Vector3::new(100.0, 0.0, 0.0), StepResult::Success),
            step_at(AgentId::P1, Vector3::new(2.0, 0.0, 0.0), StepResult::Success),
        ];
        assert_relative_eq!(distance_traveled(&steps, AgentId::P1, spawn), 2.0);
    }

    #[test]
    fn test_collaboration_score_bounds() {
        assert_relative_eq!(collaboration_score(0, 0), 0.0);
        assert_relative_eq!(collaboration_score(5, 5), 1.0);
        assert_relative_eq!(collaboration_score(10, 0), 0.0);
        assert_relative_eq!(collaboration_score(3, 1), 0.5);
    }

    #[test]
    fn test_progress_clamped() {
        assert_relative_eq!(overall_progress(0, 0), 0.0);
        assert_relative_eq!(overall_progress(1, 2), 50.0);
        // An objective credited to both agents can push the raw count past
        // the total; the percentage stays at 100
        assert_relative_eq!(overall_progress(3, 2), 100.0);
    }

    #[test]
    fn test_phase_derivation() {
        assert_eq!(current_phase(0.0, 3), 1);
        assert_eq!(current_phase(33.0, 3), 1);
        assert_eq!(current_phase(34.0, 3), 2);
        assert_eq!(current_phase(99.0, 3), 3);
        assert_eq!(current_phase(100.0, 3), 3);
        // Degenerate timeline still reports phase 1
        assert_eq!(current_phase(50.0, 0), 1);
    }

    #[test]
    fn test_recompute_empty_log() {
        let metrics =
            SimulationMetrics::recompute(&[], &PerAgent::splat(Vector3::zeros()), 0, 4);
        assert_eq!(metrics.total_steps, 0);
        assert_relative_eq!(metrics.efficiency, 0.0);
        assert_relative_eq!(metrics.error_rate, 0.0);
        assert_relative_eq!(metrics.collaboration_score, 0.0);
        assert_eq!(metrics.average_step_duration, Duration::ZERO);
        assert_eq!(metrics.total_objectives, 4);
    }

    #[test]
    fn test_recompute_counts_and_rates() {
        let steps = vec![
            step_at(AgentId::P1, Vector3::new(1.0, 0.0, 0.0), StepResult::Success),
            step_at(AgentId::P2, Vector3::new(0.0, 1.0, 0.0), StepResult::Failure),
            step_at(AgentId::P1, Vector3::new(2.0, 0.0, 0.0), StepResult::Partial),
            step_at(AgentId::P2, Vector3::new(0.0, 2.0, 0.0), StepResult::Success),
        ];
        let metrics =
            SimulationMetrics::recompute(&steps, &PerAgent::splat(Vector3::zeros()), 1, 2);

        assert_eq!(metrics.total_steps, 4);
        assert_eq!(metrics.successful_steps, 2);
        assert_eq!(metrics.failed_steps, 1);
        assert_relative_eq!(metrics.efficiency, 0.5);
        assert_relative_eq!(metrics.error_rate, 0.25);
        assert_relative_eq!(metrics.collaboration_score, 1.0);
        assert_relative_eq!(metrics.distance_traveled.p1, 2.0);
        assert_relative_eq!(metrics.distance_traveled.p2, 2.0);
        assert_eq!(metrics.average_step_duration, Duration::from_millis(100));
    }

    proptest! {
        /// Distance over a random walk equals the sum of the leg lengths.
        #[test]
        fn prop_distance_matches_leg_sum(
            legs in prop::collection::vec(
                (-100.0f64..100.0, -100.0f64..100.0, -100.0f64..100.0),
                0..40,
            )
        ) {
            let spawn = Vector3::new(1.0, -2.0, 3.0);
            let mut steps = Vec::new();
            let mut expected = 0.0;
            let mut previous = spawn;
            for (x, y, z) in legs {
                let position = Vector3::new(x, y, z);
                expected += (position - previous).norm();
                previous = position;
                steps.push(step_at(AgentId::P1, position, StepResult::Success));
            }

            let actual = distance_traveled(&steps, AgentId::P1, spawn);
            prop_assert!((actual - expected).abs() < 1e-9);
        }

        /// Progress never leaves [0, 100] and collaboration never leaves [0, 1].
        #[test]
        fn prop_rates_bounded(completed in 0usize..50, total in 0usize..20, a in 0usize..200, b in 0usize..200) {
            let progress = overall_progress(completed, total);
            prop_assert!((0.0..=100.0).contains(&progress));

            let score = collaboration_score(a, b);
            prop_assert!((0.0..=1.0).contains(&score));
        }
    }
}
