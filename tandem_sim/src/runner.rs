//! Scenario runner - executes orchestration scenarios end to end.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

use tandem_core::goal::SceneContext;
use tandem_core::{
    AgentId, AgentStatus, EventKind, ExecutionConfig, ExecutionEvent, ExecutionResult,
    ExecutionScheduler, SimulationStatus, StopReason, StoreError,
};
use tandem_env::TokioContext;

use crate::scenarios::ScenarioId;
use crate::script::ScriptedGoalParser;
use crate::walker::{WalkerMode, WaypointWalker};

type SimScheduler = ExecutionScheduler<TokioContext, ScriptedGoalParser, WaypointWalker>;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether the scenario passed all assertions
    pub passed: bool,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Terminal lifecycle status of the run
    pub final_status: SimulationStatus,

    /// Why the run stopped
    pub stop_reason: Option<StopReason>,

    /// Final overall progress percentage
    pub final_progress: f64,

    /// Objectives credited
    pub objectives_completed: usize,

    /// Objectives defined
    pub total_objectives: usize,

    /// Steps recorded
    pub total_steps: usize,

    /// Walker decision rounds
    pub decision_rounds: u64,

    /// Errors recorded (resolved or not)
    pub error_count: usize,

    /// Run duration in seconds
    pub duration_secs: f64,

    /// Events observed, in emission order
    pub events: Vec<ExecutionEvent>,
}

impl ScenarioResult {
    fn from_execution(
        scenario: ScenarioId,
        seed: u64,
        execution: &ExecutionResult,
        events: Vec<ExecutionEvent>,
        faults: Vec<String>,
    ) -> Self {
        Self {
            scenario,
            seed,
            passed: faults.is_empty(),
            failure_reason: if faults.is_empty() {
                None
            } else {
                Some(faults.join("; "))
            },
            final_status: execution.status,
            stop_reason: execution.stop_reason,
            final_progress: execution.final_progress,
            objectives_completed: execution.objectives_completed,
            total_objectives: execution.total_objectives,
            total_steps: execution.total_steps,
            decision_rounds: execution.coordination.rounds,
            error_count: execution.errors.len(),
            duration_secs: execution.duration.as_secs_f64(),
            events,
        }
    }

    fn refused(scenario: ScenarioId, seed: u64, error: &StoreError) -> Self {
        Self {
            scenario,
            seed,
            passed: false,
            failure_reason: Some(format!("scheduler refused the run: {}", error)),
            final_status: SimulationStatus::Idle,
            stop_reason: None,
            final_progress: 0.0,
            objectives_completed: 0,
            total_objectives: 0,
            total_steps: 0,
            decision_rounds: 0,
            error_count: 0,
            duration_secs: 0.0,
            events: Vec::new(),
        }
    }
}

/// A scheduler wired to the scripted parser, the walker, and an event
/// recorder.
struct Harness {
    scheduler: Arc<SimScheduler>,
    events: Arc<Mutex<Vec<ExecutionEvent>>>,
}

impl Harness {
    fn collected_events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().unwrap().clone()
    }
}

/// Runs orchestration scenarios.
pub struct ScenarioRunner {
    /// Seed for the walker's stride jitter
    seed: u64,

    /// Period between decision rounds
    decision_interval: Duration,

    /// Period between environment refreshes
    update_interval: Duration,

    /// Runaway guard applied to every scenario, in seconds
    max_duration_secs: f64,
}

impl ScenarioRunner {
    /// Creates a runner with intervals short enough for interactive use.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            decision_interval: Duration::from_millis(200),
            update_interval: Duration::from_millis(100),
            max_duration_secs: 30.0,
        }
    }

    /// Sets the decision cadence.
    pub fn with_decision_interval(mut self, interval: Duration) -> Self {
        self.decision_interval = interval.max(Duration::from_millis(10));
        self
    }

    /// Sets the runaway guard.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs.max(1.0);
        self
    }

    /// Runs a scenario and returns the result.
    pub async fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        match scenario {
            ScenarioId::Waypoint => self.run_waypoint().await,
            ScenarioId::Relay => self.run_relay().await,
            ScenarioId::Gridlock => self.run_gridlock().await,
            ScenarioId::Flaky => self.run_flaky().await,
            ScenarioId::Meltdown => self.run_meltdown().await,
            ScenarioId::Overtime => self.run_overtime().await,
            ScenarioId::Handbrake => self.run_handbrake().await,
        }
    }

    fn base_config(&self) -> ExecutionConfig {
        ExecutionConfig {
            decision_interval: self.decision_interval,
            update_interval: self.update_interval,
            max_duration: Duration::from_secs_f64(self.max_duration_secs),
            // Scenario runs tick fast; per-tick progress lines would drown
            // the per-scenario summaries
            enable_logging: false,
            ..ExecutionConfig::default()
        }
    }

    fn harness(&self, mode: WalkerMode, config: ExecutionConfig) -> Harness {
        let walker = WaypointWalker::new(self.seed).with_mode(mode);
        let scheduler = Arc::new(ExecutionScheduler::new(
            TokioContext::shared(),
            ScriptedGoalParser::new(),
            walker,
            config,
        ));

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        scheduler.on_event("scenario-recorder", move |event| {
            sink.lock().unwrap().push(event.clone());
        });

        Harness { scheduler, events }
    }

    /// ORC-001: Waypoint - happy-path completion.
    ///
    /// Two markers, one per agent. The run must settle as Completed at full
    /// progress, with a Started .. Stopped event envelope and one credit per
    /// objective.
    async fn run_waypoint(&self) -> ScenarioResult {
        let harness = self.harness(WalkerMode::Steady, self.base_config());
        let execution = match harness
            .scheduler
            .run(
                "waypoint",
                "Both agents meet at the rendezvous markers",
                &SceneContext::default(),
            )
            .await
        {
            Ok(execution) => execution,
            Err(e) => return ScenarioResult::refused(ScenarioId::Waypoint, self.seed, &e),
        };
        let events = harness.collected_events();

        let mut faults = Vec::new();
        if !execution.success {
            faults.push(format!("run did not succeed: {}", execution.reason));
        }
        if execution.objectives_completed != execution.total_objectives {
            faults.push(format!(
                "{}/{} objectives credited",
                execution.objectives_completed, execution.total_objectives
            ));
        }
        if execution.final_progress < 100.0 {
            faults.push(format!("final progress {:.1}%", execution.final_progress));
        }
        if events.first().map(|e| e.kind) != Some(EventKind::Started) {
            faults.push("first event was not Started".to_string());
        }
        if events.last().map(|e| e.kind) != Some(EventKind::Stopped) {
            faults.push("last event was not Stopped".to_string());
        }
        let credits = events
            .iter()
            .filter(|e| e.kind == EventKind::ObjectiveCompleted)
            .count();
        if credits != execution.total_objectives {
            faults.push(format!(
                "{} ObjectiveCompleted events for {} objectives",
                credits, execution.total_objectives
            ));
        }

        info!(
            "✓ Waypoint complete: {} steps over {} rounds, {:.0}% progress",
            execution.total_steps, execution.coordination.rounds, execution.final_progress
        );

        ScenarioResult::from_execution(ScenarioId::Waypoint, self.seed, &execution, events, faults)
    }

    /// ORC-002: Relay - dependency-ordered credits.
    ///
    /// The delivery leg depends on the handoff leg, so agent P2 must hold
    /// position until P1 delivers, and the credits must land in dependency
    /// order.
    async fn run_relay(&self) -> ScenarioResult {
        let harness = self.harness(WalkerMode::Steady, self.base_config());
        let execution = match harness
            .scheduler
            .run(
                "relay",
                "Relay the package across the handoff point",
                &SceneContext::default(),
            )
            .await
        {
            Ok(execution) => execution,
            Err(e) => return ScenarioResult::refused(ScenarioId::Relay, self.seed, &e),
        };
        let events = harness.collected_events();
        let order = credited_objectives(&events);
        let state = harness.scheduler.observed_state();

        let mut faults = Vec::new();
        if !execution.success {
            faults.push(format!("run did not succeed: {}", execution.reason));
        }
        if order != ["relay-handoff", "relay-delivery"] {
            faults.push(format!("credit order {:?}", order));
        }
        if !state
            .steps
            .iter()
            .any(|s| s.agent == AgentId::P2 && s.action.starts_with("hold"))
        {
            faults.push("delivery leg never held for the handoff".to_string());
        }

        info!("✓ Relay complete: credits landed in order {:?}", order);

        ScenarioResult::from_execution(ScenarioId::Relay, self.seed, &execution, events, faults)
    }

    /// ORC-003: Gridlock - deadlock detection.
    ///
    /// The walker reports failed steps without moving, so both agents cross
    /// the stuck threshold and the scheduler must fail the run as a
    /// deadlock.
    async fn run_gridlock(&self) -> ScenarioResult {
        let harness = self.harness(WalkerMode::Immobile, self.base_config());
        let execution = match harness
            .scheduler
            .run(
                "gridlock",
                "Both agents meet at the rendezvous markers",
                &SceneContext::default(),
            )
            .await
        {
            Ok(execution) => execution,
            Err(e) => return ScenarioResult::refused(ScenarioId::Gridlock, self.seed, &e),
        };
        let events = harness.collected_events();
        let state = harness.scheduler.observed_state();

        let mut faults = Vec::new();
        if execution.status != SimulationStatus::Failed {
            faults.push(format!("expected Failed, settled {:?}", execution.status));
        }
        if !execution.reason.contains("stuck") {
            faults.push(format!("unexpected reason '{}'", execution.reason));
        }
        if !events.iter().any(|e| e.kind == EventKind::Error) {
            faults.push("no Error event was emitted".to_string());
        }
        for (agent_id, agent) in state.agents.iter() {
            if agent.status != AgentStatus::Stuck {
                faults.push(format!(
                    "{} settled {:?}, expected Stuck",
                    agent_id, agent.status
                ));
            }
        }

        info!(
            "✓ Gridlock complete: deadlock detected after {} rounds",
            execution.coordination.rounds
        );

        ScenarioResult::from_execution(ScenarioId::Gridlock, self.seed, &execution, events, faults)
    }

    /// ORC-004: Flaky - transient faults recovered by retries.
    ///
    /// The walker fails its first two decision rounds. Both faults must be
    /// retried and resolved, and the run must still complete.
    async fn run_flaky(&self) -> ScenarioResult {
        let harness = self.harness(
            WalkerMode::Faulty { failing_rounds: 2 },
            self.base_config(),
        );
        let execution = match harness
            .scheduler
            .run(
                "flaky",
                "Both agents meet at the rendezvous markers",
                &SceneContext::default(),
            )
            .await
        {
            Ok(execution) => execution,
            Err(e) => return ScenarioResult::refused(ScenarioId::Flaky, self.seed, &e),
        };
        let events = harness.collected_events();
        let state = harness.scheduler.observed_state();
        let status = harness.scheduler.execution_status();

        let mut faults = Vec::new();
        if !execution.success {
            faults.push(format!("run did not succeed: {}", execution.reason));
        }
        if execution.errors.len() != 2 {
            faults.push(format!("{} errors recorded, expected 2", execution.errors.len()));
        }
        if status.retry_count != 2 {
            faults.push(format!("{} retries consumed, expected 2", status.retry_count));
        }
        if state.errors.iter().any(|e| !e.resolved) {
            faults.push("unresolved errors remain after recovery".to_string());
        }
        if !state.errors.iter().all(|e| {
            e.resolution
                .as_deref()
                .is_some_and(|r| r.contains("Recovered by retry"))
        }) {
            faults.push("errors were not resolved by the retry policy".to_string());
        }

        info!(
            "✓ Flaky complete: {} retries consumed, run still succeeded",
            status.retry_count
        );

        ScenarioResult::from_execution(ScenarioId::Flaky, self.seed, &execution, events, faults)
    }

    /// ORC-005: Meltdown - retry exhaustion.
    ///
    /// Every decision round fails, so the retry budget runs out and the run
    /// must fail carrying the coordinator's fault as its reason.
    async fn run_meltdown(&self) -> ScenarioResult {
        let config = self.base_config();
        let max_retries = config.max_retries;
        let harness = self.harness(WalkerMode::Broken, config);
        let execution = match harness
            .scheduler
            .run(
                "meltdown",
                "Both agents meet at the rendezvous markers",
                &SceneContext::default(),
            )
            .await
        {
            Ok(execution) => execution,
            Err(e) => return ScenarioResult::refused(ScenarioId::Meltdown, self.seed, &e),
        };
        let events = harness.collected_events();
        let status = harness.scheduler.execution_status();

        let mut faults = Vec::new();
        if execution.status != SimulationStatus::Failed {
            faults.push(format!("expected Failed, settled {:?}", execution.status));
        }
        if !execution.reason.contains("actuator bus offline") {
            faults.push(format!("unexpected reason '{}'", execution.reason));
        }
        if status.retry_count != max_retries {
            faults.push(format!(
                "{} retries consumed, expected {}",
                status.retry_count, max_retries
            ));
        }
        if execution.errors.len() < (max_retries as usize) + 1 {
            faults.push(format!(
                "only {} errors recorded across the retry cycle",
                execution.errors.len()
            ));
        }

        info!(
            "✓ Meltdown complete: retries exhausted after {} decision rounds",
            execution.coordination.rounds
        );

        ScenarioResult::from_execution(ScenarioId::Meltdown, self.seed, &execution, events, faults)
    }

    /// ORC-006: Overtime - duration budget expiry.
    ///
    /// The beacon sits 500 m out while the budget is a few seconds, so the
    /// environment tick loop must fail the run on time rather than distance.
    async fn run_overtime(&self) -> ScenarioResult {
        let mut config = self.base_config();
        config.max_duration = Duration::from_secs_f64(self.max_duration_secs.min(3.0));
        let budget = config.max_duration;
        let harness = self.harness(WalkerMode::Steady, config);
        let execution = match harness
            .scheduler
            .run(
                "overtime",
                "March toward the distant beacon",
                &SceneContext::default(),
            )
            .await
        {
            Ok(execution) => execution,
            Err(e) => return ScenarioResult::refused(ScenarioId::Overtime, self.seed, &e),
        };
        let events = harness.collected_events();

        let mut faults = Vec::new();
        if execution.status != SimulationStatus::Failed {
            faults.push(format!("expected Failed, settled {:?}", execution.status));
        }
        if !execution.reason.contains("Maximum duration") {
            faults.push(format!("unexpected reason '{}'", execution.reason));
        }
        if execution.final_progress >= 100.0 {
            faults.push("the beacon was not supposed to be reachable".to_string());
        }
        if execution.duration < budget {
            faults.push(format!(
                "run ended after {:.1}s, before the {:.1}s budget",
                execution.duration.as_secs_f64(),
                budget.as_secs_f64()
            ));
        }

        info!(
            "✓ Overtime complete: budget expired after {:.1}s",
            execution.duration.as_secs_f64()
        );

        ScenarioResult::from_execution(ScenarioId::Overtime, self.seed, &execution, events, faults)
    }

    /// ORC-007: Handbrake - external pause/resume/stop choreography.
    ///
    /// A controller task pauses the patrol mid-run, resumes it, then issues
    /// a user stop. The run must settle as Completed with a UserStop reason
    /// and must not count as objective success.
    async fn run_handbrake(&self) -> ScenarioResult {
        let harness = self.harness(WalkerMode::Steady, self.base_config());
        let scheduler = Arc::clone(&harness.scheduler);
        let step = self.decision_interval;

        // Offsets sit between decision instants so the choreography never
        // races a decision scheduled for the same deadline.
        let controller = tokio::spawn(async move {
            tokio::time::sleep(step * 5 + step / 2).await;
            scheduler.pause_execution();
            tokio::time::sleep(step * 3).await;
            scheduler.resume_execution();
            tokio::time::sleep(step * 3 + step / 2).await;
            scheduler.stop_execution(StopReason::UserStop);
        });

        let execution = match harness
            .scheduler
            .run(
                "handbrake",
                "Patrol the perimeter circuit",
                &SceneContext::default(),
            )
            .await
        {
            Ok(execution) => execution,
            Err(e) => return ScenarioResult::refused(ScenarioId::Handbrake, self.seed, &e),
        };
        let _ = controller.await;
        let events = harness.collected_events();

        let mut faults = Vec::new();
        if execution.status != SimulationStatus::Completed
            || execution.stop_reason != Some(StopReason::UserStop)
        {
            faults.push(format!(
                "settled {:?}/{:?}, expected Completed by user stop",
                execution.status, execution.stop_reason
            ));
        }
        if execution.success {
            faults.push("a user stop must not count as objective success".to_string());
        }
        if execution.final_progress >= 100.0 {
            faults.push("patrol finished before the stop request".to_string());
        }
        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
        if !kinds.contains(&EventKind::Paused) || !kinds.contains(&EventKind::Resumed) {
            faults.push(format!("pause/resume missing from events {:?}", kinds));
        }
        if kinds.last() != Some(&EventKind::Stopped) {
            faults.push("last event was not Stopped".to_string());
        }

        info!(
            "✓ Handbrake complete: stopped by user at {:.0}% progress",
            execution.final_progress
        );

        ScenarioResult::from_execution(ScenarioId::Handbrake, self.seed, &execution, events, faults)
    }
}

/// Objective ids carried by ObjectiveCompleted events, in emission order.
fn credited_objectives(events: &[ExecutionEvent]) -> Vec<String> {
    events
        .iter()
        .filter(|e| e.kind == EventKind::ObjectiveCompleted)
        .filter_map(|e| {
            e.payload
                .get("objective")
                .and_then(|v| v.as_str())
                .map(String::from)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> ScenarioRunner {
        ScenarioRunner::new(42)
    }

    #[tokio::test(start_paused = true)]
    async fn test_waypoint_scenario_passes() {
        let result = runner().run(ScenarioId::Waypoint).await;
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.final_status, SimulationStatus::Completed);
        assert_eq!(result.objectives_completed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_scenario_passes() {
        let result = runner().run(ScenarioId::Relay).await;
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(
            credited_objectives(&result.events),
            vec!["relay-handoff".to_string(), "relay-delivery".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_gridlock_scenario_passes() {
        let result = runner().run(ScenarioId::Gridlock).await;
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.final_status, SimulationStatus::Failed);
        assert_eq!(result.objectives_completed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flaky_scenario_passes() {
        let result = runner().run(ScenarioId::Flaky).await;
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.final_status, SimulationStatus::Completed);
        assert_eq!(result.error_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_meltdown_scenario_passes() {
        let result = runner().run(ScenarioId::Meltdown).await;
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.final_status, SimulationStatus::Failed);
        assert_eq!(result.total_steps, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overtime_scenario_passes() {
        let result = runner().run(ScenarioId::Overtime).await;
        assert!(result.passed, "{:?}", result.failure_reason);
        assert!(result.duration_secs >= 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handbrake_scenario_passes() {
        let result = runner().run(ScenarioId::Handbrake).await;
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.stop_reason, Some(StopReason::UserStop));
        assert!(result.final_progress < 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_seed_walks_identically() {
        let first = runner().run(ScenarioId::Waypoint).await;
        let second = runner().run(ScenarioId::Waypoint).await;

        assert!(first.passed && second.passed);
        assert_eq!(first.total_steps, second.total_steps);
        assert_eq!(first.decision_rounds, second.decision_rounds);
    }
}
