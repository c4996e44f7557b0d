//! Orchestration scenarios for the harness.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// ORC-001: Happy-path rendezvous completion
    Waypoint,

    /// ORC-002: Dependent relay legs completed in order
    Relay,

    /// ORC-003: Stuck agents detected as a deadlock
    Gridlock,

    /// ORC-004: Transient coordinator faults recovered by retries
    Flaky,

    /// ORC-005: Persistent coordinator faults exhaust the retries
    Meltdown,

    /// ORC-006: Duration budget expires on an unreachable goal
    Overtime,

    /// ORC-007: External pause/resume/stop choreography
    Handbrake,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Waypoint,
            ScenarioId::Relay,
            ScenarioId::Gridlock,
            ScenarioId::Flaky,
            ScenarioId::Meltdown,
            ScenarioId::Overtime,
            ScenarioId::Handbrake,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Waypoint => "waypoint",
            ScenarioId::Relay => "relay",
            ScenarioId::Gridlock => "gridlock",
            ScenarioId::Flaky => "flaky",
            ScenarioId::Meltdown => "meltdown",
            ScenarioId::Overtime => "overtime",
            ScenarioId::Handbrake => "handbrake",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Waypoint => "Both agents walk to their markers; run settles Completed at 100%",
            ScenarioId::Relay => "Delivery leg waits for the handoff leg; credits land in dependency order",
            ScenarioId::Gridlock => "Agents never move; stuck detection fails the run as a deadlock",
            ScenarioId::Flaky => "Coordinator fails twice, retries recover, run still completes",
            ScenarioId::Meltdown => "Coordinator always fails; retry budget exhausts and fails the run",
            ScenarioId::Overtime => "Unreachable beacon; the duration budget stops the run",
            ScenarioId::Handbrake => "Operator pauses, resumes, then stops the run mid-patrol",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "waypoint" | "orc-001" => Ok(ScenarioId::Waypoint),
            "relay" | "orc-002" => Ok(ScenarioId::Relay),
            "gridlock" | "orc-003" => Ok(ScenarioId::Gridlock),
            "flaky" | "orc-004" => Ok(ScenarioId::Flaky),
            "meltdown" | "orc-005" => Ok(ScenarioId::Meltdown),
            "overtime" | "orc-006" => Ok(ScenarioId::Overtime),
            "handbrake" | "orc-007" => Ok(ScenarioId::Handbrake),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
