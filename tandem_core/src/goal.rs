//! Goal model and the goal-parser seam.
//!
//! A natural-language goal is turned into a [`ParsedSimulation`] by an
//! implementation of [`GoalParser`] (an LLM bridge in production, scripted
//! fixtures in tests). The store and scheduler only ever consume the parsed
//! form.

use async_trait::async_trait;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::error::ParseError;
use crate::state::{AgentId, PerAgent};

/// How a parsed goal ranks in difficulty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

/// The category of behavior an objective asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveKind {
    Movement,
    Interaction,
    Cooperation,
    Competition,
    Exploration,
    Collection,
    Custom,
}

/// Who an objective is assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveTarget {
    AgentP1,
    AgentP2,
    Both,
    Environment,
}

impl ObjectiveTarget {
    /// Returns true when the objective is assigned to the given agent.
    pub fn includes(&self, agent: AgentId) -> bool {
        match self {
            ObjectiveTarget::AgentP1 => agent == AgentId::P1,
            ObjectiveTarget::AgentP2 => agent == AgentId::P2,
            ObjectiveTarget::Both => true,
            ObjectiveTarget::Environment => false,
        }
    }
}

/// A single measurable sub-goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    /// Stable id, unique within the simulation
    pub id: String,

    /// Behavior category
    pub kind: ObjectiveKind,

    /// Human-readable description
    pub description: String,

    /// Assignment
    pub target: ObjectiveTarget,

    /// Free-form parameters (e.g. "target_position": [x, y, z])
    pub parameters: HashMap<String, serde_json::Value>,

    /// Priority from 1 (lowest) to 10 (highest)
    pub priority: u8,

    /// Ids of objectives that must complete first
    pub dependencies: Vec<String>,
}

impl Objective {
    /// Creates an objective with default priority and no parameters.
    pub fn new(id: &str, kind: ObjectiveKind, description: &str, target: ObjectiveTarget) -> Self {
        Self {
            id: id.to_string(),
            kind,
            description: description.to_string(),
            target,
            parameters: HashMap::new(),
            priority: 5,
            dependencies: Vec::new(),
        }
    }

    /// Adds a parameter.
    pub fn with_parameter(mut self, key: &str, value: serde_json::Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }

    /// Sets the priority, clamped to 1..=10.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 10);
        self
    }

    /// Adds a dependency on another objective.
    pub fn depends_on(mut self, id: &str) -> Self {
        self.dependencies.push(id.to_string());
        self
    }

    /// Reads the "target_position" parameter as a point, if present.
    pub fn target_position(&self) -> Option<Vector3<f64>> {
        let value = self.parameters.get("target_position")?;
        let coords = value.as_array()?;
        if coords.len() != 3 {
            return None;
        }
        Some(Vector3::new(
            coords[0].as_f64()?,
            coords[1].as_f64()?,
            coords[2].as_f64()?,
        ))
    }
}

/// The category of a constraint on the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    Spatial,
    Temporal,
    Behavioral,
    Resource,
}

/// A rule the run should respect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    /// Category
    pub kind: ConstraintKind,

    /// Human-readable description
    pub description: String,

    /// Free-form parameters
    pub parameters: HashMap<String, serde_json::Value>,

    /// Strict constraints fail the run when violated; soft ones are advisory
    pub strict: bool,
}

impl Constraint {
    pub fn new(kind: ConstraintKind, description: &str, strict: bool) -> Self {
        Self {
            kind,
            description: description.to_string(),
            parameters: HashMap::new(),
            strict,
        }
    }
}

/// The category of a success criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionKind {
    ObjectiveCompletion,
    TimeLimit,
    Cooperation,
    Custom,
}

/// A weighted condition contributing to overall success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessCriterion {
    /// Stable id
    pub id: String,

    /// Category
    pub kind: CriterionKind,

    /// Human-readable description
    pub description: String,

    /// Machine-checkable condition text
    pub condition: String,

    /// Relative weight in [0, 1]
    pub weight: f64,
}

impl SuccessCriterion {
    pub fn new(id: &str, kind: CriterionKind, description: &str, condition: &str, weight: f64) -> Self {
        Self {
            id: id.to_string(),
            kind,
            description: description.to_string(),
            condition: condition.to_string(),
            weight: weight.clamp(0.0, 1.0),
        }
    }
}

/// A structured goal produced by the parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationGoal {
    /// Unique goal id
    pub id: Uuid,

    /// Short name
    pub name: String,

    /// Original description the goal was parsed from
    pub description: String,

    /// Measurable sub-goals
    pub objectives: Vec<Objective>,

    /// Rules the run should respect
    pub constraints: Vec<Constraint>,

    /// Weighted success conditions
    pub success_criteria: Vec<SuccessCriterion>,

    /// Difficulty ranking
    pub complexity: Complexity,

    /// Context time when the goal was created
    pub created_at: Duration,
}

impl SimulationGoal {
    /// Creates an empty goal shell stamped with the caller's clock.
    pub fn new(
        name: &str,
        description: &str,
        complexity: Complexity,
        created_at: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.to_string(),
            objectives: Vec::new(),
            constraints: Vec::new(),
            success_criteria: Vec::new(),
            complexity,
            created_at,
        }
    }
}

/// Role description for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRole {
    /// Display name (e.g. "Scout")
    pub name: String,

    /// Personality hint forwarded to the coordinator
    pub personality: String,

    /// Objective ids this agent is primarily responsible for
    pub primary_objectives: Vec<String>,

    /// Capability hints (e.g. "can_carry")
    pub capabilities: Vec<String>,

    /// Behavioral limits (e.g. "stay_in_bounds")
    pub constraints: Vec<String>,
}

impl AgentRole {
    pub fn new(name: &str, personality: &str) -> Self {
        Self {
            name: name.to_string(),
            personality: personality.to_string(),
            primary_objectives: Vec::new(),
            capabilities: Vec::new(),
            constraints: Vec::new(),
        }
    }
}

/// Environment requirements extracted from the goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    /// Scene name
    pub scene: String,

    /// Objects the scene must provide
    pub available_objects: Vec<String>,

    /// Whether physics should be simulated
    pub physics_enabled: bool,

    /// Interaction channels the agents may use
    pub interaction_kinds: Vec<String>,
}

impl Default for EnvironmentSpec {
    fn default() -> Self {
        Self {
            scene: "default".to_string(),
            available_objects: Vec::new(),
            physics_enabled: true,
            interaction_kinds: Vec::new(),
        }
    }
}

/// One phase of the planned run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSpec {
    /// Phase name (e.g. "approach")
    pub name: String,

    /// What happens during the phase
    pub description: String,

    /// Objectives expected to complete during the phase
    pub objective_ids: Vec<String>,
}

/// Planned progression of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    /// Ordered phases
    pub phases: Vec<PhaseSpec>,

    /// Parser's estimate of run length
    pub estimated_duration: Duration,
}

impl Default for Timeline {
    fn default() -> Self {
        Self {
            phases: Vec::new(),
            estimated_duration: Duration::ZERO,
        }
    }
}

/// Everything the parser extracts from one natural-language goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedSimulation {
    /// Structured goals
    pub goals: Vec<SimulationGoal>,

    /// Role descriptions for both agents
    pub agent_roles: PerAgent<AgentRole>,

    /// Environment requirements
    pub environment: EnvironmentSpec,

    /// Planned phase progression
    pub timeline: Timeline,
}

impl ParsedSimulation {
    /// Total objectives across all goals.
    pub fn total_objectives(&self) -> usize {
        self.goals.iter().map(|g| g.objectives.len()).sum()
    }

    /// Looks up an objective by id across all goals.
    pub fn objective(&self, id: &str) -> Option<&Objective> {
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
}

/// Scene information handed to the parser alongside the goal text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneContext {
    /// Scene name
    pub scene: String,

    /// Objects present in the scene
    pub available_objects: Vec<String>,

    /// Whether physics is active
    pub physics_enabled: bool,

    /// Where the agents start
    pub spawn_positions: PerAgent<Vector3<f64>>,
}

impl Default for SceneContext {
    fn default() -> Self {
        Self {
            scene: "default".to_string(),
            available_objects: Vec::new(),
            physics_enabled: true,
            spawn_positions: PerAgent::new(
                Vector3::new(-2.0, 0.0, 0.0),
                Vector3::new(2.0, 0.0, 0.0),
            ),
        }
    }
}

/// Turns a natural-language goal into a [`ParsedSimulation`].
#[async_trait]
pub trait GoalParser: Send + Sync {
    /// Parses `description` against the given scene.
    ///
    /// Implementations should reject empty descriptions and parses that
    /// yield no objectives.
    async fn parse(
        &self,
        name: &str,
        description: &str,
        scene: &SceneContext,
    ) -> Result<ParsedSimulation, ParseError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_target_includes() {
        assert!(ObjectiveTarget::AgentP1.includes(AgentId::P1));
        assert!(!ObjectiveTarget::AgentP1.includes(AgentId::P2));
        assert!(ObjectiveTarget::Both.includes(AgentId::P1));
        assert!(ObjectiveTarget::Both.includes(AgentId::P2));
        assert!(!ObjectiveTarget::Environment.includes(AgentId::P1));
    }

    #[test]
    fn test_objective_target_position() {
        let obj = Objective::new(
            "reach-cache",
            ObjectiveKind::Movement,
            "Reach the supply cache",
            ObjectiveTarget::AgentP1,
        )
        .with_parameter("target_position", json!([10.0, 0.0, -3.5]));

        let pos = obj.target_position().unwrap();
        assert_eq!(pos, Vector3::new(10.0, 0.0, -3.5));

        let bare = Objective::new(
            "wander",
            ObjectiveKind::Exploration,
            "Wander",
            ObjectiveTarget::Both,
        );
        assert!(bare.target_position().is_none());
    }

    #[test]
    fn test_priority_clamped() {
        let obj = Objective::new(
            "x",
            ObjectiveKind::Custom,
            "x",
            ObjectiveTarget::Both,
        )
        .with_priority(42);
        assert_eq!(obj.priority, 10);
    }

    #[test]
    fn test_goal_creation_time_recorded() {
        let goal = SimulationGoal::new("g", "d", Complexity::Simple, Duration::from_secs(7));
        assert_eq!(goal.created_at, Duration::from_secs(7));

        // The timestamp rides along in the serialized form
        let value = serde_json::to_value(&goal).unwrap();
        assert_eq!(value["created_at"]["secs"], 7);
    }

    #[test]
    fn test_parsed_lookup() {
        let mut goal = SimulationGoal::new("g", "d", Complexity::Simple, Duration::ZERO);
        goal.objectives.push(Objective::new(
            "a",
            ObjectiveKind::Movement,
            "a",
            ObjectiveTarget::AgentP1,
        ));
        goal.objectives.push(Objective::new(
            "b",
            ObjectiveKind::Movement,
            "b",
            ObjectiveTarget::AgentP2,
        ));
        let parsed = ParsedSimulation {
            goals: vec![goal],
            agent_roles: PerAgent::new(
                AgentRole::new("Scout", "curious"),
                AgentRole::new("Carrier", "methodical"),
            ),
            environment: EnvironmentSpec::default(),
            timeline: Timeline::default(),
        };

        assert_eq!(parsed.total_objectives(), 2);
        assert!(parsed.objective("a").is_some());
        assert!(parsed.objective("missing").is_none());
        assert_eq!(parsed.assigned_objective_ids(AgentId::P1), vec!["a"]);
    }
}
