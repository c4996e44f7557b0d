//! Deterministic goal fixtures used by the scripted parser.
//!
//! Every fixture yields a fully-walkable [`ParsedSimulation`]: each objective
//! carries a `target_position` parameter, so the waypoint walker can pursue
//! it without any further interpretation.

use serde_json::json;
use std::time::Duration;

use tandem_core::goal::{
    AgentRole, Complexity, EnvironmentSpec, Objective, ObjectiveKind, ObjectiveTarget,
    ParsedSimulation, PhaseSpec, SceneContext, SimulationGoal, Timeline,
};
use tandem_core::PerAgent;

/// Default role pair attached to every fixture.
fn roles() -> PerAgent<AgentRole> {
    let mut scout = AgentRole::new("Scout", "curious and quick");
    scout.capabilities.push("fast_movement".to_string());
    let mut carrier = AgentRole::new("Carrier", "methodical and steady");
    carrier.capabilities.push("can_carry".to_string());
    PerAgent::new(scout, carrier)
}

fn environment(scene: &SceneContext) -> EnvironmentSpec {
    EnvironmentSpec {
        scene: scene.scene.clone(),
        available_objects: scene.available_objects.clone(),
        physics_enabled: scene.physics_enabled,
        interaction_kinds: vec!["proximity".to_string()],
    }
}

/// Two markers near the scene center, one per agent. Completable in a
/// handful of decision rounds from the default spawns.
pub fn rendezvous(scene: &SceneContext) -> ParsedSimulation {
    let mut goal = SimulationGoal::new(
        "rendezvous",
        "Both agents converge on their rendezvous markers",
        Complexity::Simple,
        Duration::ZERO,
    );
    goal.objectives.push(
        Objective::new(
            "rendezvous-p1",
            ObjectiveKind::Movement,
            "Reach the west marker",
            ObjectiveTarget::AgentP1,
        )
        .with_parameter("target_position", json!([-2.0, 0.0, 4.0]))
        .with_priority(7),
    );
    goal.objectives.push(
        Objective::new(
            "rendezvous-p2",
            ObjectiveKind::Movement,
            "Reach the east marker",
            ObjectiveTarget::AgentP2,
        )
        .with_parameter("target_position", json!([2.0, 0.0, 4.0]))
        .with_priority(7),
    );

    ParsedSimulation {
        goals: vec![goal],
        agent_roles: roles(),
        environment: environment(scene),
        timeline: Timeline {
            phases: vec![PhaseSpec {
                name: "converge".to_string(),
                description: "Both agents walk to their markers".to_string(),
                objective_ids: vec!["rendezvous-p1".to_string(), "rendezvous-p2".to_string()],
            }],
            estimated_duration: Duration::from_secs(30),
        },
    }
}

/// A two-leg relay: the carrier leg depends on the handoff leg, so agent P2
/// must hold position until agent P1 delivers.
pub fn relay(scene: &SceneContext) -> ParsedSimulation {
    let mut goal = SimulationGoal::new(
        "relay",
        "Carry the package to the handoff point, then on to the depot",
        Complexity::Moderate,
        Duration::ZERO,
    );
    goal.objectives.push(
        Objective::new(
            "relay-handoff",
            ObjectiveKind::Cooperation,
            "Bring the package to the handoff point",
            ObjectiveTarget::AgentP1,
        )
        .with_parameter("target_position", json!([0.0, 0.0, 4.0]))
        .with_priority(8),
    );
    goal.objectives.push(
        Objective::new(
            "relay-delivery",
            ObjectiveKind::Cooperation,
            "Carry the package from the handoff point to the depot",
            ObjectiveTarget::AgentP2,
        )
        .with_parameter("target_position", json!([6.0, 0.0, 4.0]))
        .with_priority(8)
        .depends_on("relay-handoff"),
    );

    ParsedSimulation {
        goals: vec![goal],
        agent_roles: roles(),
        environment: environment(scene),
        timeline: Timeline {
            phases: vec![
                PhaseSpec {
                    name: "handoff".to_string(),
                    description: "P1 carries the package to the handoff point".to_string(),
                    objective_ids: vec!["relay-handoff".to_string()],
                },
                PhaseSpec {
                    name: "delivery".to_string(),
                    description: "P2 completes the delivery".to_string(),
                    objective_ids: vec!["relay-delivery".to_string()],
                },
            ],
            estimated_duration: Duration::from_secs(60),
        },
    }
}

/// A single shared objective 500 m out. Unreachable inside any sane run
/// budget; used to exercise duration expiry.
pub fn distant_beacon(scene: &SceneContext) -> ParsedSimulation {
    let mut goal = SimulationGoal::new(
        "distant-beacon",
        "March toward the distant beacon",
        Complexity::Simple,
        Duration::ZERO,
    );
    goal.objectives.push(
        Objective::new(
            "reach-beacon",
            ObjectiveKind::Exploration,
            "Reach the beacon on the horizon",
            ObjectiveTarget::Both,
        )
        .with_parameter("target_position", json!([500.0, 0.0, 0.0])),
    );

    ParsedSimulation {
        goals: vec![goal],
        agent_roles: roles(),
        environment: environment(scene),
        timeline: Timeline {
            phases: vec![PhaseSpec {
                name: "march".to_string(),
                description: "Both agents head for the beacon".to_string(),
                objective_ids: vec!["reach-beacon".to_string()],
            }],
            estimated_duration: Duration::from_secs(600),
        },
    }
}

/// A four-corner circuit shared by both agents. Long enough that external
/// pause/resume/stop choreography lands mid-run.
pub fn patrol(scene: &SceneContext) -> ParsedSimulation {
    let corners = [
        ("patrol-north", [0.0, 0.0, 8.0]),
        ("patrol-east", [8.0, 0.0, 0.0]),
        ("patrol-south", [0.0, 0.0, -8.0]),
        ("patrol-west", [-8.0, 0.0, 0.0]),
    ];

    let mut goal = SimulationGoal::new(
        "patrol",
        "Walk the perimeter circuit corner by corner",
        Complexity::Moderate,
        Duration::ZERO,
    );
    for (id, position) in corners {
        goal.objectives.push(
            Objective::new(
                id,
                ObjectiveKind::Movement,
                "Visit the patrol corner",
                ObjectiveTarget::Both,
            )
            .with_parameter("target_position", json!(position)),
        );
    }

    let phases = corners
        .iter()
        .map(|(id, _)| PhaseSpec {
            name: id.to_string(),
            description: "Both agents visit the corner".to_string(),
            objective_ids: vec![id.to_string()],
        })
        .collect();

    ParsedSimulation {
        goals: vec![goal],
        agent_roles: roles(),
        environment: environment(scene),
        timeline: Timeline {
            phases,
            estimated_duration: Duration::from_secs(120),
        },
    }
}
