//! Tandem Scenario Harness
//!
//! This crate exercises the orchestration layer end to end: scripted goal
//! fixtures stand in for the production goal parser, and a deterministic
//! waypoint walker stands in for the production agent coordinator. Every
//! scenario drives a real [`ExecutionScheduler`] against a real
//! [`SimulationStore`] and asserts on the settled run.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                       ScenarioRunner                          │
//! │  ┌────────────────────────────────────────────────────────┐   │
//! │  │ ExecutionScheduler (decision loop + retry policy)      │   │
//! │  └────────────────────────────────────────────────────────┘   │
//! │       │                       │                               │
//! │  ┌────▼─────────────┐   ┌─────▼────────────┐                  │
//! │  │ ScriptedGoal     │   │ WaypointWalker   │                  │
//! │  │ Parser           │   │ (AgentCoordinator│                  │
//! │  │ (goal fixtures)  │   │  with fault      │                  │
//! │  └──────────────────┘   │  injection)      │                  │
//! │       │                 └─────┬────────────┘                  │
//! │  ┌────▼───────────────────────▼────┐                          │
//! │  │        SimulationStore          │                          │
//! │  │  (lifecycle + derived progress) │                          │
//! │  └─────────────────────────────────┘                          │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use tandem_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let runner = ScenarioRunner::new(42);
//! let result = runner.run(ScenarioId::Waypoint).await;
//! assert!(result.passed);
//! ```
//!
//! [`ExecutionScheduler`]: tandem_core::ExecutionScheduler
//! [`SimulationStore`]: tandem_core::SimulationStore

mod fixtures;
mod runner;
mod script;
mod walker;
pub mod scenarios;

pub use runner::{ScenarioResult, ScenarioRunner};
pub use script::ScriptedGoalParser;
pub use walker::{WalkerMode, WaypointWalker};
