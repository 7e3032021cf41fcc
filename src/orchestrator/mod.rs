//! 演练编排：状态机与对外状态投影

pub mod engine;
pub mod state;

pub use engine::{OrchestratorSettings, ScenarioOrchestrator, TurnOutcome};
pub use state::{ScenarioStatus, ScenarioSummary};
