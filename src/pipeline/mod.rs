//! Batch orchestration.
//!
//! Every cycle flows through:
//! 1. `RecordSource::fetch_batch()`: perceive the next batch
//! 2. `fan_out()`: classification, organization and response branches in parallel
//! 3. `ExecutionPlan::build()`: merge and gate by confidence
//! 4. `ActionExecutor::apply()`: run immediate actions, failures isolated
//! 5. Reporting: workflow and per-record events, monitor counters

pub mod fanout;
pub mod orchestrator;
pub mod plan;
pub mod runner;
pub mod state;
pub mod types;

pub use fanout::{Analyzers, BranchReport, FanOut};
pub use orchestrator::{
    ActionFailure, Collaborators, ExecutionTally, Orchestrator, OrchestratorStatus,
    ShutdownReport, WorkflowExecution,
};
pub use plan::{ExecutionPlan, GateThresholds};
pub use runner::spawn_cycle_loop;
pub use state::OrchestratorState;
pub use types::*;
