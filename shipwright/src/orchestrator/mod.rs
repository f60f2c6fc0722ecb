//! Workflow orchestration

pub mod waiters;
pub mod workflow;

pub use workflow::{Ingested, Orchestrator, OrchestratorOptions, WorkflowOutcome};
