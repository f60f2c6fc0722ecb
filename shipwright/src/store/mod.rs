//! Durable stores: the deployment event log and workflow checkpoints

pub mod checkpoint;
pub mod disk;
pub mod event_log;
pub mod memory;

pub use checkpoint::{CheckpointStore, WorkflowCheckpoint, WorkflowStage};
pub use disk::{DiskCheckpointStore, DiskEventLog};
pub use event_log::{AppendOutcome, EventLog};
pub use memory::{MemoryCheckpointStore, MemoryEventLog};
