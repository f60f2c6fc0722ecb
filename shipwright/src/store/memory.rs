//! In-memory stores, used in tests and for ephemeral runs

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::models::event::DeploymentEvent;
use crate::models::request::BuildId;
use crate::status::Phase;
use crate::store::checkpoint::{CheckpointStore, WorkflowCheckpoint};
use crate::store::event_log::{judge, AppendOutcome, EventLog};

/// Event log kept in process memory
#[derive(Default)]
pub struct MemoryEventLog {
    entries: Mutex<HashMap<BuildId, Vec<DeploymentEvent>>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of recorded events across all builds
    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, event: DeploymentEvent) -> Result<AppendOutcome, StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let history = entries.entry(event.build_id.clone()).or_default();

        let outcome = judge(history, &event);
        if outcome.is_applied() {
            history.push(event);
        }
        Ok(outcome)
    }

    async fn events(&self, build_id: &BuildId) -> Result<Vec<DeploymentEvent>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(build_id).cloned().unwrap_or_default())
    }
}

/// Checkpoint store kept in process memory
#[derive(Default)]
pub struct MemoryCheckpointStore {
    entries: Mutex<HashMap<BuildId, WorkflowCheckpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, build_id: &BuildId) -> Result<Option<WorkflowCheckpoint>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(build_id).cloned())
    }

    async fn save(&self, checkpoint: &WorkflowCheckpoint) -> Result<WorkflowCheckpoint, StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let stored = entries
            .entry(checkpoint.build_id.clone())
            .and_modify(|existing| existing.merge(checkpoint))
            .or_insert_with(|| checkpoint.clone());
        Ok(stored.clone())
    }

    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<(BuildId, Phase)>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        for checkpoint in entries.values() {
            for phase in [Phase::Build, Phase::Deploy] {
                if checkpoint.external_id(phase) == Some(external_id) {
                    return Ok(Some((checkpoint.build_id.clone(), phase)));
                }
            }
        }
        Ok(None)
    }

    async fn list_unfinished(&self) -> Result<Vec<WorkflowCheckpoint>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries
            .values()
            .filter(|cp| !cp.is_finished())
            .cloned()
            .collect())
    }
}
