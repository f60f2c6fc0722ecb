//! Durable workflow checkpoints

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::models::request::{BuildId, WorkflowRequest};
use crate::status::Phase;

/// Coarse position of a workflow.
///
/// `Submitting` and `DeploySubmitting` record the intent to call the provider
/// before the call is made; finding one on resume means the call may or may
/// not have reached the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum WorkflowStage {
    NotSubmitted,
    Submitting,
    Submitted,
    BuildTerminal { succeeded: bool },
    DeploySubmitting,
    DeploySubmitted,
    DeployTerminal { succeeded: bool },
}

impl WorkflowStage {
    pub fn rank(&self) -> u8 {
        match self {
            WorkflowStage::NotSubmitted => 0,
            WorkflowStage::Submitting => 1,
            WorkflowStage::Submitted => 2,
            WorkflowStage::BuildTerminal { .. } => 3,
            WorkflowStage::DeploySubmitting => 4,
            WorkflowStage::DeploySubmitted => 5,
            WorkflowStage::DeployTerminal { .. } => 6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStage::NotSubmitted => "not_submitted",
            WorkflowStage::Submitting => "submitting",
            WorkflowStage::Submitted => "submitted",
            WorkflowStage::BuildTerminal { succeeded: true } => "build_succeeded",
            WorkflowStage::BuildTerminal { succeeded: false } => "build_failed",
            WorkflowStage::DeploySubmitting => "deploy_submitting",
            WorkflowStage::DeploySubmitted => "deploy_submitted",
            WorkflowStage::DeployTerminal { succeeded: true } => "deploy_succeeded",
            WorkflowStage::DeployTerminal { succeeded: false } => "deploy_failed",
        }
    }
}

/// Persisted state of one build id's workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowCheckpoint {
    pub build_id: BuildId,
    pub request: WorkflowRequest,
    pub stage: WorkflowStage,
    #[serde(default)]
    pub build_external_id: Option<String>,
    #[serde(default)]
    pub deploy_external_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowCheckpoint {
    pub fn new(request: WorkflowRequest) -> Self {
        Self {
            build_id: request.build_id().clone(),
            request,
            stage: WorkflowStage::NotSubmitted,
            build_external_id: None,
            deploy_external_id: None,
            updated_at: Utc::now(),
        }
    }

    /// Whether the workflow has nothing left to do
    pub fn is_finished(&self) -> bool {
        match self.stage {
            WorkflowStage::BuildTerminal { succeeded: false } => true,
            WorkflowStage::BuildTerminal { succeeded: true } => self.request.deployment().is_none(),
            WorkflowStage::DeployTerminal { .. } => true,
            _ => false,
        }
    }

    /// Move to `stage` if it is ahead of the current one
    pub fn advance(&mut self, stage: WorkflowStage) -> bool {
        if stage.rank() <= self.stage.rank() {
            return false;
        }
        self.stage = stage;
        self.updated_at = Utc::now();
        true
    }

    pub fn external_id(&self, phase: Phase) -> Option<&str> {
        match phase {
            Phase::Build => self.build_external_id.as_deref(),
            Phase::Deploy => self.deploy_external_id.as_deref(),
        }
    }

    /// Combine a stored checkpoint with an incoming one without going backwards
    pub fn merge(&mut self, incoming: &WorkflowCheckpoint) {
        self.advance(incoming.stage);
        if self.build_external_id.is_none() {
            self.build_external_id = incoming.build_external_id.clone();
        }
        if self.deploy_external_id.is_none() {
            self.deploy_external_id = incoming.deploy_external_id.clone();
        }
    }
}

/// Durable store of workflow checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, build_id: &BuildId) -> Result<Option<WorkflowCheckpoint>, StoreError>;

    /// Upsert a checkpoint. An existing checkpoint is merged forward: the
    /// stage never moves backwards and known external ids are kept. Returns
    /// what was stored.
    async fn save(&self, checkpoint: &WorkflowCheckpoint) -> Result<WorkflowCheckpoint, StoreError>;

    /// Resolve a provider operation id to the build and phase it belongs to
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<(BuildId, Phase)>, StoreError>;

    /// Checkpoints whose workflow still has work left
    async fn list_unfinished(&self) -> Result<Vec<WorkflowCheckpoint>, StoreError>;
}
