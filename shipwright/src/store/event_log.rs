//! Append-only deployment event log

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::models::event::DeploymentEvent;
use crate::models::request::BuildId;
use crate::status::{evaluate, DeploymentStatus, Phase, Transition};

/// What happened to an event offered to the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Recorded; the stream advanced
    Applied,

    /// Same provider operation and status already recorded
    Duplicate,

    /// Would move the stream backwards or out of a terminal state
    Regressed { current: DeploymentStatus },
}

impl AppendOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, AppendOutcome::Applied)
    }
}

/// Durable, append-only store of deployment events.
///
/// Implementations must make `append` atomic with respect to other appends:
/// the duplicate and regression checks and the write happen under one lock,
/// so only one event per `(build, phase, status)` is ever first.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append an event unless it duplicates or regresses its stream
    async fn append(&self, event: DeploymentEvent) -> Result<AppendOutcome, StoreError>;

    /// All recorded events of a build, in recording order
    async fn events(&self, build_id: &BuildId) -> Result<Vec<DeploymentEvent>, StoreError>;

    /// Latest recorded event of one phase; this is the current status
    async fn latest(
        &self,
        build_id: &BuildId,
        phase: Phase,
    ) -> Result<Option<DeploymentEvent>, StoreError> {
        let events = self.events(build_id).await?;
        Ok(events.into_iter().rev().find(|e| e.phase == phase))
    }
}

/// Decide whether `event` may be appended after `history` (same build)
pub fn judge(history: &[DeploymentEvent], event: &DeploymentEvent) -> AppendOutcome {
    if let Some(key) = event.dedup_key() {
        if history.iter().any(|e| e.dedup_key() == Some(key)) {
            return AppendOutcome::Duplicate;
        }
    }

    let current = history
        .iter()
        .rev()
        .find(|e| e.phase == event.phase)
        .map(|e| e.status);

    match evaluate(current, event.status) {
        Transition::Advance => AppendOutcome::Applied,
        Transition::Duplicate => AppendOutcome::Duplicate,
        Transition::Regress => AppendOutcome::Regressed {
            // evaluate only regresses against an existing status
            current: current.unwrap_or(event.status),
        },
    }
}
