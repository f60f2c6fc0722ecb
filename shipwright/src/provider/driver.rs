//! Provider driver capability set
//!
//! The orchestrator talks to a remote build service only through
//! [`ProviderDriver`], so a second backend can be added without touching
//! workflow code.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use provider_api::BuildStatus;

use crate::errors::ProviderError;
use crate::models::event::DeploymentEvent;
use crate::models::request::{BuildId, BuildRequest, DeploymentRequest};
use crate::status::{mapper, DeploymentStatus, Phase};

/// What a backend can do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Resubmitting the same build id is deduplicated by the provider
    pub idempotent_submit: bool,

    /// A deploy step can be chained after a successful build
    pub deploy: bool,

    /// Live event streaming is available
    pub stream: bool,
}

/// Provider acknowledgment of a submitted operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub external_id: String,
    pub status: BuildStatus,
}

/// The finished build a deploy is chained after
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReceipt {
    pub external_id: String,
    pub status: DeploymentStatus,
}

/// A provider-side status observation
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderEvent {
    pub external_id: String,
    pub status: BuildStatus,

    /// Build id the provider echoed back, if any
    pub build_id: Option<BuildId>,

    /// Phase the provider echoed back, if any
    pub phase: Option<Phase>,

    pub detail: Option<String>,
    pub log_url: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl ProviderEvent {
    pub fn internal_status(&self) -> DeploymentStatus {
        mapper::map(&self.status)
    }
}

/// Options for [`ProviderDriver::stream_events`]
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub external_id: String,
    pub poll_interval: Duration,
}

/// Lazy, non-restartable sequence of provider events.
///
/// End of stream means "unknown": consumers fall back to polling.
pub type EventStream = BoxStream<'static, Result<ProviderEvent, ProviderError>>;

#[async_trait]
pub trait ProviderDriver: Send + Sync {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    /// Submit a build. Safe to retry at the transport level.
    async fn submit(&self, request: &BuildRequest) -> Result<SubmitReceipt, ProviderError>;

    /// Chain the deploy step. Fails with [`ProviderError::Precondition`]
    /// unless `build` finished successfully.
    async fn deploy(
        &self,
        request: &DeploymentRequest,
        build: &BuildReceipt,
    ) -> Result<DeploymentEvent, ProviderError>;

    async fn stream_events(&self, options: StreamOptions) -> Result<EventStream, ProviderError>;

    /// Current status of a submitted operation
    async fn status(&self, external_id: &str) -> Result<ProviderEvent, ProviderError>;

    /// Look for an operation already submitted for this build id and phase
    async fn find_submission(
        &self,
        build_id: &BuildId,
        phase: Phase,
    ) -> Result<Option<SubmitReceipt>, ProviderError>;

    /// Parse a provider-native notification payload
    fn parse_notification(&self, payload: &serde_json::Value)
        -> Result<ProviderEvent, ProviderError>;
}

/// Reject a deploy whose build has not succeeded
pub fn ensure_deployable(build: &BuildReceipt) -> Result<(), ProviderError> {
    if !build.status.is_success() {
        return Err(ProviderError::Precondition(format!(
            "deploy requested for build {} in status {}",
            build.external_id, build.status
        )));
    }
    if build.external_id.is_empty() {
        return Err(ProviderError::Precondition(
            "deploy requested without a provider build id".to_string(),
        ));
    }
    Ok(())
}
