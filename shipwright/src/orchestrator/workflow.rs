//! Durable build and deploy workflow
//!
//! A workflow drives one build id through submit, build wait, deploy and
//! deploy wait. Every step is checkpointed, and the intent to call the
//! provider is persisted before the call, so a restarted process resumes
//! where the last one stopped without submitting the same build twice.
//!
//! Status changes reach a workflow from three sources: the provider's event
//! stream, polling, and ingested webhook notifications. All of them funnel
//! through [`Orchestrator::apply`], which appends to the event log and only
//! then advances checkpoints and wakes waiters.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use provider_api::BuildStatus;
use tracing::{debug, info, warn};

use crate::errors::{OrchestratorError, ProviderError, StoreError};
use crate::models::event::DeploymentEvent;
use crate::models::request::{BuildId, WorkflowRequest};
use crate::orchestrator::waiters::{BuildLocks, Waiters};
use crate::provider::driver::{
    BuildReceipt, EventStream, ProviderDriver, ProviderEvent, StreamOptions, SubmitReceipt,
};
use crate::status::{mapper, DeploymentStatus, Phase};
use crate::store::checkpoint::{CheckpointStore, WorkflowCheckpoint, WorkflowStage};
use crate::store::event_log::{AppendOutcome, EventLog};

/// Orchestrator options
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Delay between provider status polls when no stream is available
    pub poll_interval: Duration,

    /// Longest a single phase may take before the workflow gives up waiting
    pub phase_timeout: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            phase_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// How a workflow ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowOutcome {
    /// Build-only workflow whose build succeeded
    Built,
    BuildFailed { status: DeploymentStatus },
    Deployed,
    DeployFailed { status: DeploymentStatus },
}

/// Result of ingesting a provider notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingested {
    pub build_id: BuildId,
    pub phase: Phase,
    pub status: DeploymentStatus,
    pub outcome: AppendOutcome,
}

pub struct Orchestrator {
    driver: Arc<dyn ProviderDriver>,
    events: Arc<dyn EventLog>,
    checkpoints: Arc<dyn CheckpointStore>,
    waiters: Waiters,
    locks: BuildLocks,
    options: OrchestratorOptions,
}

impl Orchestrator {
    pub fn new(
        driver: Arc<dyn ProviderDriver>,
        events: Arc<dyn EventLog>,
        checkpoints: Arc<dyn CheckpointStore>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            driver,
            events,
            checkpoints,
            waiters: Waiters::new(),
            locks: BuildLocks::new(),
            options,
        }
    }

    pub fn driver(&self) -> &Arc<dyn ProviderDriver> {
        &self.driver
    }

    /// Drive a workflow to its end.
    ///
    /// Calling `run` again with the same request resumes it; a finished
    /// workflow returns its outcome without touching the provider.
    pub async fn run(&self, request: WorkflowRequest) -> Result<WorkflowOutcome, OrchestratorError> {
        request.validate()?;
        self.ensure_supported(&request)?;
        let _guard = self.locks.lock(request.build_id()).await;

        let checkpoint = self.prepare(request).await?;
        self.drive(checkpoint).await
    }

    /// Run a workflow only as far as the build submission.
    ///
    /// Returns once the provider has accepted the build (or the workflow was
    /// already past that point); the caller continues it with [`Self::run`].
    pub async fn start(
        &self,
        request: WorkflowRequest,
    ) -> Result<WorkflowCheckpoint, OrchestratorError> {
        request.validate()?;
        self.ensure_supported(&request)?;
        let _guard = self.locks.lock(request.build_id()).await;

        let checkpoint = self.prepare(request).await?;
        match checkpoint.stage {
            WorkflowStage::NotSubmitted | WorkflowStage::Submitting => {
                self.submit_build(checkpoint).await
            }
            _ => Ok(checkpoint),
        }
    }

    /// Continue a stored workflow unless another task is already driving it.
    ///
    /// Returns `None` when the build is busy.
    pub async fn resume(
        &self,
        checkpoint: WorkflowCheckpoint,
    ) -> Result<Option<WorkflowOutcome>, OrchestratorError> {
        let Some(_guard) = self.locks.try_lock(&checkpoint.build_id) else {
            debug!("Build {} is already being driven", checkpoint.build_id);
            return Ok(None);
        };

        let checkpoint = self.reload(checkpoint).await?;
        self.ensure_supported(&checkpoint.request)?;
        info!(
            "Resuming build {} from stage {}",
            checkpoint.build_id,
            checkpoint.stage.as_str()
        );
        self.drive(checkpoint).await.map(Some)
    }

    /// Refuse deployments the driver cannot perform before anything is submitted
    fn ensure_supported(&self, request: &WorkflowRequest) -> Result<(), OrchestratorError> {
        if request.deployment().is_some() && !self.driver.capabilities().deploy {
            return Err(OrchestratorError::DeployUnsupported {
                build_id: request.build_id().to_string(),
                provider: self.driver.name(),
            });
        }
        Ok(())
    }

    async fn prepare(
        &self,
        request: WorkflowRequest,
    ) -> Result<WorkflowCheckpoint, OrchestratorError> {
        match self.checkpoints.load(request.build_id()).await? {
            Some(existing) if existing.request != request => {
                Err(OrchestratorError::RequestMismatch {
                    build_id: request.build_id().to_string(),
                })
            }
            Some(existing) => Ok(existing),
            None => Ok(self.checkpoints.save(&WorkflowCheckpoint::new(request)).await?),
        }
    }

    async fn reload(&self, checkpoint: WorkflowCheckpoint) -> Result<WorkflowCheckpoint, StoreError> {
        Ok(self
            .checkpoints
            .load(&checkpoint.build_id)
            .await?
            .unwrap_or(checkpoint))
    }

    async fn drive(
        &self,
        mut checkpoint: WorkflowCheckpoint,
    ) -> Result<WorkflowOutcome, OrchestratorError> {
        loop {
            debug!(
                "Build {} at stage {}",
                checkpoint.build_id,
                checkpoint.stage.as_str()
            );
            checkpoint = match checkpoint.stage {
                WorkflowStage::NotSubmitted | WorkflowStage::Submitting => {
                    self.submit_build(checkpoint).await?
                }
                WorkflowStage::Submitted => self.await_phase(checkpoint, Phase::Build).await?,
                WorkflowStage::BuildTerminal { succeeded: false } => {
                    let status = self.failed_status(&checkpoint.build_id, Phase::Build).await?;
                    return Ok(WorkflowOutcome::BuildFailed { status });
                }
                WorkflowStage::BuildTerminal { succeeded: true } => {
                    if checkpoint.request.deployment().is_none() {
                        return Ok(WorkflowOutcome::Built);
                    }
                    self.submit_deploy(checkpoint).await?
                }
                WorkflowStage::DeploySubmitting => self.submit_deploy(checkpoint).await?,
                WorkflowStage::DeploySubmitted => {
                    self.await_phase(checkpoint, Phase::Deploy).await?
                }
                WorkflowStage::DeployTerminal { succeeded: true } => {
                    return Ok(WorkflowOutcome::Deployed);
                }
                WorkflowStage::DeployTerminal { succeeded: false } => {
                    let status = self.failed_status(&checkpoint.build_id, Phase::Deploy).await?;
                    return Ok(WorkflowOutcome::DeployFailed { status });
                }
            };
        }
    }

    async fn failed_status(
        &self,
        build_id: &BuildId,
        phase: Phase,
    ) -> Result<DeploymentStatus, StoreError> {
        Ok(self
            .current_status(build_id, phase)
            .await?
            .filter(|s| s.is_terminal())
            .unwrap_or(DeploymentStatus::Error))
    }

    async fn submit_build(
        &self,
        mut checkpoint: WorkflowCheckpoint,
    ) -> Result<WorkflowCheckpoint, OrchestratorError> {
        let build_id = checkpoint.build_id.clone();
        let resuming = checkpoint.stage == WorkflowStage::Submitting;

        // a submit may have reached the provider before the last process died
        let mut receipt = None;
        if resuming {
            receipt = self.recover_submission(&checkpoint, Phase::Build).await?;
        }

        let receipt = match receipt {
            Some(receipt) => {
                info!(
                    "Recovered build {} submission as {}",
                    build_id, receipt.external_id
                );
                receipt
            }
            None => {
                if !resuming {
                    self.record(&checkpoint, Phase::Build, DeploymentStatus::Pending, None)
                        .await?;
                    checkpoint.advance(WorkflowStage::Submitting);
                    checkpoint = self.checkpoints.save(&checkpoint).await?;
                }

                match self.driver.submit(checkpoint.request.build()).await {
                    Ok(receipt) => receipt,
                    Err(e) if e.is_retryable() => {
                        warn!("Submitting build {} failed, will retry: {}", build_id, e);
                        return Err(OrchestratorError::Submit(e));
                    }
                    Err(e) => {
                        warn!("Provider rejected build {}: {}", build_id, e);
                        self.record(
                            &checkpoint,
                            Phase::Build,
                            DeploymentStatus::Error,
                            Some(e.to_string()),
                        )
                        .await?;
                        return Err(OrchestratorError::Submit(e));
                    }
                }
            }
        };

        if checkpoint.build_external_id.is_none() {
            checkpoint.build_external_id = Some(receipt.external_id.clone());
        }
        checkpoint.advance(WorkflowStage::Submitted);
        let checkpoint = self.checkpoints.save(&checkpoint).await?;

        let event = DeploymentEvent::new(build_id, Phase::Build, mapper::map(&receipt.status))
            .with_external_id(receipt.external_id.clone())
            .with_deployment_id(deployment_id(&checkpoint))
            .with_resource_id("build", receipt.external_id)
            .with_metadata("providerStatus", receipt.status.as_str().into());
        self.apply(event).await?;

        Ok(self.reload(checkpoint).await?)
    }

    async fn submit_deploy(
        &self,
        mut checkpoint: WorkflowCheckpoint,
    ) -> Result<WorkflowCheckpoint, OrchestratorError> {
        let Some(deployment) = checkpoint.request.deployment().cloned() else {
            return Ok(checkpoint);
        };
        let build_id = checkpoint.build_id.clone();
        let resuming = checkpoint.stage == WorkflowStage::DeploySubmitting;

        if resuming {
            if let Some(receipt) = self.recover_submission(&checkpoint, Phase::Deploy).await? {
                info!(
                    "Recovered deploy {} submission as {}",
                    build_id, receipt.external_id
                );
                checkpoint
                    .deploy_external_id
                    .get_or_insert(receipt.external_id);
                checkpoint.advance(WorkflowStage::DeploySubmitted);
                return Ok(self.checkpoints.save(&checkpoint).await?);
            }
        } else {
            self.record(&checkpoint, Phase::Deploy, DeploymentStatus::Pending, None)
                .await?;
            checkpoint.advance(WorkflowStage::DeploySubmitting);
            checkpoint = self.checkpoints.save(&checkpoint).await?;
        }

        let build = BuildReceipt {
            external_id: checkpoint.build_external_id.clone().unwrap_or_default(),
            status: self
                .current_status(&build_id, Phase::Build)
                .await?
                .unwrap_or(DeploymentStatus::Pending),
        };

        match self.driver.deploy(&deployment, &build).await {
            Ok(event) => {
                if let Some(external_id) = &event.external_id {
                    checkpoint
                        .deploy_external_id
                        .get_or_insert_with(|| external_id.clone());
                }
                checkpoint.advance(WorkflowStage::DeploySubmitted);
                let checkpoint = self.checkpoints.save(&checkpoint).await?;
                self.apply(event).await?;
                Ok(self.reload(checkpoint).await?)
            }
            Err(e) if e.is_retryable() => {
                // the provider may have accepted it; resuming looks it up first
                warn!("Deploying build {} failed, will retry: {}", build_id, e);
                Err(OrchestratorError::Deploy(e))
            }
            Err(e) => {
                warn!("Deploy of build {} failed: {}", build_id, e);
                self.record(
                    &checkpoint,
                    Phase::Deploy,
                    DeploymentStatus::Error,
                    Some(e.to_string()),
                )
                .await?;
                Err(OrchestratorError::Deploy(e))
            }
        }
    }

    /// Find an operation a previous attempt may already have submitted
    async fn recover_submission(
        &self,
        checkpoint: &WorkflowCheckpoint,
        phase: Phase,
    ) -> Result<Option<SubmitReceipt>, OrchestratorError> {
        if let Some(external_id) = checkpoint.external_id(phase) {
            let status = match self.driver.status(external_id).await {
                Ok(observed) => observed.status,
                Err(e) => {
                    warn!(
                        "Cannot read status of {} for build {}, keeping it as submitted: {}",
                        external_id, checkpoint.build_id, e
                    );
                    BuildStatus::StatusUnknown
                }
            };
            return Ok(Some(SubmitReceipt {
                external_id: external_id.to_string(),
                status,
            }));
        }
        if phase == Phase::Build && self.driver.capabilities().idempotent_submit {
            return Ok(None);
        }
        self.driver
            .find_submission(&checkpoint.build_id, phase)
            .await
            .map_err(OrchestratorError::Provider)
    }

    /// Wait until the phase reaches a terminal status
    async fn await_phase(
        &self,
        checkpoint: WorkflowCheckpoint,
        phase: Phase,
    ) -> Result<WorkflowCheckpoint, OrchestratorError> {
        let build_id = checkpoint.build_id.clone();
        let external_id = checkpoint.external_id(phase).map(str::to_string);
        let deployment_id = deployment_id(&checkpoint);

        let mut changes = self.waiters.subscribe(&build_id, phase);
        let mut stream = match &external_id {
            Some(external_id) if self.driver.capabilities().stream => {
                self.open_stream(external_id).await
            }
            _ => None,
        };

        let deadline = tokio::time::sleep(self.options.phase_timeout);
        tokio::pin!(deadline);

        loop {
            if let Some(status) = self.current_status(&build_id, phase).await? {
                if status.is_terminal() {
                    let mut checkpoint = self.reload(checkpoint).await?;
                    checkpoint.advance(terminal_stage(phase, status));
                    info!("Build {} {} finished: {}", build_id, phase, status);
                    return Ok(self.checkpoints.save(&checkpoint).await?);
                }
            }

            tokio::select! {
                _ = &mut deadline => {
                    warn!("Timed out waiting for {} of build {}", phase, build_id);
                    return Err(OrchestratorError::Timeout {
                        build_id: build_id.to_string(),
                        phase: phase.to_string(),
                    });
                }
                _ = changes.changed() => {}
                next = next_event(&mut stream) => match next {
                    Some(Ok(observed)) => {
                        let event = to_event(&build_id, deployment_id.clone(), phase, observed);
                        self.apply(event).await?;
                    }
                    Some(Err(e)) => {
                        warn!("Event stream for build {} failed, polling instead: {}", build_id, e);
                        stream = None;
                    }
                    None => {
                        debug!("Event stream for build {} ended, polling instead", build_id);
                        stream = None;
                    }
                },
                _ = tokio::time::sleep(self.options.poll_interval), if stream.is_none() => {
                    if let Some(external_id) = &external_id {
                        self.poll(&build_id, deployment_id.clone(), phase, external_id).await?;
                    }
                }
            }
        }
    }

    async fn open_stream(&self, external_id: &str) -> Option<EventStream> {
        let options = StreamOptions {
            external_id: external_id.to_string(),
            poll_interval: self.options.poll_interval,
        };
        match self.driver.stream_events(options).await {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!("Cannot stream events of {}, polling instead: {}", external_id, e);
                None
            }
        }
    }

    async fn poll(
        &self,
        build_id: &BuildId,
        deployment_id: Option<String>,
        phase: Phase,
        external_id: &str,
    ) -> Result<(), OrchestratorError> {
        match self.driver.status(external_id).await {
            Ok(observed) => {
                self.apply(to_event(build_id, deployment_id, phase, observed))
                    .await?;
                Ok(())
            }
            Err(e) if e.is_retryable() => {
                warn!("Polling {} of build {} failed: {}", phase, build_id, e);
                Ok(())
            }
            Err(e) => Err(OrchestratorError::Provider(e)),
        }
    }

    /// Record an event the orchestrator itself produced
    async fn record(
        &self,
        checkpoint: &WorkflowCheckpoint,
        phase: Phase,
        status: DeploymentStatus,
        message: Option<String>,
    ) -> Result<AppendOutcome, StoreError> {
        let mut event = DeploymentEvent::new(checkpoint.build_id.clone(), phase, status)
            .with_deployment_id(deployment_id(checkpoint));
        if let Some(message) = message {
            event = event.with_message(message);
        }
        self.apply(event).await
    }

    /// Append an event and, if it advanced its stream, update the
    /// checkpoint and wake waiters.
    pub async fn apply(&self, event: DeploymentEvent) -> Result<AppendOutcome, StoreError> {
        let outcome = self.events.append(event.clone()).await?;

        match outcome {
            AppendOutcome::Applied => {
                info!(
                    "Build {} {} is now {}",
                    event.build_id, event.phase, event.status
                );
                if event.status.is_terminal() {
                    if let Some(mut checkpoint) = self.checkpoints.load(&event.build_id).await? {
                        if checkpoint.advance(terminal_stage(event.phase, event.status)) {
                            self.checkpoints.save(&checkpoint).await?;
                        }
                    }
                }
                self.waiters
                    .notify(&event.build_id, event.phase, event.status);
            }
            AppendOutcome::Duplicate => {
                debug!(
                    "Ignoring duplicate {} {} for build {}",
                    event.phase, event.status, event.build_id
                );
            }
            AppendOutcome::Regressed { current } => {
                warn!(
                    "Discarding {} {} for build {}: already {}",
                    event.phase, event.status, event.build_id, current
                );
            }
        }

        Ok(outcome)
    }

    /// Apply a provider notification to the stream it belongs to.
    ///
    /// Returns `None` when the notification matches no known workflow.
    pub async fn ingest(
        &self,
        observed: ProviderEvent,
    ) -> Result<Option<Ingested>, OrchestratorError> {
        let Some((build_id, phase)) = self.resolve(&observed).await? else {
            debug!(
                "No workflow for provider operation {}, ignoring",
                observed.external_id
            );
            return Ok(None);
        };

        let deployment_id = self
            .checkpoints
            .load(&build_id)
            .await?
            .and_then(|cp| deployment_id(&cp));
        let event = to_event(&build_id, deployment_id, phase, observed);
        let status = event.status;
        let outcome = self.apply(event).await?;

        Ok(Some(Ingested {
            build_id,
            phase,
            status,
            outcome,
        }))
    }

    async fn resolve(
        &self,
        observed: &ProviderEvent,
    ) -> Result<Option<(BuildId, Phase)>, StoreError> {
        if let Some(found) = self
            .checkpoints
            .find_by_external_id(&observed.external_id)
            .await?
        {
            return Ok(Some(found));
        }

        // notification raced ahead of the submit receipt
        let (Some(build_id), Some(phase)) = (&observed.build_id, observed.phase) else {
            return Ok(None);
        };
        match self.checkpoints.load(build_id).await? {
            Some(mut checkpoint) if checkpoint.external_id(phase).is_none() => {
                match phase {
                    Phase::Build => checkpoint.build_external_id = Some(observed.external_id.clone()),
                    Phase::Deploy => {
                        checkpoint.deploy_external_id = Some(observed.external_id.clone())
                    }
                }
                self.checkpoints.save(&checkpoint).await?;
                Ok(Some((build_id.clone(), phase)))
            }
            _ => Ok(None),
        }
    }

    /// Current status of a phase: its latest recorded event
    pub async fn current_status(
        &self,
        build_id: &BuildId,
        phase: Phase,
    ) -> Result<Option<DeploymentStatus>, StoreError> {
        Ok(self
            .events
            .latest(build_id, phase)
            .await?
            .map(|e| e.status))
    }

    pub async fn events(&self, build_id: &BuildId) -> Result<Vec<DeploymentEvent>, StoreError> {
        self.events.events(build_id).await
    }

    pub async fn checkpoint(
        &self,
        build_id: &BuildId,
    ) -> Result<Option<WorkflowCheckpoint>, StoreError> {
        self.checkpoints.load(build_id).await
    }

    pub async fn unfinished(&self) -> Result<Vec<WorkflowCheckpoint>, StoreError> {
        self.checkpoints.list_unfinished().await
    }
}

fn deployment_id(checkpoint: &WorkflowCheckpoint) -> Option<String> {
    checkpoint
        .request
        .deployment()
        .map(|d| d.deployment_id().to_string())
}

fn terminal_stage(phase: Phase, status: DeploymentStatus) -> WorkflowStage {
    let succeeded = status.is_success();
    match phase {
        Phase::Build => WorkflowStage::BuildTerminal { succeeded },
        Phase::Deploy => WorkflowStage::DeployTerminal { succeeded },
    }
}

fn to_event(
    build_id: &BuildId,
    deployment_id: Option<String>,
    phase: Phase,
    observed: ProviderEvent,
) -> DeploymentEvent {
    let mut event = DeploymentEvent::new(build_id.clone(), phase, observed.internal_status())
        .with_external_id(observed.external_id.clone())
        .with_deployment_id(deployment_id)
        .with_resource_id(phase.as_str(), observed.external_id)
        .with_metadata("providerStatus", observed.status.as_str().into());
    if let Some(detail) = observed.detail {
        event = event.with_message(detail);
    }
    if let Some(log_url) = observed.log_url {
        event = event.with_metadata("logUrl", log_url.into());
    }
    event
}

async fn next_event(stream: &mut Option<EventStream>) -> Option<Result<ProviderEvent, ProviderError>> {
    match stream {
        Some(stream) => stream.next().await,
        None => pending().await,
    }
}
