//! Scripted in-process driver
//!
//! Each submitted operation walks through a scripted list of native statuses,
//! one step per `status` call. Used by the test suite and for local dry runs.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream;
use provider_api::{Build, BuildStatus};

use crate::errors::ProviderError;
use crate::models::event::DeploymentEvent;
use crate::models::request::{BuildId, BuildRequest, DeploymentRequest};
use crate::provider::cloud_build::{
    build_tag, parse_build_payload, BUILD_ID_SUBSTITUTION, DEPLOY_TAG,
};
use crate::provider::driver::{
    ensure_deployable, BuildReceipt, Capabilities, EventStream, ProviderDriver, ProviderEvent,
    StreamOptions, SubmitReceipt,
};
use crate::status::{mapper, Phase};

#[derive(Debug, Clone)]
struct Operation {
    build_id: BuildId,
    phase: Phase,
    script: Vec<BuildStatus>,
    pos: usize,
}

impl Operation {
    fn current(&self) -> BuildStatus {
        self.script[self.pos].clone()
    }

    fn step(&mut self) -> BuildStatus {
        if self.pos + 1 < self.script.len() {
            self.pos += 1;
        }
        self.current()
    }
}

#[derive(Debug)]
struct FakeState {
    capabilities: Capabilities,
    build_script: Vec<BuildStatus>,
    deploy_script: Vec<BuildStatus>,
    operations: BTreeMap<String, Operation>,
    next_id: u64,
    submit_calls: u32,
    deploy_calls: u32,
    submit_errors: Vec<ProviderError>,
    lose_next_submit_response: bool,
    lose_next_deploy_response: bool,
    deploy_error: Option<ProviderError>,
}

/// In-process [`ProviderDriver`] with scripted status progressions
#[derive(Debug)]
pub struct FakeDriver {
    state: Mutex<FakeState>,
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDriver {
    pub fn new() -> Self {
        let happy = vec![BuildStatus::Queued, BuildStatus::Working, BuildStatus::Success];
        Self {
            state: Mutex::new(FakeState {
                capabilities: Capabilities {
                    idempotent_submit: false,
                    deploy: true,
                    stream: false,
                },
                build_script: happy.clone(),
                deploy_script: happy,
                operations: BTreeMap::new(),
                next_id: 0,
                submit_calls: 0,
                deploy_calls: 0,
                submit_errors: Vec::new(),
                lose_next_submit_response: false,
                lose_next_deploy_response: false,
                deploy_error: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Statuses every new build walks through
    pub fn with_build_statuses(self, statuses: Vec<BuildStatus>) -> Self {
        if !statuses.is_empty() {
            self.lock().build_script = statuses;
        }
        self
    }

    /// Statuses every new deploy walks through
    pub fn with_deploy_statuses(self, statuses: Vec<BuildStatus>) -> Self {
        if !statuses.is_empty() {
            self.lock().deploy_script = statuses;
        }
        self
    }

    pub fn with_capabilities(self, capabilities: Capabilities) -> Self {
        self.lock().capabilities = capabilities;
        self
    }

    /// Fail the next submit before it reaches the provider
    pub fn fail_next_submit(&self, err: ProviderError) {
        self.lock().submit_errors.push(err);
    }

    /// Accept the next submit but fail as if its response got lost
    pub fn lose_next_submit_response(&self) {
        self.lock().lose_next_submit_response = true;
    }

    /// Accept the next deploy but fail as if its response got lost
    pub fn lose_next_deploy_response(&self) {
        self.lock().lose_next_deploy_response = true;
    }

    /// Fail every deploy with `err`
    pub fn fail_deploy(&self, err: ProviderError) {
        self.lock().deploy_error = Some(err);
    }

    /// Number of submits that reached the provider
    pub fn submit_count(&self) -> usize {
        self.count(Phase::Build)
    }

    /// Number of deploys that reached the provider
    pub fn deploy_count(&self) -> usize {
        self.count(Phase::Deploy)
    }

    /// Number of submit calls, including rejected ones
    pub fn submit_calls(&self) -> u32 {
        self.lock().submit_calls
    }

    /// Number of deploy calls, including rejected ones
    pub fn deploy_calls(&self) -> u32 {
        self.lock().deploy_calls
    }

    fn count(&self, phase: Phase) -> usize {
        self.lock()
            .operations
            .values()
            .filter(|op| op.phase == phase)
            .count()
    }

    /// External id of the operation submitted for a build and phase
    pub fn external_id(&self, build_id: &BuildId, phase: Phase) -> Option<String> {
        self.lock()
            .operations
            .iter()
            .find(|(_, op)| &op.build_id == build_id && op.phase == phase)
            .map(|(id, _)| id.clone())
    }

    /// Move an operation one step along its script
    pub fn advance(&self, external_id: &str) -> Option<BuildStatus> {
        self.lock().operations.get_mut(external_id).map(Operation::step)
    }

    /// Native notification payload for an operation at its current status
    pub fn notification(&self, external_id: &str) -> Option<serde_json::Value> {
        let state = self.lock();
        let op = state.operations.get(external_id)?;
        Some(payload(external_id, op, op.current()))
    }

    /// Native notification payload reporting an arbitrary status
    pub fn notification_with_status(
        &self,
        external_id: &str,
        status: BuildStatus,
    ) -> Option<serde_json::Value> {
        let state = self.lock();
        let op = state.operations.get(external_id)?;
        Some(payload(external_id, op, status))
    }

    fn register(&self, build_id: &BuildId, phase: Phase) -> SubmitReceipt {
        let mut state = self.lock();
        state.next_id += 1;
        let external_id = format!("op-{}-{}", phase, state.next_id);
        let script = match phase {
            Phase::Build => state.build_script.clone(),
            Phase::Deploy => state.deploy_script.clone(),
        };
        let op = Operation {
            build_id: build_id.clone(),
            phase,
            script,
            pos: 0,
        };
        let status = op.current();
        state.operations.insert(external_id.clone(), op);
        SubmitReceipt {
            external_id,
            status,
        }
    }

    fn event(&self, external_id: &str, op: &Operation, status: BuildStatus) -> ProviderEvent {
        ProviderEvent {
            external_id: external_id.to_string(),
            status,
            build_id: Some(op.build_id.clone()),
            phase: Some(op.phase),
            detail: None,
            log_url: None,
            observed_at: Utc::now(),
        }
    }
}

fn payload(external_id: &str, op: &Operation, status: BuildStatus) -> serde_json::Value {
    let mut tags = vec![build_tag(&op.build_id)];
    if op.phase == Phase::Deploy {
        tags.push(DEPLOY_TAG.to_string());
    }
    let build = Build {
        id: Some(external_id.to_string()),
        status,
        tags,
        substitutions: BTreeMap::from([(
            BUILD_ID_SUBSTITUTION.to_string(),
            op.build_id.to_string(),
        )]),
        ..Default::default()
    };
    serde_json::to_value(build).unwrap_or_default()
}

#[async_trait]
impl ProviderDriver for FakeDriver {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn capabilities(&self) -> Capabilities {
        self.lock().capabilities
    }

    async fn submit(&self, request: &BuildRequest) -> Result<SubmitReceipt, ProviderError> {
        let lost = {
            let mut state = self.lock();
            state.submit_calls += 1;
            if !state.submit_errors.is_empty() {
                return Err(state.submit_errors.remove(0));
            }
            std::mem::take(&mut state.lose_next_submit_response)
        };

        let receipt = self.register(request.build_id(), Phase::Build);
        if lost {
            return Err(ProviderError::Transient(
                "connection reset after request was sent".to_string(),
            ));
        }
        Ok(receipt)
    }

    async fn deploy(
        &self,
        request: &DeploymentRequest,
        build: &BuildReceipt,
    ) -> Result<DeploymentEvent, ProviderError> {
        let lost = {
            let mut state = self.lock();
            state.deploy_calls += 1;
            if let Some(err) = state.deploy_error.clone() {
                return Err(err);
            }
            std::mem::take(&mut state.lose_next_deploy_response)
        };
        ensure_deployable(build)?;

        let build_id = request.build().build_id();
        let receipt = self.register(build_id, Phase::Deploy);
        if lost {
            return Err(ProviderError::Transient(
                "connection reset after deploy was sent".to_string(),
            ));
        }
        Ok(DeploymentEvent::new(
            build_id.clone(),
            Phase::Deploy,
            mapper::map(&receipt.status),
        )
        .with_external_id(receipt.external_id.clone())
        .with_deployment_id(Some(request.deployment_id().to_string()))
        .with_resource_id("deploy", receipt.external_id)
        .with_resource_id("build", build.external_id.clone()))
    }

    async fn stream_events(&self, options: StreamOptions) -> Result<EventStream, ProviderError> {
        let mut state = self.lock();
        let op = state
            .operations
            .get_mut(&options.external_id)
            .ok_or_else(|| {
                ProviderError::Permanent {
                    status: 404,
                    body: format!("unknown operation {}", options.external_id),
                }
            })?;

        let mut statuses = Vec::new();
        while op.pos + 1 < op.script.len() {
            statuses.push(op.step());
        }
        let op = op.clone();
        drop(state);

        let events: Vec<_> = statuses
            .into_iter()
            .map(|status| Ok(self.event(&options.external_id, &op, status)))
            .collect();
        Ok(Box::pin(stream::iter(events)))
    }

    async fn status(&self, external_id: &str) -> Result<ProviderEvent, ProviderError> {
        let mut state = self.lock();
        let op = state
            .operations
            .get_mut(external_id)
            .ok_or_else(|| ProviderError::Permanent {
                status: 404,
                body: format!("unknown operation {}", external_id),
            })?;
        let status = op.step();
        let op = op.clone();
        drop(state);
        Ok(self.event(external_id, &op, status))
    }

    async fn find_submission(
        &self,
        build_id: &BuildId,
        phase: Phase,
    ) -> Result<Option<SubmitReceipt>, ProviderError> {
        let state = self.lock();
        Ok(state
            .operations
            .iter()
            .find(|(_, op)| &op.build_id == build_id && op.phase == phase)
            .map(|(id, op)| SubmitReceipt {
                external_id: id.clone(),
                status: op.current(),
            }))
    }

    fn parse_notification(
        &self,
        payload: &serde_json::Value,
    ) -> Result<ProviderEvent, ProviderError> {
        parse_build_payload(payload)
    }
}
