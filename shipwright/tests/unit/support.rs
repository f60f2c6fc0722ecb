//! Shared fixtures
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request};
use axum::response::Response;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::DeserializeOwned;

use shipwright::models::{
    BuildRequest, DeploymentRequest, DeploymentTarget, EnvEntry, Member, MemberRole,
    RepositorySource, Source,
};
use shipwright::orchestrator::{Orchestrator, OrchestratorOptions};
use shipwright::provider::FakeDriver;
use shipwright::server::auth::Credentials;
use shipwright::server::state::ServerState;
use shipwright::store::{MemoryCheckpointStore, MemoryEventLog};

pub const USERNAME: &str = "relay";
pub const PASSWORD: &str = "s3cret";

pub fn member() -> Member {
    Member {
        id: "member-1".to_string(),
        role: MemberRole::Admin,
    }
}

pub fn build_request(build_id: &str) -> BuildRequest {
    BuildRequest::builder(
        "org-1",
        member(),
        "server-1",
        Source::Repository(RepositorySource {
            repo_url: "https://github.com/acme/mcp-server".to_string(),
            git_ref: "main".to_string(),
            commit_hash: Some("0f3c2a1".to_string()),
            github_app_id: Some(11),
            installation_id: Some(22),
        }),
    )
    .build_id(build_id)
    .env(EnvEntry::plain("PORT", "8080"))
    .env(EnvEntry::secret("API_TOKEN", "tok-123"))
    .build()
    .unwrap()
}

pub fn deploy_request(build_id: &str) -> DeploymentRequest {
    DeploymentRequest::new(
        format!("dep-{build_id}"),
        DeploymentTarget::Production,
        "acme-server",
        build_request(build_id),
    )
    .unwrap()
}

pub fn fast_options() -> OrchestratorOptions {
    OrchestratorOptions {
        poll_interval: Duration::from_millis(5),
        phase_timeout: Duration::from_secs(5),
    }
}

pub fn orchestrator(driver: Arc<FakeDriver>) -> Arc<Orchestrator> {
    orchestrator_with(driver, fast_options())
}

pub fn orchestrator_with(driver: Arc<FakeDriver>, options: OrchestratorOptions) -> Arc<Orchestrator> {
    Arc::new(Orchestrator::new(
        driver,
        Arc::new(MemoryEventLog::new()),
        Arc::new(MemoryCheckpointStore::new()),
        options,
    ))
}

pub fn server_state(orchestrator: Arc<Orchestrator>) -> Arc<ServerState> {
    Arc::new(ServerState::new(
        orchestrator,
        Credentials::new(USERNAME, PASSWORD),
    ))
}

pub fn basic_auth(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}

pub fn post_json(uri: &str, authorization: Option<String>, body: Vec<u8>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(authorization) = authorization {
        builder = builder.header(header::AUTHORIZATION, authorization);
    }
    builder.body(Body::from(body)).unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn body_json<T: DeserializeOwned>(response: Response) -> T {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
