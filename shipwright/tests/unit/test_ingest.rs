//! Ingestion endpoint tests

use std::sync::Arc;

use axum::http::StatusCode;
use chrono::Utc;
use ingest_api::{
    EventContext, HealthResponse, IngestOutcome, IngestResponse, RelayedEvent, StatusResponse,
};
use provider_api::BuildStatus;
use tower::ServiceExt;

use shipwright::models::request::DEFAULT_ROOT_DIR;
use shipwright::models::{BuildId, WorkflowRequest};
use shipwright::provider::FakeDriver;
use shipwright::server::serve::{router, INGEST_PATH};
use shipwright::status::{DeploymentStatus, Phase};

use crate::support::{
    basic_auth, body_json, build_request, deploy_request, get, orchestrator, post_json,
    server_state, PASSWORD, USERNAME,
};

fn relayed(event_id: &str, build: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&RelayedEvent {
        context: EventContext {
            event_id: event_id.to_string(),
            timestamp: Utc::now(),
            event_type: Some("BUILD".to_string()),
            resource: None,
        },
        attributes: Default::default(),
        build,
    })
    .unwrap()
}

#[tokio::test]
async fn test_redelivered_success_is_recorded_once() {
    let driver = Arc::new(FakeDriver::new());
    let orchestrator = orchestrator(driver.clone());
    let checkpoint = orchestrator
        .start(build_request("b-c").into())
        .await
        .unwrap();
    let external_id = checkpoint.build_external_id.unwrap();
    let payload = driver
        .notification_with_status(&external_id, BuildStatus::Success)
        .unwrap();

    let app = router(server_state(orchestrator.clone()));
    let mut outcomes = Vec::new();
    for attempt in 0..3 {
        let response = app
            .clone()
            .oneshot(post_json(
                INGEST_PATH,
                Some(basic_auth(USERNAME, PASSWORD)),
                relayed(&format!("msg-{attempt}"), payload.clone()),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: IngestResponse = body_json(response).await;
        outcomes.push(body.outcome);
    }
    assert_eq!(
        outcomes,
        vec![
            IngestOutcome::Applied,
            IngestOutcome::Duplicate,
            IngestOutcome::Duplicate
        ]
    );

    let events = orchestrator.events(&BuildId::from("b-c")).await.unwrap();
    let ready = events
        .iter()
        .filter(|e| e.phase == Phase::Build && e.status == DeploymentStatus::Ready)
        .count();
    assert_eq!(ready, 1);
}

#[tokio::test]
async fn test_wrong_credentials_are_rejected_without_side_effects() {
    let driver = Arc::new(FakeDriver::new());
    let orchestrator = orchestrator(driver.clone());
    let checkpoint = orchestrator
        .start(build_request("b-e").into())
        .await
        .unwrap();
    let external_id = checkpoint.build_external_id.unwrap();
    let before = orchestrator.events(&BuildId::from("b-e")).await.unwrap().len();

    let app = router(server_state(orchestrator.clone()));
    let payload = driver
        .notification_with_status(&external_id, BuildStatus::Success)
        .unwrap();

    for authorization in [
        None,
        Some(basic_auth(USERNAME, "wrong")),
        Some(basic_auth("intruder", PASSWORD)),
        Some("Bearer token".to_string()),
    ] {
        let response = app
            .clone()
            .oneshot(post_json(INGEST_PATH, authorization, relayed("m", payload.clone())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let after = orchestrator.events(&BuildId::from("b-e")).await.unwrap().len();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_malformed_events_are_bad_requests() {
    let orchestrator = orchestrator(Arc::new(FakeDriver::new()));
    let app = router(server_state(orchestrator));
    let auth = || Some(basic_auth(USERNAME, PASSWORD));

    let response = app
        .clone()
        .oneshot(post_json(INGEST_PATH, auth(), b"not json".to_vec()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(post_json(
            INGEST_PATH,
            auth(),
            relayed("m", serde_json::json!({"id": "op-1"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(post_json(
            INGEST_PATH,
            auth(),
            relayed("m", serde_json::json!({"status": "SUCCESS"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_operation_is_acknowledged_and_ignored() {
    let orchestrator = orchestrator(Arc::new(FakeDriver::new()));
    let app = router(server_state(orchestrator));

    let response = app
        .oneshot(post_json(
            INGEST_PATH,
            Some(basic_auth(USERNAME, PASSWORD)),
            relayed("m", serde_json::json!({"id": "op-elsewhere", "status": "SUCCESS"})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: IngestResponse = body_json(response).await;
    assert_eq!(body.outcome, IngestOutcome::Ignored);
}

#[tokio::test]
async fn test_status_and_events_routes() {
    let driver = Arc::new(FakeDriver::new());
    let orchestrator = orchestrator(driver);
    orchestrator
        .run(deploy_request("b-status").into())
        .await
        .unwrap();
    let app = router(server_state(orchestrator));

    let response = app
        .clone()
        .oneshot(get("/builds/b-status/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status: StatusResponse = body_json(response).await;
    assert_eq!(status.stage, "deploy_succeeded");
    assert_eq!(status.deployment_id.as_deref(), Some("dep-b-status"));
    assert_eq!(status.build.map(|b| b.status), Some("READY".to_string()));
    assert_eq!(status.deploy.map(|d| d.status), Some("READY".to_string()));

    let response = app
        .clone()
        .oneshot(get("/builds/b-status/events"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let events: Vec<serde_json::Value> = body_json(response).await;
    assert!(events.len() >= 4);

    let response = app.oneshot(get("/builds/missing/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_route() {
    let app = router(server_state(orchestrator(Arc::new(FakeDriver::new()))));
    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let health: HealthResponse = body_json(response).await;
    assert_eq!(health.service, "shipwright");
}

#[tokio::test]
async fn test_trigger_requires_credentials_and_a_valid_request() {
    let driver = Arc::new(FakeDriver::new());
    let orchestrator = orchestrator(driver.clone());
    let app = router(server_state(orchestrator.clone()));
    let request = serde_json::to_vec(&WorkflowRequest::from(build_request("b-trigger"))).unwrap();

    let response = app
        .clone()
        .oneshot(post_json("/builds", None, request.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(driver.submit_calls(), 0);

    let response = app
        .clone()
        .oneshot(post_json(
            "/builds",
            Some(basic_auth(USERNAME, PASSWORD)),
            b"{\"kind\":\"build\"}".to_vec(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(post_json("/builds", Some(basic_auth(USERNAME, PASSWORD)), request))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let status: StatusResponse = body_json(response).await;
    assert_eq!(status.build_id, "b-trigger");
    assert_eq!(driver.submit_count(), 1);
}

#[tokio::test]
async fn test_trigger_fills_in_request_defaults() {
    let driver = Arc::new(FakeDriver::new());
    let orchestrator = orchestrator(driver.clone());
    let app = router(server_state(orchestrator.clone()));
    let body = serde_json::json!({
        "kind": "build",
        "build_id": "b-minimal",
        "org_id": "org-1",
        "member": {"id": "member-1", "role": "admin"},
        "server_id": "server-1",
        "source": {
            "kind": "repository",
            "repo_url": "https://github.com/acme/mcp-server",
            "git_ref": "main"
        }
    });

    let response = app
        .oneshot(post_json(
            "/builds",
            Some(basic_auth(USERNAME, PASSWORD)),
            serde_json::to_vec(&body).unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(driver.submit_count(), 1);

    let checkpoint = orchestrator
        .checkpoint(&BuildId::from("b-minimal"))
        .await
        .unwrap()
        .unwrap();
    let request = checkpoint.request.build();
    assert_eq!(request.root_dir(), DEFAULT_ROOT_DIR);
    assert!(request.env().is_empty());
    assert_eq!(request.config_hash().len(), 64);
}
