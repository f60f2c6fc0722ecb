//! Relay tests

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ingest_api::{PushEnvelope, PushMessage};
use provider_api::BuildStatus;
use secrecy::SecretString;
use tokio::net::TcpListener;
use tower::ServiceExt;

use shipwright::errors::RelayError;
use shipwright::http::client::{Auth, HttpClient};
use shipwright::models::BuildId;
use shipwright::orchestrator::Orchestrator;
use shipwright::provider::FakeDriver;
use shipwright::relay::serve::{router as relay_router, RelayState};
use shipwright::relay::{relay_notification, RelayOutcome};
use shipwright::server::serve::{router, INGEST_PATH};
use shipwright::status::{DeploymentStatus, Phase};

use crate::support::{build_request, orchestrator, post_json, server_state, PASSWORD, USERNAME};

fn envelope(data: Option<String>) -> PushEnvelope {
    PushEnvelope {
        message: PushMessage {
            data,
            message_id: "msg-1".to_string(),
            attributes: [("eventType".to_string(), "BUILD".to_string())]
                .into_iter()
                .collect(),
            publish_time: None,
        },
        subscription: Some("projects/p/subscriptions/build-events".to_string()),
    }
}

fn encoded(payload: &serde_json::Value) -> String {
    STANDARD.encode(serde_json::to_vec(payload).unwrap())
}

fn client(base_url: &str, password: &str) -> HttpClient {
    HttpClient::new(
        base_url,
        Auth::Basic {
            username: USERNAME.to_string(),
            password: SecretString::from(password.to_string()),
        },
        Duration::from_secs(5),
    )
    .unwrap()
}

async fn spawn_ingestion(orchestrator: Arc<Orchestrator>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(server_state(orchestrator));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_empty_delivery_is_skipped_without_forwarding() {
    // nothing listens here; a forward attempt would fail
    let client = client("http://127.0.0.1:9", PASSWORD);

    for data in [None, Some(String::new()), Some("   ".to_string())] {
        let outcome = relay_notification(&client, INGEST_PATH, &envelope(data))
            .await
            .unwrap();
        assert_eq!(outcome, RelayOutcome::Skipped);
    }
}

#[tokio::test]
async fn test_undecodable_delivery_fails() {
    let client = client("http://127.0.0.1:9", PASSWORD);

    let err = relay_notification(&client, INGEST_PATH, &envelope(Some("%%%".to_string())))
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::Decode(_)));

    let not_json = STANDARD.encode(b"plain text");
    let err = relay_notification(&client, INGEST_PATH, &envelope(Some(not_json)))
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::Decode(_)));
}

#[tokio::test]
async fn test_delivery_is_forwarded_and_recorded() {
    let driver = Arc::new(FakeDriver::new());
    let orchestrator = orchestrator(driver.clone());
    let checkpoint = orchestrator
        .start(build_request("b-relay").into())
        .await
        .unwrap();
    let external_id = checkpoint.build_external_id.unwrap();
    let addr = spawn_ingestion(orchestrator.clone()).await;

    let payload = driver
        .notification_with_status(&external_id, BuildStatus::Success)
        .unwrap();
    let client = client(&format!("http://{addr}"), PASSWORD);
    let outcome = relay_notification(&client, INGEST_PATH, &envelope(Some(encoded(&payload))))
        .await
        .unwrap();
    assert_eq!(outcome, RelayOutcome::Forwarded);

    assert_eq!(
        orchestrator
            .current_status(&BuildId::from("b-relay"), Phase::Build)
            .await
            .unwrap(),
        Some(DeploymentStatus::Ready)
    );
}

#[tokio::test]
async fn test_rejected_forward_fails_the_delivery() {
    let driver = Arc::new(FakeDriver::new());
    let orchestrator = orchestrator(driver.clone());
    let checkpoint = orchestrator
        .start(build_request("b-relay-401").into())
        .await
        .unwrap();
    let external_id = checkpoint.build_external_id.unwrap();
    let addr = spawn_ingestion(orchestrator).await;

    let payload = driver.notification(&external_id).unwrap();
    let client = client(&format!("http://{addr}"), "wrong-password");
    let err = relay_notification(&client, INGEST_PATH, &envelope(Some(encoded(&payload))))
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::Rejected { status: 401, .. }));
}

#[tokio::test]
async fn test_push_endpoint_status_codes() {
    let state = Arc::new(RelayState {
        client: client("http://127.0.0.1:9", PASSWORD),
        ingest_path: INGEST_PATH.to_string(),
    });
    let app = relay_router(state);

    let response = app
        .clone()
        .oneshot(post_json("/", None, b"{".to_vec()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = serde_json::to_vec(&envelope(None)).unwrap();
    let response = app.clone().oneshot(post_json("/", None, body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // unreachable ingestion endpoint; the push system must redeliver
    let payload = serde_json::json!({"id": "op-1", "status": "WORKING"});
    let body = serde_json::to_vec(&envelope(Some(encoded(&payload)))).unwrap();
    let response = app.oneshot(post_json("/", None, body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
