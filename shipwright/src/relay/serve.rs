//! Push endpoint of the relay

use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Bytes, extract::State, http::StatusCode, response::IntoResponse, routing::post, Json,
    Router,
};
use ingest_api::{ErrorResponse, PushEnvelope};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::app::options::ServerOptions;
use crate::errors::AppError;
use crate::http::client::HttpClient;
use crate::relay::forward::relay_notification;

/// Relay state shared across requests
pub struct RelayState {
    pub client: HttpClient,
    pub ingest_path: String,
}

/// Handle one push delivery.
///
/// Any failure answers 500 so the push system redelivers the message.
pub async fn push_handler(State(state): State<Arc<RelayState>>, body: Bytes) -> impl IntoResponse {
    let envelope: PushEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Malformed push envelope: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "malformed_envelope".to_string(),
                    message: e.to_string(),
                }),
            )
                .into_response();
        }
    };

    match relay_notification(&state.client, &state.ingest_path, &envelope).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "relay_failed".to_string(),
                message: e.to_string(),
            }),
        )
            .into_response(),
    }
}

pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/", post(push_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the relay server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<RelayState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), AppError>>, AppError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting relay on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| AppError::ServerError(e.to_string()))
    });

    Ok(handle)
}
