//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions, RelayOptions};
use crate::app::state::AppState;
use crate::errors::AppError;
use crate::http::client::{Auth, HttpClient};
use crate::relay::serve::{serve as serve_relay, RelayState};
use crate::server::serve::{serve, INGEST_PATH};
use crate::server::state::ServerState;
use crate::workers::resumer;

/// Run the orchestration service: ingestion server plus resume worker
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AppError> {
    info!("Initializing shipwright...");

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

/// Run the stateless event relay
pub async fn run_relay(
    options: RelayOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AppError> {
    info!("Initializing event relay...");

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    let client = HttpClient::new(
        &options.ingestion_url,
        Auth::Basic {
            username: options.credentials.username.clone(),
            password: options.credentials.password.clone(),
        },
        options.request_timeout,
    )?;
    let state = Arc::new(RelayState {
        client,
        ingest_path: INGEST_PATH.to_string(),
    });

    let mut shutdown_rx = shutdown_tx.subscribe();
    let handle = serve_relay(&options.server, state, async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;
    shutdown_manager.with_server_handle(handle)?;

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), AppError> {
    let app_state = AppState::init(options).await?;

    init_server(
        options,
        &app_state,
        shutdown_manager,
        shutdown_tx.subscribe(),
    )
    .await?;

    init_resume_worker(
        options.resumer.clone(),
        &app_state,
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    Ok(())
}

async fn init_server(
    options: &AppOptions,
    app_state: &AppState,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AppError> {
    info!("Initializing ingestion server...");

    let server_state = ServerState::new(
        app_state.orchestrator.clone(),
        options.credentials.clone(),
    );

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)
}

fn init_resume_worker(
    options: resumer::Options,
    app_state: &AppState,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), AppError> {
    info!("Initializing resume worker...");

    let orchestrator = app_state.orchestrator.clone();

    let handle = tokio::spawn(async move {
        resumer::run(
            &options,
            orchestrator,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_resume_worker_handle(handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    server_handle: Option<JoinHandle<Result<(), AppError>>>,
    resume_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            server_handle: None,
            resume_worker_handle: None,
        }
    }

    pub fn with_resume_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), AppError> {
        if self.resume_worker_handle.is_some() {
            return Err(AppError::ShutdownError("resume_worker_handle already set".to_string()));
        }
        self.resume_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), AppError>>,
    ) -> Result<(), AppError> {
        if self.server_handle.is_some() {
            return Err(AppError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), AppError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), AppError> {
        info!("Shutting down...");

        // 1. Resume worker; in-flight workflows stay checkpointed
        if let Some(handle) = self.resume_worker_handle.take() {
            handle.await.map_err(|e| AppError::ShutdownError(e.to_string()))?;
        }

        // 2. HTTP server
        if let Some(handle) = self.server_handle.take() {
            handle.await.map_err(|e| AppError::ShutdownError(e.to_string()))??;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
