//! Resume worker
//!
//! Re-drives every unfinished workflow on startup and then periodically, so
//! a workflow interrupted by a crash or a transient provider failure picks
//! up where its checkpoint left off.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::errors::StoreError;
use crate::orchestrator::Orchestrator;

/// Resume worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Interval between passes
    pub interval: Duration,

    /// Delay before the first pass
    pub initial_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            initial_delay: Duration::from_secs(1),
        }
    }
}

/// Run the resume worker
pub async fn run<S, F>(
    options: &Options,
    orchestrator: Arc<Orchestrator>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Resume worker starting...");

    tokio::select! {
        _ = &mut shutdown_signal => {
            info!("Resume worker shutting down...");
            return;
        }
        _ = sleep_fn(options.initial_delay) => {}
    }

    loop {
        match resume_unfinished(&orchestrator).await {
            Ok(count) => debug!("Resume pass dispatched {} workflows", count),
            Err(e) => error!("Resume pass failed: {}", e),
        }

        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Resume worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }
    }
}

/// Spawn a resume task for every unfinished workflow.
///
/// Workflows already being driven are skipped by the orchestrator.
pub async fn resume_unfinished(
    orchestrator: &Arc<Orchestrator>,
) -> Result<usize, StoreError> {
    let unfinished = orchestrator.unfinished().await?;
    let count = unfinished.len();

    for checkpoint in unfinished {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            let build_id = checkpoint.build_id.clone();
            match orchestrator.resume(checkpoint).await {
                Ok(Some(outcome)) => info!("Resumed build {} ended: {:?}", build_id, outcome),
                Ok(None) => {}
                Err(e) => warn!("Resumed build {} stopped: {}", build_id, e),
            }
        });
    }

    Ok(count)
}
