//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::{AppOptions, ProviderOptions};
use crate::errors::AppError;
use crate::orchestrator::Orchestrator;
use crate::provider::{CloudBuildDriver, FakeDriver, ProviderDriver};
use crate::store::{DiskCheckpointStore, DiskEventLog};

/// Main application state
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// Open the durable stores and build the orchestrator
    pub async fn init(options: &AppOptions) -> Result<Self, AppError> {
        info!("Initializing application state...");

        let layout = &options.layout;
        layout.setup().await?;

        let events = Arc::new(DiskEventLog::new(layout.events_dir()));
        let checkpoints = Arc::new(DiskCheckpointStore::open(layout.checkpoints_dir()).await?);

        let driver: Arc<dyn ProviderDriver> = match &options.provider {
            ProviderOptions::CloudBuild { config, retry } => {
                Arc::new(CloudBuildDriver::new(config.clone(), retry.clone())?)
            }
            ProviderOptions::Fake => Arc::new(FakeDriver::new()),
        };
        info!("Using provider driver '{}'", driver.name());

        let orchestrator = Arc::new(Orchestrator::new(
            driver,
            events,
            checkpoints,
            options.orchestrator.clone(),
        ));

        Ok(Self { orchestrator })
    }
}
