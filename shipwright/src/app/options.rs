//! Application configuration options

use std::time::Duration;

use crate::errors::AppError;
use crate::orchestrator::OrchestratorOptions;
use crate::provider::{CloudBuildConfig, RetryPolicy};
use crate::server::auth::Credentials;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{ProviderKind, Settings};
use crate::workers::resumer;

/// Which provider backend to drive
#[derive(Debug, Clone)]
pub enum ProviderOptions {
    CloudBuild {
        config: CloudBuildConfig,
        retry: RetryPolicy,
    },
    Fake,
}

/// Options of the orchestration service
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout
    pub layout: StorageLayout,

    /// Ingestion server configuration
    pub server: ServerOptions,

    /// Credentials the relay presents
    pub credentials: Credentials,

    pub provider: ProviderOptions,

    pub orchestrator: OrchestratorOptions,

    /// Resume worker options
    pub resumer: resumer::Options,
}

impl AppOptions {
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Result<Self, AppError> {
        let provider = match settings.provider.kind {
            ProviderKind::CloudBuild => ProviderOptions::CloudBuild {
                config: settings.provider.cloud_build_config()?,
                retry: settings.orchestrator.retry_policy(),
            },
            ProviderKind::Fake => ProviderOptions::Fake,
        };

        Ok(Self {
            lifecycle: LifecycleOptions::default(),
            layout,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            credentials: Credentials {
                username: settings.ingestion.username.clone(),
                password: settings.ingestion.password.clone(),
            },
            provider,
            orchestrator: settings.orchestrator.options(),
            resumer: resumer::Options {
                interval: Duration::from_secs(settings.orchestrator.resume_interval_secs.max(1)),
                ..Default::default()
            },
        })
    }
}

/// Options of the event relay
#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub lifecycle: LifecycleOptions,

    /// Push endpoint configuration
    pub server: ServerOptions,

    /// Base URL of the ingestion service
    pub ingestion_url: String,

    pub credentials: Credentials,

    pub request_timeout: Duration,
}

impl RelayOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            server: ServerOptions {
                host: settings.relay.host.clone(),
                port: settings.relay.port,
            },
            ingestion_url: settings.relay.ingestion_url.clone(),
            credentials: Credentials {
                username: settings.relay.username.clone(),
                password: settings.relay.password.clone(),
            },
            request_timeout: Duration::from_secs(settings.provider.request_timeout_secs),
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}
