//! Error types for the orchestration core

use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("Provider error: {0}")]
    ProviderError(#[from] ProviderError),

    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Orchestrator error: {0}")]
    OrchestratorError(#[from] OrchestratorError),

    #[error("Relay error: {0}")]
    RelayError(#[from] RelayError),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// A build or deployment request failed validation before submission
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid repository url '{url}': {reason}")]
    InvalidRepoUrl { url: String, reason: String },

    #[error("invalid env entry name '{0}'")]
    InvalidEnvName(String),

    #[error("duplicate env entry '{0}'")]
    DuplicateEnv(String),

    #[error("root directory must be relative and stay inside the source tree: '{0}'")]
    InvalidRootDir(String),
}

/// Errors raised by a provider driver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Timeouts, connection failures, throttling and 5xx responses
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// 4xx responses other than throttling
    #[error("provider rejected request ({status}): {body}")]
    Permanent { status: u16, body: String },

    /// The caller broke the driver contract
    #[error("precondition violated: {0}")]
    Precondition(String),

    #[error("failed to decode provider response: {0}")]
    Decode(String),

    #[error("provider misconfigured: {0}")]
    Config(String),
}

impl ProviderError {
    /// Only transient failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    /// Classify an HTTP status code returned by the provider
    pub fn from_status(status: u16, body: String) -> Self {
        if status == 429 || status == 408 || status >= 500 {
            ProviderError::Transient(format!("{}: {}", status, body))
        } else {
            ProviderError::Permanent { status, body }
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return ProviderError::Decode(err.to_string());
        }
        if let Some(status) = err.status() {
            return ProviderError::from_status(status.as_u16(), err.to_string());
        }
        if err.is_builder() {
            return ProviderError::Config(err.to_string());
        }
        // timeouts, connect failures and broken bodies
        ProviderError::Transient(err.to_string())
    }
}

/// Errors raised by the durable stores
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt record in {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while driving a workflow
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("build submission failed: {0}")]
    Submit(ProviderError),

    #[error("deploy submission failed: {0}")]
    Deploy(ProviderError),

    #[error("provider error: {0}")]
    Provider(ProviderError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("timed out waiting for {phase} of build {build_id}")]
    Timeout { build_id: String, phase: String },

    #[error("checkpoint for build {build_id} belongs to a different request")]
    RequestMismatch { build_id: String },

    #[error("provider {provider} cannot deploy; build {build_id} requests a deployment")]
    DeployUnsupported {
        build_id: String,
        provider: &'static str,
    },
}

/// Errors raised by the event relay
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("failed to decode notification payload: {0}")]
    Decode(String),

    #[error("ingestion endpoint rejected event ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("failed to reach ingestion endpoint: {0}")]
    Transport(#[from] reqwest::Error),
}
