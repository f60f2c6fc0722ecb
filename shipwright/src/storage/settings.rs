//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use tracing::info;

use crate::errors::AppError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::orchestrator::OrchestratorOptions;
use crate::provider::{CloudBuildConfig, RetryPolicy};
use crate::utils::CooldownOptions;

fn secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

fn empty_secret() -> SecretString {
    SecretString::from(String::new())
}

/// Service settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON logs on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Also write rotated log files under the storage logs directory
    #[serde(default)]
    pub log_to_file: bool,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub ingestion: IngestionSettings,

    #[serde(default)]
    pub provider: ProviderSettings,

    #[serde(default)]
    pub relay: RelaySettings,

    #[serde(default)]
    pub orchestrator: OrchestratorSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl Settings {
    /// Read settings from `file`, falling back to defaults when it is missing
    pub async fn load(file: &File) -> Result<Self, AppError> {
        if !file.exists().await {
            info!(
                "No settings file at {}, using defaults",
                file.path().display()
            );
            return Ok(Self::default());
        }
        Ok(file.read_json().await?)
    }
}

/// Ingestion server settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_server_port(),
        }
    }
}

/// Credentials the relay must present to the ingestion endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct IngestionSettings {
    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default = "empty_secret", deserialize_with = "secret")]
    pub password: SecretString,
}

fn default_username() -> String {
    "relay".to_string()
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            username: default_username(),
            password: empty_secret(),
        }
    }
}

/// Which provider backend drives builds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    CloudBuild,

    /// Scripted in-process driver for dry runs
    Fake,
}

/// Build provider settings
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub kind: ProviderKind,

    #[serde(default = "default_provider_url")]
    pub base_url: String,

    #[serde(default)]
    pub project_id: String,

    #[serde(default = "default_location")]
    pub location: String,

    #[serde(default = "empty_secret", deserialize_with = "secret")]
    pub access_token: SecretString,

    #[serde(default)]
    pub image_registry: String,

    #[serde(default)]
    pub artifact_bucket: String,

    #[serde(default = "default_builder_image")]
    pub builder_image: String,

    #[serde(default = "default_deploy_image")]
    pub deploy_image: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Provider-side timeout of one build
    #[serde(default = "default_build_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_provider_url() -> String {
    "https://cloudbuild.googleapis.com".to_string()
}

fn default_location() -> String {
    "global".to_string()
}

fn default_builder_image() -> String {
    "gcr.io/cloud-builders/docker".to_string()
}

fn default_deploy_image() -> String {
    "gcr.io/google.com/cloudsdktool/cloud-sdk".to_string()
}

fn default_region() -> String {
    "us-central1".to_string()
}

fn default_build_timeout() -> u64 {
    1200
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            base_url: default_provider_url(),
            project_id: String::new(),
            location: default_location(),
            access_token: empty_secret(),
            image_registry: String::new(),
            artifact_bucket: String::new(),
            builder_image: default_builder_image(),
            deploy_image: default_deploy_image(),
            region: default_region(),
            timeout_secs: default_build_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ProviderSettings {
    pub fn cloud_build_config(&self) -> Result<CloudBuildConfig, AppError> {
        if self.project_id.is_empty() {
            return Err(AppError::ConfigError(
                "provider.project_id is required".to_string(),
            ));
        }
        let image_registry = if self.image_registry.is_empty() {
            format!("gcr.io/{}", self.project_id)
        } else {
            self.image_registry.clone()
        };

        Ok(CloudBuildConfig {
            base_url: self.base_url.clone(),
            project_id: self.project_id.clone(),
            location: self.location.clone(),
            access_token: self.access_token.clone(),
            image_registry,
            artifact_bucket: self.artifact_bucket.clone(),
            builder_image: self.builder_image.clone(),
            deploy_image: self.deploy_image.clone(),
            region: self.region.clone(),
            build_timeout: Duration::from_secs(self.timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        })
    }
}

/// Relay settings
#[derive(Debug, Clone, Deserialize)]
pub struct RelaySettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_relay_port")]
    pub port: u16,

    /// Base URL of the ingestion service
    #[serde(default = "default_ingestion_url")]
    pub ingestion_url: String,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default = "empty_secret", deserialize_with = "secret")]
    pub password: SecretString,
}

fn default_relay_port() -> u16 {
    8081
}

fn default_ingestion_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_relay_port(),
            ingestion_url: default_ingestion_url(),
            username: default_username(),
            password: empty_secret(),
        }
    }
}

/// Workflow settings
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSettings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_phase_timeout")]
    pub phase_timeout_secs: u64,

    #[serde(default = "default_resume_interval")]
    pub resume_interval_secs: u64,

    /// Attempts per provider call for transient failures
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

fn default_poll_interval() -> u64 {
    10
}

fn default_phase_timeout() -> u64 {
    3600
}

fn default_resume_interval() -> u64 {
    60
}

fn default_retry_attempts() -> u32 {
    4
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            phase_timeout_secs: default_phase_timeout(),
            resume_interval_secs: default_resume_interval(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

impl OrchestratorSettings {
    pub fn options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            phase_timeout: Duration::from_secs(self.phase_timeout_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            cooldown: CooldownOptions::default(),
        }
    }
}

/// Storage settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageSettings {
    /// Overrides the platform default base directory
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
}
