//! Cloud Build driver
//!
//! Submits builds through the provider's REST API. The provider has no
//! request-level idempotency token, so submissions are tagged with the build
//! id and the orchestrator guards against double submission; the tag lets
//! [`ProviderDriver::find_submission`] recover a submission whose response
//! was lost.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream;
use provider_api::{
    Build, BuildOperation, BuildSource, BuildStatus, BuildStep, GitSource, ListBuildsResponse,
    SecretManagerSecret, Secrets, StorageSource,
};
use secrecy::SecretString;
use tracing::{debug, info, warn};

use crate::errors::ProviderError;
use crate::http::client::{Auth, HttpClient};
use crate::models::event::DeploymentEvent;
use crate::models::request::{
    BuildId, BuildRequest, DeploymentRequest, DeploymentTarget, EnvEntry, Source,
};
use crate::provider::backoff::RetryPolicy;
use crate::provider::driver::{
    ensure_deployable, BuildReceipt, Capabilities, EventStream, ProviderDriver, ProviderEvent,
    StreamOptions, SubmitReceipt,
};
use crate::status::{mapper, Phase};
use crate::utils::sha256_hash;

/// Substitution carrying our build id through the provider
pub const BUILD_ID_SUBSTITUTION: &str = "_BUILD_ID";
pub const DEPLOYMENT_ID_SUBSTITUTION: &str = "_DEPLOYMENT_ID";
pub const BUILD_TAG_PREFIX: &str = "build-id-";
pub const DEPLOY_TAG: &str = "phase-deploy";

/// Cloud Build driver configuration
#[derive(Debug, Clone)]
pub struct CloudBuildConfig {
    pub base_url: String,
    pub project_id: String,
    pub location: String,
    pub access_token: SecretString,

    /// Registry images are pushed to, e.g. `us-docker.pkg.dev/proj/servers`
    pub image_registry: String,

    /// Bucket holding artifacts staged through the upload boundary
    pub artifact_bucket: String,

    /// Step image that builds container images
    pub builder_image: String,

    /// Step image that runs the deploy tool
    pub deploy_image: String,

    /// Region services are deployed to
    pub region: String,

    /// Provider-side timeout of one build
    pub build_timeout: Duration,

    /// Per-request HTTP timeout
    pub request_timeout: Duration,
}

/// Driver for the Cloud Build REST API
#[derive(Debug, Clone)]
pub struct CloudBuildDriver {
    http: HttpClient,
    config: CloudBuildConfig,
    retry: RetryPolicy,
}

impl CloudBuildDriver {
    pub fn new(config: CloudBuildConfig, retry: RetryPolicy) -> Result<Self, ProviderError> {
        let http = HttpClient::new(
            &config.base_url,
            Auth::Bearer(config.access_token.clone()),
            config.request_timeout,
        )
        .map_err(|e| ProviderError::Config(e.to_string()))?;

        Ok(Self {
            http,
            config,
            retry,
        })
    }

    fn builds_path(&self) -> String {
        format!(
            "/v1/projects/{}/locations/{}/builds",
            self.config.project_id, self.config.location
        )
    }

    fn image_for(&self, request: &BuildRequest) -> String {
        format!(
            "{}/{}:{}",
            self.config.image_registry.trim_end_matches('/'),
            request.server_id(),
            build_tag(request.build_id()),
        )
    }

    fn secret_version(&self, request: &BuildRequest, entry: &EnvEntry) -> String {
        format!(
            "projects/{}/secrets/{}_{}/versions/latest",
            self.config.project_id,
            sanitize(request.server_id()),
            entry.name
        )
    }

    /// Provider build resource for the image build
    pub fn build_spec(&self, request: &BuildRequest) -> Build {
        let image = self.image_for(request);

        let source = match request.source() {
            Source::Repository(repo) => BuildSource::GitSource(GitSource {
                url: repo.repo_url.clone(),
                dir: None,
                revision: Some(
                    repo.commit_hash
                        .clone()
                        .unwrap_or_else(|| repo.git_ref.clone()),
                ),
            }),
            Source::Artifact { object_path } => BuildSource::StorageSource(StorageSource {
                bucket: self.config.artifact_bucket.clone(),
                object: object_path.clone(),
            }),
        };

        let env = request
            .env()
            .iter()
            .filter(|e| !e.secret)
            .map(|e| format!("{}={}", e.name, e.value))
            .collect();
        let secret_env: Vec<String> = request
            .env()
            .iter()
            .filter(|e| e.secret)
            .map(|e| e.name.clone())
            .collect();
        let available_secrets = (!secret_env.is_empty()).then(|| Secrets {
            secret_manager: request
                .env()
                .iter()
                .filter(|e| e.secret)
                .map(|e| SecretManagerSecret {
                    version_name: self.secret_version(request, e),
                    env: e.name.clone(),
                })
                .collect(),
        });

        let mut substitutions = BTreeMap::new();
        substitutions.insert(BUILD_ID_SUBSTITUTION.to_string(), request.build_id().to_string());
        substitutions.insert("_SERVER_ID".to_string(), request.server_id().to_string());
        substitutions.insert("_CONFIG_HASH".to_string(), request.config_hash().to_string());
        substitutions.insert("_ROOT_DIR".to_string(), request.root_dir().to_string());

        Build {
            source: Some(source),
            steps: vec![
                BuildStep {
                    name: self.config.builder_image.clone(),
                    id: Some("build".to_string()),
                    args: vec![
                        "build".to_string(),
                        "-t".to_string(),
                        image.clone(),
                        ".".to_string(),
                    ],
                    env,
                    secret_env,
                    dir: Some(request.root_dir().to_string()),
                    ..Default::default()
                },
                BuildStep {
                    name: self.config.builder_image.clone(),
                    id: Some("push".to_string()),
                    args: vec!["push".to_string(), image.clone()],
                    ..Default::default()
                },
            ],
            images: vec![image],
            tags: vec![
                build_tag(request.build_id()),
                format!("server-{}", sanitize(request.server_id())),
            ],
            substitutions,
            available_secrets,
            timeout: Some(format!("{}s", self.config.build_timeout.as_secs())),
            ..Default::default()
        }
    }

    /// Provider build resource for the deploy step
    pub fn deploy_spec(&self, request: &DeploymentRequest) -> Build {
        let build = request.build();
        let image = self.image_for(build);
        let service = format!("{}-{}", sanitize(build.server_id()), request.target().as_str());

        let mut args = vec![
            "run".to_string(),
            "deploy".to_string(),
            service,
            "--image".to_string(),
            image,
            "--region".to_string(),
            self.config.region.clone(),
            "--labels".to_string(),
            format!("deployment-id={}", sanitize(request.deployment_id())),
        ];
        if request.target() == DeploymentTarget::Preview {
            args.push("--no-traffic".to_string());
            args.push("--tag".to_string());
            args.push(format!("preview-{}", sanitize(request.public_id())));
        }

        let mut substitutions = BTreeMap::new();
        substitutions.insert(BUILD_ID_SUBSTITUTION.to_string(), build.build_id().to_string());
        substitutions.insert(
            DEPLOYMENT_ID_SUBSTITUTION.to_string(),
            request.deployment_id().to_string(),
        );

        Build {
            steps: vec![BuildStep {
                name: self.config.deploy_image.clone(),
                id: Some("deploy".to_string()),
                entrypoint: Some("gcloud".to_string()),
                args,
                ..Default::default()
            }],
            tags: vec![build_tag(build.build_id()), DEPLOY_TAG.to_string()],
            substitutions,
            timeout: Some(format!("{}s", self.config.build_timeout.as_secs())),
            ..Default::default()
        }
    }

    /// Create a build. Retries look up the build id's tag first, since a
    /// failed attempt may still have been accepted.
    async fn create(
        &self,
        spec: &Build,
        build_id: &BuildId,
        phase: Phase,
    ) -> Result<SubmitReceipt, ProviderError> {
        let path = self.builds_path();
        let path = path.as_str();
        let attempted = AtomicBool::new(false);
        let attempted = &attempted;

        self.retry
            .run("builds.create", move || async move {
                if attempted.swap(true, Ordering::SeqCst) {
                    if let Some(receipt) = self.find_submission(build_id, phase).await? {
                        warn!(
                            "Earlier {} attempt for build {} was accepted as {}",
                            phase, build_id, receipt.external_id
                        );
                        return Ok(receipt);
                    }
                }
                let operation: BuildOperation = self.http.post(path, spec).await?;
                receipt_from_operation(&operation)
            })
            .await
    }

    async fn fetch(&self, external_id: &str) -> Result<Build, ProviderError> {
        let path = format!("{}/{}", self.builds_path(), external_id);
        self.retry.run("builds.get", || self.http.get(&path)).await
    }
}

#[async_trait]
impl ProviderDriver for CloudBuildDriver {
    fn name(&self) -> &'static str {
        "cloud-build"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            idempotent_submit: false,
            deploy: true,
            stream: true,
        }
    }

    async fn submit(&self, request: &BuildRequest) -> Result<SubmitReceipt, ProviderError> {
        let receipt = self
            .create(&self.build_spec(request), request.build_id(), Phase::Build)
            .await?;
        info!(
            "Submitted build {} as provider build {} ({})",
            request.build_id(),
            receipt.external_id,
            receipt.status
        );
        Ok(receipt)
    }

    async fn deploy(
        &self,
        request: &DeploymentRequest,
        build: &BuildReceipt,
    ) -> Result<DeploymentEvent, ProviderError> {
        ensure_deployable(build)?;

        let receipt = self
            .create(
                &self.deploy_spec(request),
                request.build().build_id(),
                Phase::Deploy,
            )
            .await?;
        info!(
            "Submitted deploy {} for build {} as provider build {}",
            request.deployment_id(),
            request.build().build_id(),
            receipt.external_id
        );

        Ok(DeploymentEvent::new(
            request.build().build_id().clone(),
            Phase::Deploy,
            mapper::map(&receipt.status),
        )
        .with_external_id(receipt.external_id.clone())
        .with_deployment_id(Some(request.deployment_id().to_string()))
        .with_resource_id("deploy", receipt.external_id.clone())
        .with_resource_id("build", build.external_id.clone())
        .with_metadata("providerStatus", receipt.status.as_str().into()))
    }

    async fn stream_events(&self, options: StreamOptions) -> Result<EventStream, ProviderError> {
        let driver = self.clone();
        let state = (driver, options, None::<BuildStatus>, false);

        // Polls until the build is terminal; yields only on status changes.
        let events = stream::unfold(state, |(driver, options, last, done)| async move {
            if done {
                return None;
            }
            loop {
                if last.is_some() {
                    tokio::time::sleep(options.poll_interval).await;
                }
                match driver.status(&options.external_id).await {
                    Ok(event) if Some(&event.status) == last.as_ref() => continue,
                    Ok(event) => {
                        let terminal = mapper::is_terminal(&event.status);
                        let status = Some(event.status.clone());
                        return Some((Ok(event), (driver, options, status, terminal)));
                    }
                    Err(e) => return Some((Err(e), (driver, options, last, true))),
                }
            }
        });

        Ok(Box::pin(events))
    }

    async fn status(&self, external_id: &str) -> Result<ProviderEvent, ProviderError> {
        let build = self.fetch(external_id).await?;
        event_from_build(&build)
    }

    async fn find_submission(
        &self,
        build_id: &BuildId,
        phase: Phase,
    ) -> Result<Option<SubmitReceipt>, ProviderError> {
        let filter = format!("tags=\"{}\"", build_tag(build_id));
        let query = [("filter", filter.as_str())];
        let path = self.builds_path();
        let response: ListBuildsResponse = self
            .retry
            .run("builds.list", || self.http.get_query(&path, &query))
            .await?;

        let found = matching_submission(response.builds, build_id, phase);
        debug!("Lookup of {} submission for build {}: {:?}", phase, build_id, found);
        Ok(found)
    }

    fn parse_notification(
        &self,
        payload: &serde_json::Value,
    ) -> Result<ProviderEvent, ProviderError> {
        parse_build_payload(payload)
    }
}

/// Parse a provider build object as delivered by notifications
pub fn parse_build_payload(payload: &serde_json::Value) -> Result<ProviderEvent, ProviderError> {
    let build: Build = serde_json::from_value(payload.clone())
        .map_err(|e| ProviderError::Decode(e.to_string()))?;
    event_from_build(&build)
}

fn event_from_build(build: &Build) -> Result<ProviderEvent, ProviderError> {
    let external_id = build
        .id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ProviderError::Decode("build payload has no id".to_string()))?;

    let build_id = build
        .substitution(BUILD_ID_SUBSTITUTION)
        .map(BuildId::from)
        .or_else(|| build.tags.iter().find_map(|t| build_id_from_tag(t)));

    Ok(ProviderEvent {
        external_id,
        status: build.status.clone(),
        build_id,
        phase: phase_of(build),
        detail: build.status_detail.clone(),
        log_url: build.log_url.clone(),
        observed_at: Utc::now(),
    })
}

fn receipt_from_operation(operation: &BuildOperation) -> Result<SubmitReceipt, ProviderError> {
    let build = operation
        .metadata
        .as_ref()
        .map(|m| &m.build)
        .ok_or_else(|| {
            ProviderError::Decode(format!("operation {} carries no build", operation.name))
        })?;
    let external_id = build
        .id
        .clone()
        .ok_or_else(|| ProviderError::Decode(format!("operation {} build has no id", operation.name)))?;

    Ok(SubmitReceipt {
        external_id,
        status: build.status.clone(),
    })
}

/// First listed build of `phase` that carries exactly `build_id`
fn matching_submission(
    builds: Vec<Build>,
    build_id: &BuildId,
    phase: Phase,
) -> Option<SubmitReceipt> {
    builds
        .into_iter()
        .filter(|b| phase_of(b) == Some(phase))
        .filter(|b| b.substitution(BUILD_ID_SUBSTITUTION) == Some(build_id.as_str()))
        .find_map(|b| {
            b.id.map(|id| SubmitReceipt {
                external_id: id,
                status: b.status,
            })
        })
}

fn phase_of(build: &Build) -> Option<Phase> {
    if build.tags.iter().any(|t| t == DEPLOY_TAG) {
        Some(Phase::Deploy)
    } else if build.tags.iter().any(|t| t.starts_with(BUILD_TAG_PREFIX)) {
        Some(Phase::Build)
    } else {
        None
    }
}

/// Lossy label form of a display name; never used as a lookup key
fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

/// Longest tag the provider accepts
const MAX_TAG_LEN: usize = 128;

/// Marks a tag carrying a digest instead of the encoded id
const DIGEST_MARKER: &str = "_h";

/// Provider tag marking every operation of one build id.
///
/// Lowercase letters, digits, `-` and `.` are kept; every other byte becomes
/// `_` plus two hex digits, so distinct ids never share a tag. Ids too long
/// to encode are tagged with a digest of the raw id.
pub fn build_tag(build_id: &BuildId) -> String {
    let mut tag = String::from(BUILD_TAG_PREFIX);
    for byte in build_id.as_str().bytes() {
        if byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'-' || byte == b'.' {
            tag.push(byte as char);
        } else {
            tag.push_str(&format!("_{:02x}", byte));
        }
    }
    if tag.len() <= MAX_TAG_LEN {
        return tag;
    }
    let digest = sha256_hash(build_id.as_str().as_bytes());
    format!("{}{}{}", BUILD_TAG_PREFIX, DIGEST_MARKER, &digest[..32])
}

/// Build id encoded in a tag; `None` for digest tags and foreign tags
pub fn build_id_from_tag(tag: &str) -> Option<BuildId> {
    let encoded = tag.strip_prefix(BUILD_TAG_PREFIX)?;
    if encoded.starts_with(DIGEST_MARKER) {
        return None;
    }
    let mut bytes = Vec::with_capacity(encoded.len());
    let mut rest = encoded.as_bytes();
    while let Some((&byte, tail)) = rest.split_first() {
        if byte == b'_' {
            let hex = std::str::from_utf8(tail.get(..2)?).ok()?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
            rest = &tail[2..];
        } else {
            bytes.push(byte);
            rest = tail;
        }
    }
    String::from_utf8(bytes).ok().map(BuildId::from)
}
