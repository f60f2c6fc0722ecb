//! Build and deployment request models
//!
//! A [`BuildRequest`] describes one build attempt and is immutable once
//! built. Construction goes through [`BuildRequestBuilder`], which validates
//! identity and source fields so malformed requests never reach a provider.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};
use url::Url;

use crate::errors::ValidationError;
use crate::utils::{generate_uuid, sha256_hash};

/// Default build root inside the source tree
pub const DEFAULT_ROOT_DIR: &str = "./";

/// Caller-assigned idempotency key of a build attempt
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildId(String);

impl BuildId {
    /// Generate a fresh build id; done before submission, never after
    pub fn generate() -> Self {
        Self(generate_uuid())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for BuildId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for BuildId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role of the org member requesting the build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Admin,
    Member,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub role: MemberRole,
}

/// Environment entry passed to the build.
///
/// The value of a secret entry is never serialized and takes no part in
/// equality, so persisted requests carry only its name.
#[derive(Clone, Deserialize)]
pub struct EnvEntry {
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub secret: bool,
}

#[derive(Serialize)]
struct StoredEnvEntry<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a str>,
    secret: bool,
}

impl Serialize for EnvEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        StoredEnvEntry {
            name: &self.name,
            value: (!self.secret).then_some(self.value.as_str()),
            secret: self.secret,
        }
        .serialize(serializer)
    }
}

impl PartialEq for EnvEntry {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.secret == other.secret
            && (self.secret || self.value == other.value)
    }
}

impl Eq for EnvEntry {}

impl EnvEntry {
    pub fn plain(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            secret: false,
        }
    }

    pub fn secret(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            secret: true,
        }
    }
}

impl fmt::Debug for EnvEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = if self.secret { "[REDACTED]" } else { self.value.as_str() };
        f.debug_struct("EnvEntry")
            .field("name", &self.name)
            .field("value", &value)
            .field("secret", &self.secret)
            .finish()
    }
}

/// Live repository coordinates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySource {
    pub repo_url: String,
    pub git_ref: String,
    #[serde(default)]
    pub commit_hash: Option<String>,
    #[serde(default)]
    pub github_app_id: Option<u64>,
    #[serde(default)]
    pub installation_id: Option<u64>,
}

/// Where the build reads its sources from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Source {
    Repository(RepositorySource),
    /// Pre-built artifact staged through the upload boundary
    Artifact { object_path: String },
}

/// Immutable description of one build attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "BuildRequestFields")]
pub struct BuildRequest {
    build_id: BuildId,
    org_id: String,
    member: Member,
    server_id: String,
    server_title: String,
    source: Source,
    env: Vec<EnvEntry>,
    inputs: BTreeMap<String, serde_json::Value>,
    config_revision: u64,
    config_hash: String,
    root_dir: String,
}

impl BuildRequest {
    pub fn builder(
        org_id: impl Into<String>,
        member: Member,
        server_id: impl Into<String>,
        source: Source,
    ) -> BuildRequestBuilder {
        BuildRequestBuilder::new(org_id, member, server_id, source)
    }

    pub fn build_id(&self) -> &BuildId {
        &self.build_id
    }

    pub fn org_id(&self) -> &str {
        &self.org_id
    }

    pub fn member(&self) -> &Member {
        &self.member
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn server_title(&self) -> &str {
        &self.server_title
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn env(&self) -> &[EnvEntry] {
        &self.env
    }

    pub fn inputs(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.inputs
    }

    pub fn config_revision(&self) -> u64 {
        self.config_revision
    }

    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    pub fn root_dir(&self) -> &str {
        &self.root_dir
    }

    /// Check identity, source and build inputs
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("build_id", self.build_id.as_str())?;
        require("org_id", &self.org_id)?;
        require("member.id", &self.member.id)?;
        require("server_id", &self.server_id)?;
        require("config_hash", &self.config_hash)?;

        match &self.source {
            Source::Repository(repo) => {
                validate_repo_url(&repo.repo_url)?;
                require("source.git_ref", &repo.git_ref)?;
            }
            Source::Artifact { object_path } => require("source.object_path", object_path)?,
        }

        let mut seen = HashSet::new();
        for entry in &self.env {
            if !is_valid_env_name(&entry.name) {
                return Err(ValidationError::InvalidEnvName(entry.name.clone()));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(ValidationError::DuplicateEnv(entry.name.clone()));
            }
        }

        validate_root_dir(&self.root_dir)
    }
}

/// Builder for [`BuildRequest`]
#[derive(Debug, Clone)]
pub struct BuildRequestBuilder {
    build_id: Option<BuildId>,
    org_id: String,
    member: Member,
    server_id: String,
    server_title: Option<String>,
    source: Source,
    env: Vec<EnvEntry>,
    inputs: BTreeMap<String, serde_json::Value>,
    config_revision: u64,
    config_hash: Option<String>,
    root_dir: Option<String>,
}

impl BuildRequestBuilder {
    pub fn new(
        org_id: impl Into<String>,
        member: Member,
        server_id: impl Into<String>,
        source: Source,
    ) -> Self {
        Self {
            build_id: None,
            org_id: org_id.into(),
            member,
            server_id: server_id.into(),
            server_title: None,
            source,
            env: Vec::new(),
            inputs: BTreeMap::new(),
            config_revision: 0,
            config_hash: None,
            root_dir: None,
        }
    }

    pub fn build_id(mut self, build_id: impl Into<BuildId>) -> Self {
        self.build_id = Some(build_id.into());
        self
    }

    pub fn server_title(mut self, title: impl Into<String>) -> Self {
        self.server_title = Some(title.into());
        self
    }

    pub fn env(mut self, entry: EnvEntry) -> Self {
        self.env.push(entry);
        self
    }

    pub fn input(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }

    pub fn config_revision(mut self, revision: u64) -> Self {
        self.config_revision = revision;
        self
    }

    pub fn config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    pub fn root_dir(mut self, root_dir: impl Into<String>) -> Self {
        self.root_dir = Some(root_dir.into());
        self
    }

    /// Validate and freeze the request
    pub fn build(self) -> Result<BuildRequest, ValidationError> {
        let request = self.assemble();
        request.validate()?;
        Ok(request)
    }

    /// Fill in defaults without validating
    fn assemble(self) -> BuildRequest {
        let config_hash = self
            .config_hash
            .unwrap_or_else(|| config_hash(&self.inputs, &self.env));

        BuildRequest {
            build_id: self.build_id.unwrap_or_else(BuildId::generate),
            server_title: self.server_title.unwrap_or_else(|| self.server_id.clone()),
            org_id: self.org_id,
            member: self.member,
            server_id: self.server_id,
            source: self.source,
            env: self.env,
            inputs: self.inputs,
            config_revision: self.config_revision,
            config_hash,
            root_dir: self.root_dir.unwrap_or_else(|| DEFAULT_ROOT_DIR.to_string()),
        }
    }
}

/// Wire form of [`BuildRequest`]; optional fields take the builder defaults
#[derive(Deserialize)]
struct BuildRequestFields {
    build_id: BuildId,
    org_id: String,
    member: Member,
    server_id: String,
    #[serde(default)]
    server_title: Option<String>,
    source: Source,
    #[serde(default)]
    env: Vec<EnvEntry>,
    #[serde(default)]
    inputs: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    config_revision: u64,
    #[serde(default)]
    config_hash: Option<String>,
    #[serde(default)]
    root_dir: Option<String>,
}

impl From<BuildRequestFields> for BuildRequest {
    fn from(fields: BuildRequestFields) -> Self {
        BuildRequestBuilder {
            build_id: Some(fields.build_id),
            org_id: fields.org_id,
            member: fields.member,
            server_id: fields.server_id,
            server_title: fields.server_title,
            source: fields.source,
            env: fields.env,
            inputs: fields.inputs,
            config_revision: fields.config_revision,
            config_hash: fields.config_hash,
            root_dir: fields.root_dir,
        }
        .assemble()
    }
}

/// Deployment target environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentTarget {
    Preview,
    Production,
}

impl DeploymentTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentTarget::Preview => "preview",
            DeploymentTarget::Production => "production",
        }
    }
}

/// A build request plus the deployment it feeds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    deployment_id: String,
    target: DeploymentTarget,
    public_id: String,
    build: BuildRequest,
}

impl DeploymentRequest {
    pub fn new(
        deployment_id: impl Into<String>,
        target: DeploymentTarget,
        public_id: impl Into<String>,
        build: BuildRequest,
    ) -> Result<Self, ValidationError> {
        let request = Self {
            deployment_id: deployment_id.into(),
            target,
            public_id: public_id.into(),
            build,
        };
        request.validate()?;
        Ok(request)
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }

    pub fn target(&self) -> DeploymentTarget {
        self.target
    }

    pub fn public_id(&self) -> &str {
        &self.public_id
    }

    pub fn build(&self) -> &BuildRequest {
        &self.build
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require("deployment_id", &self.deployment_id)?;
        require("public_id", &self.public_id)?;
        self.build.validate()
    }
}

/// What a workflow was asked to do for one build id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowRequest {
    Build(BuildRequest),
    Deploy(DeploymentRequest),
}

impl WorkflowRequest {
    pub fn build(&self) -> &BuildRequest {
        match self {
            WorkflowRequest::Build(build) => build,
            WorkflowRequest::Deploy(deployment) => deployment.build(),
        }
    }

    pub fn deployment(&self) -> Option<&DeploymentRequest> {
        match self {
            WorkflowRequest::Build(_) => None,
            WorkflowRequest::Deploy(deployment) => Some(deployment),
        }
    }

    pub fn build_id(&self) -> &BuildId {
        self.build().build_id()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            WorkflowRequest::Build(build) => build.validate(),
            WorkflowRequest::Deploy(deployment) => deployment.validate(),
        }
    }
}

impl From<BuildRequest> for WorkflowRequest {
    fn from(build: BuildRequest) -> Self {
        WorkflowRequest::Build(build)
    }
}

impl From<DeploymentRequest> for WorkflowRequest {
    fn from(deployment: DeploymentRequest) -> Self {
        WorkflowRequest::Deploy(deployment)
    }
}

/// Hash of the build configuration; secret values never enter the digest
pub fn config_hash(inputs: &BTreeMap<String, serde_json::Value>, env: &[EnvEntry]) -> String {
    let env: BTreeMap<&str, Option<&str>> = env
        .iter()
        .map(|e| (e.name.as_str(), (!e.secret).then_some(e.value.as_str())))
        .collect();
    let canonical = serde_json::json!({ "inputs": inputs, "env": env });
    sha256_hash(canonical.to_string().as_bytes())
}

fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    Ok(())
}

fn validate_repo_url(raw: &str) -> Result<(), ValidationError> {
    require("source.repo_url", raw)?;
    let url = Url::parse(raw).map_err(|e| ValidationError::InvalidRepoUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::InvalidRepoUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    Ok(())
}

fn is_valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn validate_root_dir(root_dir: &str) -> Result<(), ValidationError> {
    if root_dir.is_empty()
        || root_dir.starts_with('/')
        || root_dir.split('/').any(|part| part == "..")
    {
        return Err(ValidationError::InvalidRootDir(root_dir.to_string()));
    }
    Ok(())
}
