//! Deployment event model

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::request::BuildId;
use crate::status::{DeploymentStatus, Phase};

/// One observed status transition, appended to the event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentEvent {
    /// Record id
    pub id: String,

    /// Provider-native operation id, once known
    #[serde(default)]
    pub external_id: Option<String>,

    pub build_id: BuildId,

    #[serde(default)]
    pub deployment_id: Option<String>,

    pub phase: Phase,

    pub status: DeploymentStatus,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub resource_ids: BTreeMap<String, String>,

    pub recorded_at: DateTime<Utc>,
}

impl DeploymentEvent {
    pub fn new(build_id: BuildId, phase: Phase, status: DeploymentStatus) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            external_id: None,
            build_id,
            deployment_id: None,
            phase,
            status,
            metadata: serde_json::Map::new(),
            message: None,
            resource_ids: BTreeMap::new(),
            recorded_at: Utc::now(),
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_deployment_id(mut self, deployment_id: Option<String>) -> Self {
        self.deployment_id = deployment_id;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_resource_id(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.resource_ids.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Key used to recognise redelivered provider events
    pub fn dedup_key(&self) -> Option<(&str, DeploymentStatus)> {
        self.external_id.as_deref().map(|id| (id, self.status))
    }
}
