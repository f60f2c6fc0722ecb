//! Relay and ingestion API models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Push-subscription delivery, as posted to the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEnvelope {
    pub message: PushMessage,

    #[serde(default)]
    pub subscription: Option<String>,
}

/// A single notification message
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    /// Base64-encoded payload; empty pings carry none
    #[serde(default)]
    pub data: Option<String>,

    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    #[serde(default, alias = "message_id")]
    pub message_id: String,

    #[serde(default, alias = "publish_time")]
    pub publish_time: Option<DateTime<Utc>>,
}

/// Delivery metadata forwarded alongside the decoded payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventContext {
    pub event_id: String,

    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
}

/// Body the relay posts to the ingestion endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayedEvent {
    pub context: EventContext,

    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    /// Provider-native build object, untouched by the relay
    pub build: serde_json::Value,
}

/// What ingestion did with a relayed event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestOutcome {
    Applied,
    Duplicate,
    Discarded,
    Ignored,
}

/// Ingestion acknowledgment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub outcome: IngestOutcome,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Latest recorded status of one phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseStatus {
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub recorded_at: DateTime<Utc>,
}

/// Status query response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub build_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,

    pub stage: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<PhaseStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<PhaseStatus>,
}

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
