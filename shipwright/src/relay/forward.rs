//! Stateless notification forwarder
//!
//! Decodes one provider push delivery and re-posts it to the ingestion
//! endpoint with Basic credentials. Build semantics are never interpreted
//! here; any failure fails the whole delivery so the push system redelivers.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use ingest_api::{EventContext, PushEnvelope, RelayedEvent};
use tracing::{debug, error, info, warn};

use crate::errors::RelayError;
use crate::http::client::HttpClient;

/// Attribute the push system uses for the event type
pub const EVENT_TYPE_ATTRIBUTE: &str = "eventType";

/// What the relay did with a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    Forwarded,

    /// Empty ping; nothing to forward
    Skipped,
}

/// Decode the payload of a push delivery.
///
/// Returns `None` for deliveries that carry no data.
pub fn decode_payload(envelope: &PushEnvelope) -> Result<Option<serde_json::Value>, RelayError> {
    let data = match envelope.message.data.as_deref().map(str::trim) {
        Some(data) if !data.is_empty() => data,
        _ => return Ok(None),
    };

    let bytes = STANDARD
        .decode(data)
        .map_err(|e| RelayError::Decode(format!("invalid base64: {}", e)))?;
    let payload = serde_json::from_slice(&bytes)
        .map_err(|e| RelayError::Decode(format!("invalid JSON: {}", e)))?;
    Ok(Some(payload))
}

/// Body forwarded to the ingestion endpoint
pub fn relayed_event(envelope: &PushEnvelope, build: serde_json::Value) -> RelayedEvent {
    let message = &envelope.message;
    RelayedEvent {
        context: EventContext {
            event_id: message.message_id.clone(),
            timestamp: message.publish_time.unwrap_or_else(Utc::now),
            event_type: message.attributes.get(EVENT_TYPE_ATTRIBUTE).cloned(),
            resource: envelope.subscription.clone(),
        },
        attributes: message.attributes.clone(),
        build,
    }
}

/// Forward one push delivery to `path` on the ingestion client
pub async fn relay_notification(
    client: &HttpClient,
    path: &str,
    envelope: &PushEnvelope,
) -> Result<RelayOutcome, RelayError> {
    let message_id = &envelope.message.message_id;

    let build = match decode_payload(envelope) {
        Ok(Some(build)) => build,
        Ok(None) => {
            warn!("Notification {} carries no data, skipping", message_id);
            return Ok(RelayOutcome::Skipped);
        }
        Err(e) => {
            error!("Cannot decode notification {}: {}", message_id, e);
            return Err(e);
        }
    };

    let body = relayed_event(envelope, build);
    debug!("Forwarding notification {} to {}{}", message_id, client.base_url(), path);

    let (status, response) = client.post_raw(path, &body).await?;
    if !status.is_success() {
        error!(
            "Ingestion rejected notification {} ({}): {}",
            message_id, status, response
        );
        return Err(RelayError::Rejected {
            status: status.as_u16(),
            body: response,
        });
    }

    info!("Forwarded notification {} ({})", message_id, status);
    Ok(RelayOutcome::Forwarded)
}
