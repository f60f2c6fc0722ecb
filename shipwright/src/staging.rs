//! Artifact staging boundary
//!
//! Upload URLs are issued elsewhere; this module only fixes the object key
//! scheme so an uploaded artifact can be handed to a build as
//! [`Source::Artifact`].

use std::time::Duration;

use crate::errors::ValidationError;
use crate::models::request::Source;

/// Lifetime of a pre-signed upload URL
pub const UPLOAD_URL_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// Object key of an uploaded server artifact:
/// `{owner_id}/servers/{server_id}:{version}.{suffix}`
pub fn artifact_object_path(
    owner_id: &str,
    server_id: &str,
    version: &str,
    suffix: &str,
) -> Result<String, ValidationError> {
    for (field, value) in [
        ("owner_id", owner_id),
        ("server_id", server_id),
        ("version", version),
        ("suffix", suffix),
    ] {
        if value.trim().is_empty() {
            return Err(ValidationError::MissingField(field));
        }
    }
    Ok(format!(
        "{}/servers/{}:{}.{}",
        owner_id,
        server_id,
        version,
        suffix.trim_start_matches('.')
    ))
}

/// Build source pointing at an uploaded artifact
pub fn artifact_source(
    owner_id: &str,
    server_id: &str,
    version: &str,
    suffix: &str,
) -> Result<Source, ValidationError> {
    Ok(Source::Artifact {
        object_path: artifact_object_path(owner_id, server_id, version, suffix)?,
    })
}
