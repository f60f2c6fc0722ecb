//! Provider status mapping
//!
//! Translates the provider's native build status vocabulary into
//! [`DeploymentStatus`]. The mapping is total: anything the provider sends
//! produces a defined internal status.

use provider_api::BuildStatus;

use crate::status::state::DeploymentStatus;

/// Map a native provider status to the internal status
pub fn map(status: &BuildStatus) -> DeploymentStatus {
    match status {
        // not started yet
        BuildStatus::StatusUnknown | BuildStatus::Pending | BuildStatus::Queued => {
            DeploymentStatus::Placed
        }
        BuildStatus::Working => DeploymentStatus::Running,
        BuildStatus::Success => DeploymentStatus::Ready,
        BuildStatus::Failure
        | BuildStatus::InternalError
        | BuildStatus::Timeout
        | BuildStatus::Expired => DeploymentStatus::Error,
        BuildStatus::Cancelled => DeploymentStatus::Aborted,
        // TODO: revisit if the provider introduces new non-terminal statuses;
        // mapping them to Error ends the workflow early.
        BuildStatus::Unrecognized(_) => DeploymentStatus::Error,
    }
}

/// Map a raw status string as it appears in notification payloads
pub fn map_str(raw: &str) -> DeploymentStatus {
    map(&BuildStatus::from(raw))
}

/// Whether the provider considers this status final
pub fn is_terminal(status: &BuildStatus) -> bool {
    !matches!(
        status,
        BuildStatus::StatusUnknown
            | BuildStatus::Pending
            | BuildStatus::Queued
            | BuildStatus::Working
    )
}
