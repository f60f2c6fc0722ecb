//! Request and event models

pub mod event;
pub mod request;

pub use event::DeploymentEvent;
pub use request::{
    BuildId, BuildRequest, DeploymentRequest, DeploymentTarget, EnvEntry, Member, MemberRole,
    RepositorySource, Source, WorkflowRequest,
};
