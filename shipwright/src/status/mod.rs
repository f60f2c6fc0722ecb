//! Deployment status model and provider status mapping

pub mod mapper;
pub mod state;

pub use state::{evaluate, DeploymentStatus, Phase, Transition};
