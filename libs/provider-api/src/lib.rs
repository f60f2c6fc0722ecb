//! Provider API models
//!
//! Serde models for the remote build service (Cloud Build REST resources).

pub mod models;

pub use models::*;
