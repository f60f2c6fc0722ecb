//! Ingest API models
//!
//! Wire models shared by the event relay and the ingestion endpoint.

pub mod models;

pub use models::*;
