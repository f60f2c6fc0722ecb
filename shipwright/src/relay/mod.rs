//! Event relay: provider push notifications to the ingestion endpoint

pub mod forward;
pub mod serve;

pub use forward::{relay_notification, RelayOutcome};
