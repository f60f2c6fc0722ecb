//! Server state

use std::sync::Arc;

use crate::orchestrator::Orchestrator;
use crate::server::auth::Credentials;

/// Server state shared across handlers
pub struct ServerState {
    pub orchestrator: Arc<Orchestrator>,
    pub credentials: Credentials,
}

impl ServerState {
    pub fn new(orchestrator: Arc<Orchestrator>, credentials: Credentials) -> Self {
        Self {
            orchestrator,
            credentials,
        }
    }
}
