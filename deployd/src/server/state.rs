//! Server state

use std::sync::Arc;

use secrecy::SecretString;

use crate::deploy::drift::DriftDetector;
use crate::deploy::orchestrator::Orchestrator;
use crate::webhook::ingest::WebhookIngestor;

/// Server state shared across handlers
pub struct ServerState {
    pub orchestrator: Arc<Orchestrator>,
    pub ingestor: Arc<WebhookIngestor>,
    pub drift: Arc<DriftDetector>,
    /// Bearer token for admin routes; admin routes are open when unset
    pub admin_token: Option<SecretString>,
}

impl ServerState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        ingestor: Arc<WebhookIngestor>,
        drift: Arc<DriftDetector>,
        admin_token: Option<SecretString>,
    ) -> Self {
        Self {
            orchestrator,
            ingestor,
            drift,
            admin_token,
        }
    }
}
