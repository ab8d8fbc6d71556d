use std::sync::Arc;

use crate::auth::SessionVerifier;
use crate::services::{
    credentials::CredentialStore,
    imai::GenerationService,
    job_store::JobStore,
    rehost::RehostScheduler,
    resolver::StatusResolver,
    submission::{SubmissionGateway, WebhookCallback},
    webhook::WebhookIngestor,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<dyn JobStore>,
    pub submissions: Arc<SubmissionGateway>,
    pub resolver: Arc<StatusResolver>,
    pub webhooks: Arc<WebhookIngestor>,
    pub rehost: Option<Arc<dyn RehostScheduler>>,
    pub sessions: Arc<SessionVerifier>,
}

impl AppState {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        credentials: Arc<dyn CredentialStore>,
        imai: Arc<dyn GenerationService>,
        rehost: Option<Arc<dyn RehostScheduler>>,
        sessions: SessionVerifier,
        callback: WebhookCallback,
    ) -> Self {
        let webhooks = WebhookIngestor::new(jobs.clone(), callback.secret.clone(), rehost.clone());
        let resolver = StatusResolver::new(jobs.clone(), credentials.clone(), imai.clone());
        let submissions = SubmissionGateway::new(jobs.clone(), credentials, imai, callback);

        Self {
            jobs,
            submissions: Arc::new(submissions),
            resolver: Arc::new(resolver),
            webhooks: Arc::new(webhooks),
            rehost,
            sessions: Arc::new(sessions),
        }
    }
}
