use std::sync::Arc;

use crate::auth::ShopIdentity;
use crate::models::generation::StatusView;
use crate::models::job::{Job, JobUpdate};
use crate::services::credentials::{CredentialError, CredentialStore};
use crate::services::imai::{GenerationService, ImaiError};
use crate::services::job_store::{JobStore, StoreError};

/// Answers "what state is this job in?", preferring the local record.
pub struct StatusResolver {
    jobs: Arc<dyn JobStore>,
    credentials: Arc<dyn CredentialStore>,
    imai: Arc<dyn GenerationService>,
}

impl StatusResolver {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        credentials: Arc<dyn CredentialStore>,
        imai: Arc<dyn GenerationService>,
    ) -> Self {
        Self {
            jobs,
            credentials,
            imai,
        }
    }

    /// Resolve the current status of `job_id`.
    ///
    /// A local record is returned as stored and never re-queried. Without
    /// one, the caller must be authenticated; IMAI is then asked with the
    /// caller's key and the answer is written through to the store.
    pub async fn resolve(
        &self,
        job_id: &str,
        caller: Option<&ShopIdentity>,
    ) -> Result<StatusView, ResolveError> {
        if let Some(job) = self.jobs.find(job_id).await? {
            if !visible_to(&job, caller) {
                tracing::warn!(job_id = %job_id, "Status requested by a shop that does not own the job");
                return Err(ResolveError::NotFound);
            }
            return Ok(job.view());
        }

        let shop = caller.ok_or(ResolveError::AuthRequired)?;
        let token = self
            .credentials
            .bearer_token(shop.shop())
            .await?
            .ok_or(ResolveError::MissingApiKey)?;

        metrics::counter!("status_fallback_queries_total").increment(1);
        let remote = self
            .imai
            .fetch_status(&token, job_id)
            .await
            .map_err(ResolveError::Upstream)?
            .ok_or(ResolveError::NotFound)?;

        let stored = self
            .jobs
            .upsert(job_id, &JobUpdate::from_status_query(shop.shop(), remote))
            .await?;

        tracing::info!(
            job_id = %job_id,
            shop = %shop.shop(),
            status = %stored.job.status,
            outcome = %stored.outcome,
            "Job status fetched from IMAI"
        );

        // a webhook may have landed meanwhile; the merged record wins
        if !visible_to(&stored.job, Some(shop)) {
            return Err(ResolveError::NotFound);
        }
        Ok(stored.job.view())
    }
}

/// Unauthenticated callers see any local record; authenticated callers only
/// their own jobs and jobs still awaiting tenant reconciliation.
fn visible_to(job: &Job, caller: Option<&ShopIdentity>) -> bool {
    match caller {
        None => true,
        Some(shop) => job.is_unassigned() || job.shop == shop.shop(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Job not found")]
    NotFound,

    #[error("Authentication required to look up unknown jobs")]
    AuthRequired,

    #[error("No IMAI API key configured for this shop")]
    MissingApiKey,

    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error(transparent)]
    Upstream(ImaiError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
