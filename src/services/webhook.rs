use axum::http::HeaderMap;
use std::sync::Arc;

use crate::models::generation::WebhookPayload;
use crate::models::job::{JobStatus, JobUpdate, MergeOutcome};
use crate::services::job_store::{JobStore, StoreError};
use crate::services::rehost::{self, RehostScheduler, RehostTask};
use crate::services::signature::{self, SignatureError, SIGNATURE_HEADER};

/// Delivery metadata IMAI sends alongside the body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebhookHeaders {
    pub event: Option<String>,
    pub job_id: Option<String>,
    pub attempt: Option<u32>,
    pub signature: Option<String>,
}

impl WebhookHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Self {
            event: text("x-imai-event"),
            job_id: text("x-imai-job-id"),
            attempt: text("x-imai-attempt").and_then(|a| a.trim().parse().ok()),
            signature: text(SIGNATURE_HEADER),
        }
    }
}

/// What a successful ingestion did.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReceipt {
    pub job_id: String,
    pub status: JobStatus,
    pub outcome: MergeOutcome,
    pub rehost_scheduled: bool,
}

/// Applies IMAI completion webhooks to the job store.
pub struct WebhookIngestor {
    jobs: Arc<dyn JobStore>,
    secret: Option<String>,
    rehost: Option<Arc<dyn RehostScheduler>>,
}

impl WebhookIngestor {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        secret: Option<String>,
        rehost: Option<Arc<dyn RehostScheduler>>,
    ) -> Self {
        Self {
            jobs,
            secret: secret.filter(|s| !s.is_empty()),
            rehost,
        }
    }

    /// Verify, parse and apply one delivery.
    ///
    /// Every check happens before the store is touched. Redelivery of the
    /// same payload is a no-op. Post-processing is scheduled in the
    /// background and never affects the result.
    pub async fn ingest(
        &self,
        headers: &WebhookHeaders,
        raw_body: &[u8],
    ) -> Result<IngestReceipt, WebhookError> {
        if let Some(secret) = &self.secret {
            signature::verify(secret, raw_body, headers.signature.as_deref())?;
        }

        let value: serde_json::Value =
            serde_json::from_slice(raw_body).map_err(WebhookError::MalformedJson)?;
        let payload: WebhookPayload = serde_json::from_value(value)
            .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;

        let job_id = payload
            .job_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| WebhookError::InvalidPayload("missing jobId".to_string()))?
            .to_string();
        let status_text = payload
            .status
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| WebhookError::InvalidPayload("missing status".to_string()))?;
        let status = status_text
            .parse::<JobStatus>()
            .map_err(|_| WebhookError::InvalidPayload(format!("unknown status '{status_text}'")))?;

        if let Some(header_id) = headers.job_id.as_deref() {
            if header_id != job_id {
                tracing::warn!(job_id = %job_id, header_job_id = %header_id, "Webhook header and body disagree on job id");
            }
        }

        let update = JobUpdate::from_webhook(
            status,
            payload.result.clone(),
            payload.error_message(),
            payload.completed_at(),
        );
        let stored = self.jobs.upsert(&job_id, &update).await?;

        if stored.outcome == MergeOutcome::Inserted && stored.job.is_unassigned() {
            tracing::warn!(
                job_id = %job_id,
                status = %status,
                "Webhook for a job with no local record; stored under placeholder tenant for reconciliation"
            );
        }
        if stored.outcome == MergeOutcome::Stale {
            tracing::info!(
                job_id = %job_id,
                stored_status = %stored.job.status,
                delivered_status = %status,
                "Ignoring webhook older than stored state"
            );
        }

        let rehost_scheduled = match (&self.rehost, stored.outcome.mutated()) {
            (Some(scheduler), true) => match RehostTask::for_job(&stored.job) {
                Some(task) => {
                    rehost::schedule_in_background(scheduler.clone(), task);
                    true
                }
                None => false,
            },
            _ => false,
        };

        metrics::counter!("webhook_deliveries_total", "outcome" => stored.outcome.to_string())
            .increment(1);
        tracing::info!(
            job_id = %job_id,
            event = headers.event.as_deref().unwrap_or("unknown"),
            attempt = headers.attempt.unwrap_or(1),
            status = %status,
            outcome = %stored.outcome,
            "IMAI webhook applied"
        );

        Ok(IngestReceipt {
            job_id,
            status: stored.job.status,
            outcome: stored.outcome,
            rehost_scheduled,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Webhook signature rejected: {0}")]
    Signature(#[from] SignatureError),

    #[error("Webhook body is not valid JSON: {0}")]
    MalformedJson(serde_json::Error),

    #[error("Webhook payload invalid: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
