use garde::Validate;
use std::sync::Arc;

use crate::auth::ShopIdentity;
use crate::models::generation::{GenerateRequest, SubmitResponse};
use crate::models::job::{EndpointKind, JobUpdate};
use crate::services::credentials::{CredentialError, CredentialStore};
use crate::services::imai::{GenerationService, ImaiError, SubmitRequest};
use crate::services::job_store::{JobStore, StoreError};

/// Where IMAI should deliver completion webhooks.
#[derive(Debug, Clone)]
pub struct WebhookCallback {
    pub url: String,
    pub secret: Option<String>,
}

/// Starts jobs with IMAI and records them locally.
pub struct SubmissionGateway {
    jobs: Arc<dyn JobStore>,
    credentials: Arc<dyn CredentialStore>,
    imai: Arc<dyn GenerationService>,
    callback: WebhookCallback,
}

/// Request fields after validation, trimmed, with blanks dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    pub kind: EndpointKind,
    pub prompt: Option<String>,
    pub url: Option<String>,
}

/// Check a request against the requirements of its pipeline.
pub fn validate_request(
    kind: EndpointKind,
    request: &GenerateRequest,
) -> Result<ValidatedRequest, SubmitError> {
    request
        .validate()
        .map_err(|report| SubmitError::Validation(report.to_string()))?;

    let clean = |v: &Option<String>| {
        v.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let prompt = clean(&request.prompt);
    let url = clean(&request.url);

    if kind.requires_prompt() && prompt.is_none() {
        return Err(SubmitError::Validation(
            "prompt is required and must be a string".to_string(),
        ));
    }
    match url.as_deref() {
        None if kind.requires_url() => {
            return Err(SubmitError::Validation(
                "url is required and must be a string".to_string(),
            ));
        }
        Some(u) if !(u.starts_with("https://") || u.starts_with("http://")) => {
            return Err(SubmitError::Validation(
                "url must be an http(s) address".to_string(),
            ));
        }
        _ => {}
    }

    Ok(ValidatedRequest { kind, prompt, url })
}

impl SubmissionGateway {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        credentials: Arc<dyn CredentialStore>,
        imai: Arc<dyn GenerationService>,
        callback: WebhookCallback,
    ) -> Self {
        Self {
            jobs,
            credentials,
            imai,
            callback,
        }
    }

    /// Submit a generation job for `shop`.
    ///
    /// Nothing is written unless IMAI acknowledges the job with an id, so a
    /// failed submission never leaves an orphan record.
    pub async fn submit(
        &self,
        shop: &ShopIdentity,
        kind: EndpointKind,
        request: &GenerateRequest,
    ) -> Result<SubmitResponse, SubmitError> {
        let validated = validate_request(kind, request)?;

        let token = self
            .credentials
            .bearer_token(shop.shop())
            .await?
            .ok_or(SubmitError::MissingApiKey)?;

        let submit = SubmitRequest {
            kind,
            prompt: validated.prompt.clone(),
            url: validated.url.clone(),
            webhook_url: self.callback.url.clone(),
            webhook_secret: self.callback.secret.clone(),
        };

        let ack = self.imai.submit(&token, &submit).await.map_err(|e| {
            tracing::warn!(shop = %shop.shop(), endpoint = %kind, error = %e, "IMAI submission failed");
            SubmitError::Upstream(e)
        })?;

        let job_id = ack
            .job_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(SubmitError::MissingJobId)?
            .to_string();

        let update = JobUpdate::submitted(shop.shop(), kind, validated.prompt, validated.url);
        let stored = self.jobs.upsert(&job_id, &update).await.map_err(|e| {
            // IMAI has the job; the webhook will still record it under the placeholder tenant
            tracing::error!(job_id = %job_id, shop = %shop.shop(), error = %e, "Failed to record submitted job");
            SubmitError::Store(e)
        })?;

        metrics::counter!("generation_jobs_submitted_total", "endpoint" => kind.to_string())
            .increment(1);
        tracing::info!(
            job_id = %job_id,
            shop = %shop.shop(),
            endpoint = %kind,
            outcome = %stored.outcome,
            "Generation job submitted"
        );

        Ok(SubmitResponse {
            accepted: true,
            status_endpoint: format!("/api/imai/status?jobId={job_id}"),
            job_id,
            status: stored.job.status,
            message: ack
                .message
                .unwrap_or_else(|| "Generation job queued".to_string()),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("No IMAI API key configured for this shop")]
    MissingApiKey,

    #[error(transparent)]
    Credentials(#[from] CredentialError),

    #[error(transparent)]
    Upstream(ImaiError),

    #[error("IMAI acknowledged the submission without a job id")]
    MissingJobId,

    #[error(transparent)]
    Store(StoreError),
}
