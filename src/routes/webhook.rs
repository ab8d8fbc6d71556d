use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::services::webhook::{WebhookError, WebhookHeaders};

/// POST /api/imai/webhook: public; authenticated by signature only.
pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), ApiError> {
    let headers = WebhookHeaders::from_headers(&headers);

    match state.webhooks.ingest(&headers, &body).await {
        Ok(_) => Ok((StatusCode::OK, "OK")),
        Err(e) => {
            let reason = match &e {
                WebhookError::Signature(_) => "signature",
                WebhookError::MalformedJson(_) => "malformed_json",
                WebhookError::InvalidPayload(_) => "invalid_payload",
                WebhookError::Store(_) => "store",
            };
            metrics::counter!("webhook_rejections_total", "reason" => reason).increment(1);
            tracing::warn!(
                job_id = headers.job_id.as_deref().unwrap_or("unknown"),
                attempt = headers.attempt.unwrap_or(1),
                reason,
                error = %e,
                "IMAI webhook rejected"
            );
            Err(e.into())
        }
    }
}
