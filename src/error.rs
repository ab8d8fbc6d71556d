use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::auth::AuthError;
use crate::services::imai::ImaiError;
use crate::services::resolver::ResolveError;
use crate::services::submission::SubmitError;
use crate::services::webhook::WebhookError;

const RETRY_HINT: &str = "Please try again";

/// Error returned by HTTP handlers. Every variant renders as
/// `{"error": ..., "message": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The generation service failed; both texts are safe to show.
    #[error("Upstream error: {error}")]
    Upstream { error: String, message: String },

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Detail is logged, never returned.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, "Invalid request".to_string()),
            ApiError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, msg, "Authentication required".to_string())
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, "Not found".to_string()),
            ApiError::Upstream { error, message } => (StatusCode::BAD_GATEWAY, error, message),
            ApiError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, msg, RETRY_HINT.to_string())
            }
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    RETRY_HINT.to_string(),
                )
            }
        };

        (status, axum::Json(json!({ "error": error, "message": message }))).into_response()
    }
}

/// Text from IMAI is passed on only when it is a non-empty single line.
fn well_formed(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && t.len() <= 500 && !t.contains('\n'))
}

impl From<ImaiError> for ApiError {
    fn from(err: ImaiError) -> Self {
        match err {
            ImaiError::Http(e) => {
                tracing::warn!(error = %e, "IMAI unreachable");
                ApiError::Upstream {
                    error: "Generation service unavailable".to_string(),
                    message: RETRY_HINT.to_string(),
                }
            }
            ImaiError::Rejected { status, error, message } => {
                tracing::warn!(status, "IMAI rejected request");
                ApiError::Upstream {
                    error: well_formed(error).unwrap_or_else(|| "Generation request failed".to_string()),
                    message: well_formed(message).unwrap_or_else(|| RETRY_HINT.to_string()),
                }
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        tracing::debug!(error = %err, "Session token rejected");
        ApiError::Unauthorized("Invalid session token".to_string())
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Validation(msg) => ApiError::BadRequest(msg),
            SubmitError::MissingApiKey => ApiError::Unauthorized("API key not configured".to_string()),
            SubmitError::Upstream(e) => e.into(),
            SubmitError::MissingJobId => ApiError::Upstream {
                error: "Generation service returned no job id".to_string(),
                message: RETRY_HINT.to_string(),
            },
            SubmitError::Credentials(e) => ApiError::Internal(e.to_string()),
            SubmitError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<ResolveError> for ApiError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound => ApiError::NotFound("Job not found".to_string()),
            ResolveError::AuthRequired => ApiError::Unauthorized("Missing session token".to_string()),
            ResolveError::MissingApiKey => ApiError::Unauthorized("API key not configured".to_string()),
            ResolveError::Upstream(e) => e.into(),
            ResolveError::Credentials(e) => ApiError::Internal(e.to_string()),
            ResolveError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::Signature(_) => ApiError::Unauthorized("Invalid signature".to_string()),
            WebhookError::MalformedJson(_) => ApiError::BadRequest("Invalid JSON".to_string()),
            WebhookError::InvalidPayload(msg) => ApiError::BadRequest(msg),
            WebhookError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn render(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_internal_detail_is_not_echoed() {
        let (status, body) = render(ApiError::Internal("connection refused on 10.0.0.5".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
        assert!(!body.to_string().contains("10.0.0.5"));
    }

    #[tokio::test]
    async fn test_upstream_passes_through_well_formed_text() {
        let err: ApiError = ImaiError::Rejected {
            status: 422,
            error: Some("Prompt rejected".to_string()),
            message: Some("line one\nline two".to_string()),
        }
        .into();
        let (status, body) = render(err).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "Prompt rejected");
        assert_eq!(body["message"], "Please try again");
    }

    #[tokio::test]
    async fn test_missing_api_key_is_unauthorized() {
        let (status, body) = render(SubmitError::MissingApiKey.into()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "API key not configured");
    }
}
