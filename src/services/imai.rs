use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use crate::models::generation::{StatusView, SubmitAck};
use crate::models::job::EndpointKind;
use crate::services::credentials::ApiToken;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// An async generation request as sent to IMAI.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    pub kind: EndpointKind,
    pub prompt: Option<String>,
    pub url: Option<String>,
    pub webhook_url: String,
    pub webhook_secret: Option<String>,
}

impl SubmitRequest {
    /// JSON body for the pipeline's submission endpoint.
    pub fn body(&self) -> serde_json::Value {
        let mut body = match self.kind {
            EndpointKind::Ecommerce => serde_json::json!({
                "platforms": ["shopify"],
                "includeImages": true,
                "includeDetails": true,
                "includeTitles": true,
                "includeSpecs": true,
            }),
            EndpointKind::Marketing | EndpointKind::Design => serde_json::json!({
                "action": "generate",
            }),
        };

        body["async"] = true.into();
        body["webhookUrl"] = self.webhook_url.clone().into();
        if let Some(prompt) = &self.prompt {
            body["prompt"] = prompt.clone().into();
        }
        if let Some(url) = &self.url {
            body["url"] = url.clone().into();
        }
        if let Some(secret) = &self.webhook_secret {
            body["webhookSecret"] = secret.clone().into();
        }
        body
    }
}

/// The external generation service.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Submit a job for async execution.
    async fn submit(&self, token: &ApiToken, request: &SubmitRequest) -> Result<SubmitAck, ImaiError>;

    /// Current status of a job; `Ok(None)` when IMAI does not know the id.
    async fn fetch_status(&self, token: &ApiToken, job_id: &str) -> Result<Option<StatusView>, ImaiError>;
}

/// HTTP client for the IMAI Studio API.
pub struct ImaiClient {
    http: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct UpstreamErrorBody {
    error: Option<serde_json::Value>,
    message: Option<serde_json::Value>,
}

impl ImaiClient {
    pub fn new(base_url: &str) -> Result<Self, ImaiError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(ImaiError::Http)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn rejection(response: reqwest::Response) -> ImaiError {
        let status = response.status().as_u16();
        // only pass through error details that are plain strings
        let body = response.json::<UpstreamErrorBody>().await.ok();
        let text = |v: Option<serde_json::Value>| v.and_then(|v| v.as_str().map(str::to_string));
        let (error, message) = match body {
            Some(b) => (text(b.error), text(b.message)),
            None => (None, None),
        };
        ImaiError::Rejected { status, error, message }
    }
}

#[async_trait]
impl GenerationService for ImaiClient {
    async fn submit(&self, token: &ApiToken, request: &SubmitRequest) -> Result<SubmitAck, ImaiError> {
        let url = format!("{}{}", self.base_url, request.kind.api_path());

        let response = self
            .http
            .post(&url)
            .bearer_auth(token.expose())
            .json(&request.body())
            .send()
            .await
            .map_err(ImaiError::Http)?;

        tracing::debug!(endpoint = %request.kind, status = response.status().as_u16(), "IMAI submission response");

        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        response.json::<SubmitAck>().await.map_err(ImaiError::Http)
    }

    async fn fetch_status(&self, token: &ApiToken, job_id: &str) -> Result<Option<StatusView>, ImaiError> {
        let url = format!("{}/api/v1/generate/status", self.base_url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(token.expose())
            .query(&[("jobId", job_id)])
            .send()
            .await
            .map_err(ImaiError::Http)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        response.json::<StatusView>().await.map(Some).map_err(ImaiError::Http)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImaiError {
    #[error("HTTP request to IMAI failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IMAI rejected the request with status {status}")]
    Rejected {
        status: u16,
        error: Option<String>,
        message: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(kind: EndpointKind) -> SubmitRequest {
        SubmitRequest {
            kind,
            prompt: Some("autumn sale hero".to_string()),
            url: None,
            webhook_url: "https://app.example.com/api/imai/webhook".to_string(),
            webhook_secret: Some("whsec".to_string()),
        }
    }

    #[test]
    fn test_marketing_body_requests_async_with_callback() {
        let body = request(EndpointKind::Marketing).body();
        assert_eq!(body["action"], "generate");
        assert_eq!(body["async"], true);
        assert_eq!(body["webhookUrl"], "https://app.example.com/api/imai/webhook");
        assert_eq!(body["webhookSecret"], "whsec");
        assert!(body.get("url").is_none());
    }

    #[test]
    fn test_ecommerce_body_targets_shopify() {
        let mut req = request(EndpointKind::Ecommerce);
        req.url = Some("https://shop.example.com/products/mug".to_string());
        req.webhook_secret = None;
        let body = req.body();

        assert_eq!(body["platforms"], json!(["shopify"]));
        assert_eq!(body["url"], "https://shop.example.com/products/mug");
        assert!(body.get("webhookSecret").is_none());
        assert!(body.get("action").is_none());
    }
}
