use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::ShopIdentity;
use crate::models::generation::StatusView;
use crate::models::job::JobStatus;
use crate::services::poller::{CheckError, StatusSource};
use crate::services::resolver::{ResolveError, StatusResolver};

const CHECK_TIMEOUT: Duration = Duration::from_secs(15);

/// Polls the service's own `GET /api/imai/status` endpoint over HTTP.
pub struct HttpStatusSource {
    http: Client,
    endpoint: String,
    session_token: Option<String>,
}

/// Loose shape of a status response; error bodies carry no status.
#[derive(Debug, Deserialize)]
struct StatusBody {
    status: Option<JobStatus>,
    result: Option<serde_json::Value>,
    error: Option<String>,
    message: Option<String>,
}

impl HttpStatusSource {
    /// `endpoint` is the full status URL, e.g. `https://app.example/api/imai/status`.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, CheckError> {
        let http = Client::builder()
            .timeout(CHECK_TIMEOUT)
            .build()
            .map_err(|e| CheckError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            session_token: None,
        })
    }

    /// Send a session token with every check.
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into());
        self
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn check(&self, job_id: &str) -> Result<StatusView, CheckError> {
        let mut request = self.http.get(&self.endpoint).query(&[("jobId", job_id)]);
        if let Some(token) = &self.session_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CheckError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CheckError::from_status(response.status().as_u16()));
        }

        let body: StatusBody = response
            .json()
            .await
            .map_err(|e| CheckError::Decode(e.to_string()))?;

        match body.status {
            Some(status) => Ok(StatusView {
                status,
                result: body.result,
                error: body.error,
            }),
            // a 2xx carrying only an error is a failed job, not a blip
            None => match body.error.or(body.message) {
                Some(error) => Ok(StatusView {
                    status: JobStatus::Failed,
                    result: None,
                    error: Some(error),
                }),
                None => Err(CheckError::Decode("response has no status".to_string())),
            },
        }
    }
}

/// Polls the resolver directly, for pollers living in the same process.
pub struct ResolverSource {
    resolver: Arc<StatusResolver>,
    caller: Option<ShopIdentity>,
}

impl ResolverSource {
    pub fn new(resolver: Arc<StatusResolver>, caller: Option<ShopIdentity>) -> Self {
        Self { resolver, caller }
    }
}

#[async_trait]
impl StatusSource for ResolverSource {
    async fn check(&self, job_id: &str) -> Result<StatusView, CheckError> {
        self.resolver
            .resolve(job_id, self.caller.as_ref())
            .await
            .map_err(|e| match e {
                ResolveError::NotFound => CheckError::NotFound,
                ResolveError::AuthRequired | ResolveError::MissingApiKey => CheckError::Unauthorized(401),
                ResolveError::Upstream(_) => CheckError::Status(502),
                other => CheckError::Transport(other.to_string()),
            })
    }
}
