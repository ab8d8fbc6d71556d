//! Shared fixtures: an in-memory app wired to a scripted IMAI.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request};
use axum::Router;
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use imai_job_sync::app_state::AppState;
use imai_job_sync::auth::{SessionClaims, SessionVerifier};
use imai_job_sync::models::generation::{StatusView, SubmitAck};
use imai_job_sync::routes;
use imai_job_sync::services::credentials::{ApiToken, CredentialError, CredentialStore};
use imai_job_sync::services::imai::{GenerationService, ImaiError, SubmitRequest};
use imai_job_sync::services::job_store::MemoryJobStore;
use imai_job_sync::services::queue::QueueError;
use imai_job_sync::services::rehost::{RehostScheduler, RehostTask};
use imai_job_sync::services::signature;
use imai_job_sync::services::submission::WebhookCallback;

pub const SHOP: &str = "demo.myshopify.com";
pub const OTHER_SHOP: &str = "other.myshopify.com";
pub const KEYLESS_SHOP: &str = "keyless.myshopify.com";
pub const SESSION_SECRET: &str = "shpss_test_secret";
pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const JOB_ID: &str = "job_1700000000_abc123def";

/// Scripted stand-in for the IMAI API.
#[derive(Default)]
pub struct MockImai {
    pub submissions: Mutex<Vec<SubmitRequest>>,
    pub remote: Mutex<HashMap<String, StatusView>>,
    pub status_calls: AtomicUsize,
    pub fail_submit: AtomicBool,
    pub omit_job_id: AtomicBool,
    pub tokens_seen: Mutex<Vec<String>>,
}

impl MockImai {
    pub fn set_remote(&self, job_id: &str, view: StatusView) {
        self.remote.lock().unwrap().insert(job_id.to_string(), view);
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerationService for MockImai {
    async fn submit(&self, token: &ApiToken, request: &SubmitRequest) -> Result<SubmitAck, ImaiError> {
        self.tokens_seen.lock().unwrap().push(token.expose().to_string());
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(ImaiError::Rejected {
                status: 503,
                error: Some("Service busy".to_string()),
                message: None,
            });
        }
        self.submissions.lock().unwrap().push(request.clone());
        Ok(SubmitAck {
            job_id: (!self.omit_job_id.load(Ordering::SeqCst)).then(|| JOB_ID.to_string()),
            status: Some("queued".to_string()),
            accepted: Some(true),
            message: None,
        })
    }

    async fn fetch_status(&self, token: &ApiToken, job_id: &str) -> Result<Option<StatusView>, ImaiError> {
        self.tokens_seen.lock().unwrap().push(token.expose().to_string());
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.remote.lock().unwrap().get(job_id).cloned())
    }
}

/// Plaintext per-shop keys.
pub struct MemoryCredentials {
    keys: HashMap<String, String>,
}

impl Default for MemoryCredentials {
    fn default() -> Self {
        let mut keys = HashMap::new();
        keys.insert(SHOP.to_string(), "imai_live_demo_key_0001".to_string());
        keys.insert(OTHER_SHOP.to_string(), "imai_live_other_key_0002".to_string());
        Self { keys }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentials {
    async fn bearer_token(&self, shop: &str) -> Result<Option<ApiToken>, CredentialError> {
        Ok(self.keys.get(shop).map(ApiToken::new))
    }
}

/// Collects scheduled rehost tasks.
#[derive(Default)]
pub struct RecordingScheduler {
    pub tasks: Mutex<Vec<RehostTask>>,
}

impl RecordingScheduler {
    pub fn tasks(&self) -> Vec<RehostTask> {
        self.tasks.lock().unwrap().clone()
    }

    /// Scheduling happens on a spawned task; give it a moment.
    pub async fn wait_for(&self, count: usize) -> Vec<RehostTask> {
        for _ in 0..100 {
            if self.tasks.lock().unwrap().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.tasks()
    }
}

#[async_trait]
impl RehostScheduler for RecordingScheduler {
    async fn schedule(&self, task: &RehostTask) -> Result<(), QueueError> {
        self.tasks.lock().unwrap().push(task.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub jobs: Arc<MemoryJobStore>,
    pub imai: Arc<MockImai>,
    pub scheduler: Arc<RecordingScheduler>,
}

/// Build the full router over in-memory collaborators.
pub fn build_app(webhook_secret: Option<&str>) -> TestApp {
    let jobs = Arc::new(MemoryJobStore::new());
    let imai = Arc::new(MockImai::default());
    let scheduler = Arc::new(RecordingScheduler::default());

    let state = AppState::new(
        jobs.clone(),
        Arc::new(MemoryCredentials::default()),
        imai.clone(),
        Some(scheduler.clone()),
        SessionVerifier::new(SESSION_SECRET, None),
        WebhookCallback {
            url: "https://app.example.com/api/imai/webhook".to_string(),
            secret: webhook_secret.map(str::to_string),
        },
    );

    TestApp {
        router: routes::router(state),
        jobs,
        imai,
        scheduler,
    }
}

/// A session token for `shop`, signed the way the Shopify admin signs them.
pub fn session_token(shop: &str) -> String {
    let claims = SessionClaims {
        dest: format!("https://{shop}"),
        exp: chrono::Utc::now().timestamp() + 600,
        sub: Some("1".to_string()),
        aud: None,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SESSION_SECRET.as_bytes()),
    )
    .unwrap()
}

pub fn json_request(method: Method, uri: &str, shop: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(shop) = shop {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", session_token(shop)));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get_request(uri: &str, shop: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(uri);
    if let Some(shop) = shop {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", session_token(shop)));
    }
    builder.body(Body::empty()).unwrap()
}

/// A webhook delivery; signed when `secret` is given.
pub fn webhook_request(body: &Value, secret: Option<&str>) -> Request<Body> {
    let raw = body.to_string();
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/api/imai/webhook")
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-IMAI-Event", "generation.job.finished")
        .header("X-IMAI-Attempt", "1");
    if let Some(job_id) = body["jobId"].as_str() {
        builder = builder.header("X-IMAI-Job-Id", job_id);
    }
    if let Some(secret) = secret {
        builder = builder.header("X-IMAI-Signature", signature::sign(secret, raw.as_bytes()));
    }
    builder.body(Body::from(raw)).unwrap()
}

/// The completion payload IMAI sends for a three-image job.
pub fn completed_payload(job_id: &str) -> Value {
    serde_json::json!({
        "event": "generation.job.finished",
        "jobId": job_id,
        "status": "completed",
        "result": {
            "versionId": format!("v_{job_id}"),
            "urls": [
                "https://cdn.imai.studio/assets/1.png",
                "https://cdn.imai.studio/assets/2.png",
                "https://cdn.imai.studio/assets/3.png"
            ],
            "assetIds": ["asset_1", "asset_2", "asset_3"],
            "failedIds": [],
            "pendingIds": [],
            "linkIds": []
        },
        "completedAt": "2026-01-01T12:00:00Z"
    })
}

pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
}
