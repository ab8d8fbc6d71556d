use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::job::{EndpointKind, JobPhase, JobStatus};

/// Request to start a generation job.
///
/// Shared by the marketing/design route (which reads `mode`) and the
/// e-commerce route (which ignores it).
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct GenerateRequest {
    #[garde(length(max = 4000))]
    pub prompt: Option<String>,

    #[garde(length(max = 2048))]
    pub url: Option<String>,

    #[garde(skip)]
    pub mode: Option<EndpointKind>,
}

/// Acknowledgement IMAI returns for an async submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAck {
    pub job_id: Option<String>,
    pub status: Option<String>,
    pub accepted: Option<bool>,
    pub message: Option<String>,
}

/// Response after a job has been submitted and recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub accepted: bool,
    pub job_id: String,
    pub status: JobStatus,
    pub status_endpoint: String,
    pub message: String,
}

/// `{status, result?, error?}`: what IMAI's status endpoint returns and what
/// this service serves to pollers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusView {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusView {
    pub fn phase(&self) -> JobPhase {
        JobPhase::of(self.status, self.result.as_ref())
    }
}

/// Typed view over a completed job's result payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationResult {
    pub version_id: Option<String>,
    pub urls: Vec<String>,
    pub asset_ids: Vec<String>,
    pub failed_ids: Vec<String>,
    pub pending_ids: Vec<String>,
    pub link_ids: Vec<String>,
}

impl GenerationResult {
    /// Field-by-field parse. Only a non-object payload yields `None`; null or
    /// mistyped fields read as empty, and non-string ids are kept as their
    /// JSON text.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let object = value.as_object()?;
        let ids = |key: &str| -> Vec<String> {
            object
                .get(key)
                .and_then(serde_json::Value::as_array)
                .map(|items| items.iter().filter_map(id_text).collect())
                .unwrap_or_default()
        };
        Some(Self {
            version_id: object.get("versionId").and_then(id_text),
            urls: ids("urls"),
            asset_ids: ids("assetIds"),
            failed_ids: ids("failedIds"),
            pending_ids: ids("pendingIds"),
            link_ids: ids("linkIds"),
        })
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_ids.is_empty()
    }
}

/// True when a result still lists pending batch items, whatever else it holds.
pub fn has_pending_items(result: &serde_json::Value) -> bool {
    result
        .get("pendingIds")
        .and_then(serde_json::Value::as_array)
        .is_some_and(|items| !items.is_empty())
}

fn id_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Body of an IMAI webhook delivery. Every field is optional here so that
/// missing fields are reported as validation errors, not parse errors.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub event: Option<String>,
    pub job_id: Option<String>,
    pub status: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<serde_json::Value>,
    pub completed_at: Option<serde_json::Value>,
}

impl WebhookPayload {
    /// Failure reason as text; IMAI sends either a string or `{message}`.
    pub fn error_message(&self) -> Option<String> {
        match self.error.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Object(map) => map
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .or_else(|| Some(serde_json::Value::Object(map.clone()).to_string())),
            other => Some(other.to_string()),
        }
    }

    /// `completedAt` as RFC 3339 text or epoch milliseconds.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match self.completed_at.as_ref()? {
            serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            serde_json::Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
            _ => None,
        }
    }
}
