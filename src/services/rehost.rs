//! Copying generated assets from IMAI's CDN into our own R2 bucket.
//!
//! Runs after a webhook has been acknowledged: the ingestor only schedules a
//! task, the `worker` binary does the copying. Tasks are safe to run more
//! than once; object keys are deterministic and a job that already has
//! rehosted keys is skipped.

use async_trait::async_trait;
use image::ImageFormat;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::models::generation::GenerationResult;
use crate::models::job::{Job, JobPhase};
use crate::services::job_store::{JobStore, StoreError};
use crate::services::queue::QueueError;
use crate::services::storage::{R2Client, StorageError};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Queue payload for one job's rehost.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RehostTask {
    pub job_id: String,
    pub urls: Vec<String>,
    #[serde(default)]
    pub attempt: u32,
}

impl RehostTask {
    /// A task for a fully completed job with assets not yet copied.
    pub fn for_job(job: &Job) -> Option<Self> {
        if job.phase() != JobPhase::Completed || !job.rehosted_keys.is_empty() {
            return None;
        }
        let result = job.result.as_ref().and_then(GenerationResult::from_value)?;
        (!result.urls.is_empty()).then(|| Self {
            job_id: job.job_id.clone(),
            urls: result.urls,
            attempt: 0,
        })
    }

    pub fn retry(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// Accepts rehost tasks for later processing.
#[async_trait]
pub trait RehostScheduler: Send + Sync {
    async fn schedule(&self, task: &RehostTask) -> Result<(), QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Hand a task to the scheduler without making the caller wait for it.
pub fn schedule_in_background(
    scheduler: Arc<dyn RehostScheduler>,
    task: RehostTask,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match scheduler.schedule(&task).await {
            Ok(()) => {
                tracing::info!(job_id = %task.job_id, assets = task.urls.len(), "Asset rehost scheduled");
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %task.job_id,
                    error = %e,
                    "Failed to schedule asset rehost; it can be re-triggered later"
                );
            }
        }
    })
}

/// Destination for re-hosted assets.
#[async_trait]
pub trait AssetSink: Send + Sync {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError>;
}

#[async_trait]
impl AssetSink for R2Client {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        self.upload(key, data, content_type).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RehostReport {
    Copied(Vec<String>),
    AlreadyDone,
    /// The job is not (or no longer) in a state with final assets.
    NotReady,
}

pub struct AssetRehoster {
    http: Client,
    sink: Arc<dyn AssetSink>,
    jobs: Arc<dyn JobStore>,
}

impl AssetRehoster {
    pub fn new(sink: Arc<dyn AssetSink>, jobs: Arc<dyn JobStore>) -> Result<Self, RehostError> {
        let http = Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(RehostError::Download)?;
        Ok(Self { http, sink, jobs })
    }

    /// Copy every asset of the task's job and record the new keys.
    pub async fn rehost(&self, task: &RehostTask) -> Result<RehostReport, RehostError> {
        let job = self
            .jobs
            .find(&task.job_id)
            .await?
            .ok_or_else(|| RehostError::JobMissing(task.job_id.clone()))?;

        if !job.rehosted_keys.is_empty() {
            return Ok(RehostReport::AlreadyDone);
        }
        // the stored result is authoritative over the urls captured in the task
        let Some(current) = RehostTask::for_job(&job) else {
            return Ok(RehostReport::NotReady);
        };

        let mut keys = Vec::with_capacity(current.urls.len());
        for (index, url) in current.urls.iter().enumerate() {
            let bytes = self
                .http
                .get(url)
                .send()
                .await?
                .error_for_status()?
                .bytes()
                .await?;

            let format = image::guess_format(&bytes).ok();
            let key = object_key(&job.job_id, index, format);
            let content_type = format.map_or("application/octet-stream", |f| f.to_mime_type());

            self.sink.put(&key, &bytes, content_type).await?;
            tracing::debug!(job_id = %job.job_id, key = %key, bytes = bytes.len(), "Asset copied");
            keys.push(key);
        }

        self.jobs.record_rehost(&job.job_id, &keys).await?;
        Ok(RehostReport::Copied(keys))
    }
}

/// Deterministic object key for the `index`-th asset of a job.
pub fn object_key(job_id: &str, index: usize, format: Option<ImageFormat>) -> String {
    let safe_id: String = job_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    let ext = format
        .and_then(|f| f.extensions_str().first().copied())
        .unwrap_or("bin");
    format!("generated/{safe_id}/{index}.{ext}")
}

#[derive(Debug, thiserror::Error)]
pub enum RehostError {
    #[error("Job {0} no longer exists")]
    JobMissing(String),

    #[error("Asset download failed: {0}")]
    Download(#[from] reqwest::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
