use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::db::queries;
use crate::models::job::{Job, JobUpdate, MergeOutcome, UNASSIGNED_SHOP};

/// Result of an upsert: the record as stored afterwards and what changed.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertResult {
    pub job: Job,
    pub outcome: MergeOutcome,
}

/// Durable keyed store of generation jobs.
///
/// `upsert` must be one atomic read-modify-write per job id: the webhook
/// ingestor and any number of status refreshes may race on the same job.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn find(&self, job_id: &str) -> Result<Option<Job>, StoreError>;

    async fn upsert(&self, job_id: &str, update: &JobUpdate) -> Result<UpsertResult, StoreError>;

    async fn record_rehost(&self, job_id: &str, keys: &[String]) -> Result<(), StoreError>;

    async fn list_unassigned(&self, limit: i64) -> Result<Vec<Job>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// PostgreSQL-backed job store.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn find(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        queries::get_job(&self.pool, job_id).await
    }

    async fn upsert(&self, job_id: &str, update: &JobUpdate) -> Result<UpsertResult, StoreError> {
        queries::upsert_job(&self.pool, job_id, update).await
    }

    async fn record_rehost(&self, job_id: &str, keys: &[String]) -> Result<(), StoreError> {
        queries::record_rehost(&self.pool, job_id, keys).await
    }

    async fn list_unassigned(&self, limit: i64) -> Result<Vec<Job>, StoreError> {
        queries::list_unassigned_jobs(&self.pool, limit).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// In-process job store for development and tests. Every upsert holds the
/// write lock for the whole merge.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn find(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn upsert(&self, job_id: &str, update: &JobUpdate) -> Result<UpsertResult, StoreError> {
        let now = Utc::now();
        let mut jobs = self.jobs.write().await;

        match jobs.get_mut(job_id) {
            Some(job) => {
                let outcome = job.merge(update, now);
                Ok(UpsertResult {
                    job: job.clone(),
                    outcome,
                })
            }
            None => {
                let job = Job::create(job_id, update, now);
                jobs.insert(job_id.to_string(), job.clone());
                Ok(UpsertResult {
                    job,
                    outcome: MergeOutcome::Inserted,
                })
            }
        }
    }

    async fn record_rehost(&self, job_id: &str, keys: &[String]) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        let now = Utc::now();
        job.rehosted_keys = keys.to_vec();
        job.rehosted_at = Some(now);
        job.updated_at = now;
        Ok(())
    }

    async fn list_unassigned(&self, limit: i64) -> Result<Vec<Job>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut unassigned: Vec<Job> = jobs
            .values()
            .filter(|j| j.shop == UNASSIGNED_SHOP)
            .cloned()
            .collect();
        unassigned.sort_by_key(|j| j.created_at);
        unassigned.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(unassigned)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Stored job is invalid: {0}")]
    Corrupt(String),
}
