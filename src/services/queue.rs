use async_trait::async_trait;
use redis::AsyncCommands;

use crate::services::rehost::{RehostScheduler, RehostTask};

const QUEUE_KEY: &str = "imai_job_sync:rehost";
const PROCESSING_KEY: &str = "imai_job_sync:rehost:processing";

/// Redis-backed queue of asset rehost tasks with retry support.
pub struct JobQueue {
    client: redis::Client,
}

impl JobQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    /// Enqueue a rehost task.
    pub async fn enqueue(&self, task: &RehostTask) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let payload = serde_json::to_string(task).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Dequeue a task for processing (pop with move to processing list).
    pub async fn dequeue(&self) -> Result<Option<RehostTask>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let result: Option<String> = conn
            .rpoplpush(QUEUE_KEY, PROCESSING_KEY)
            .await
            .map_err(QueueError::Redis)?;

        match result {
            Some(payload) => {
                let task: RehostTask = serde_json::from_str(&payload).map_err(QueueError::Serialize)?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    /// Check Redis connectivity (for health checks).
    pub async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Get the current queue depth (pending tasks).
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let depth: u64 = conn.llen(QUEUE_KEY).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    /// Mark a task as finished (remove from processing list).
    pub async fn complete(&self, task: &RehostTask) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let payload = serde_json::to_string(task).map_err(QueueError::Serialize)?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[async_trait]
impl RehostScheduler for JobQueue {
    async fn schedule(&self, task: &RehostTask) -> Result<(), QueueError> {
        self.enqueue(task).await
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        self.ping().await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
