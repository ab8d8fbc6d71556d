use imai_job_sync::{
    config::AppConfig,
    db,
    services::{
        job_store::{JobStore, PgJobStore},
        queue::JobQueue,
        rehost::{AssetRehoster, RehostReport},
        storage::R2Client,
    },
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const MAX_RETRIES: u32 = 3;
const POLL_INTERVAL_MS: u64 = 1000;
const BACKLOG_REPORT_INTERVAL: Duration = Duration::from_secs(300);
const BACKLOG_SAMPLE: i64 = 50;

struct Worker {
    queue: JobQueue,
    rehoster: AssetRehoster,
    jobs: Arc<dyn JobStore>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting asset rehost worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    let jobs: Arc<dyn JobStore> = Arc::new(PgJobStore::new(db_pool));

    let redis_url = config
        .redis_url
        .as_deref()
        .expect("REDIS_URL is required for the worker");
    let queue = JobQueue::new(redis_url).expect("Failed to initialize rehost queue");

    let r2 = config.r2().expect("R2_* settings are required for the worker");
    let storage = R2Client::new(&r2).expect("Failed to initialize R2 client");
    let rehoster =
        AssetRehoster::new(Arc::new(storage), jobs.clone()).expect("Failed to initialize rehoster");

    let worker = Worker {
        queue,
        rehoster,
        jobs,
    };

    tracing::info!("Worker ready, starting rehost loop");

    let mut last_backlog_report: Option<Instant> = None;
    loop {
        if last_backlog_report.is_none_or(|t| t.elapsed() >= BACKLOG_REPORT_INTERVAL) {
            worker.report_unassigned().await;
            last_backlog_report = Some(Instant::now());
        }

        match worker.process_next().await {
            Ok(true) => tracing::debug!("Task processed, checking for next task"),
            Ok(false) => {
                tracing::trace!("No tasks available, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error processing task, will retry");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}

impl Worker {
    /// Process the next rehost task.
    /// Returns Ok(true) if a task was processed, Ok(false) if the queue was empty.
    async fn process_next(&self) -> Result<bool, Box<dyn std::error::Error>> {
        let task = match self.queue.dequeue().await? {
            Some(t) => t,
            None => return Ok(false),
        };

        tracing::info!(
            job_id = %task.job_id,
            assets = task.urls.len(),
            attempt = task.attempt,
            "Processing rehost task"
        );

        match self.rehoster.rehost(&task).await {
            Ok(RehostReport::Copied(keys)) => {
                tracing::info!(job_id = %task.job_id, copied = keys.len(), "Assets rehosted");
            }
            Ok(RehostReport::AlreadyDone) => {
                tracing::debug!(job_id = %task.job_id, "Assets already rehosted");
            }
            Ok(RehostReport::NotReady) => {
                tracing::warn!(job_id = %task.job_id, "Job has no final assets, dropping task");
            }
            Err(e) if task.attempt + 1 >= MAX_RETRIES => {
                tracing::warn!(
                    job_id = %task.job_id,
                    attempt = task.attempt,
                    error = %e,
                    "Rehost failed after max retries"
                );
            }
            Err(e) => {
                tracing::info!(
                    job_id = %task.job_id,
                    attempt = task.attempt,
                    error = %e,
                    "Rehost failed, re-queued for retry"
                );
                self.queue.enqueue(&task.retry()).await?;
            }
        }

        self.queue.complete(&task).await?;
        Ok(true)
    }

    /// Log jobs whose webhook arrived before any submission claimed them.
    async fn report_unassigned(&self) {
        match self.jobs.list_unassigned(BACKLOG_SAMPLE).await {
            Ok(jobs) if jobs.is_empty() => {}
            Ok(jobs) => {
                for job in &jobs {
                    tracing::warn!(
                        job_id = %job.job_id,
                        status = %job.status,
                        created_at = %job.created_at,
                        "Job still awaiting tenant reconciliation"
                    );
                }
                tracing::warn!(count = jobs.len(), "Unassigned job backlog");
            }
            Err(e) => tracing::error!(error = %e, "Failed to list unassigned jobs"),
        }
    }
}
