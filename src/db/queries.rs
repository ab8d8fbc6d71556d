use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Row};

use crate::models::job::{EndpointKind, Job, JobStatus, JobUpdate, MergeOutcome};
use crate::services::job_store::{StoreError, UpsertResult};

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<JobStatus>()
        .map_err(|_| StoreError::Corrupt(format!("unknown job status '{status}'")))?;

    let endpoint_kind = row
        .try_get::<Option<String>, _>("endpoint_kind")?
        .map(|kind| {
            kind.parse::<EndpointKind>()
                .map_err(|_| StoreError::Corrupt(format!("unknown endpoint kind '{kind}'")))
        })
        .transpose()?;

    let rehosted_keys: Json<Vec<String>> = row.try_get("rehosted_keys")?;

    Ok(Job {
        job_id: row.try_get("job_id")?,
        shop: row.try_get("shop")?,
        endpoint_kind,
        status,
        result: row.try_get("result")?,
        error: row.try_get("error")?,
        webhook_delivered: row.try_get("webhook_delivered")?,
        prompt: row.try_get("prompt")?,
        image_url: row.try_get("image_url")?,
        completed_at: row.try_get("completed_at")?,
        rehosted_keys: rehosted_keys.0,
        rehosted_at: row.try_get("rehosted_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, job_id: &str) -> Result<Option<Job>, StoreError> {
    let row = sqlx::query(
        r#"
        SELECT job_id, shop, endpoint_kind, status, result, error, webhook_delivered,
               prompt, image_url, completed_at, rehosted_keys, rehosted_at,
               created_at, updated_at
        FROM generation_jobs
        WHERE job_id = $1
        "#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Insert or merge a job update as one transaction.
///
/// The insert races are settled by the primary key; an existing row is locked
/// with `FOR UPDATE` so concurrent upserts for one job id serialize and the
/// merge always sees the latest committed state.
pub async fn upsert_job(
    pool: &PgPool,
    job_id: &str,
    update: &JobUpdate,
) -> Result<UpsertResult, StoreError> {
    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let fresh = Job::create(job_id, update, now);
    let inserted = sqlx::query(
        r#"
        INSERT INTO generation_jobs (job_id, shop, endpoint_kind, status, result, error,
                                     webhook_delivered, prompt, image_url, completed_at,
                                     rehosted_keys, rehosted_at, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (job_id) DO NOTHING
        "#,
    )
    .bind(&fresh.job_id)
    .bind(&fresh.shop)
    .bind(fresh.endpoint_kind.map(|k| k.to_string()))
    .bind(fresh.status.as_str())
    .bind(&fresh.result)
    .bind(&fresh.error)
    .bind(fresh.webhook_delivered)
    .bind(&fresh.prompt)
    .bind(&fresh.image_url)
    .bind(fresh.completed_at)
    .bind(Json(&fresh.rehosted_keys))
    .bind(fresh.rehosted_at)
    .bind(fresh.created_at)
    .bind(fresh.updated_at)
    .execute(&mut *tx)
    .await?
    .rows_affected()
        == 1;

    if inserted {
        tx.commit().await?;
        return Ok(UpsertResult {
            job: fresh,
            outcome: MergeOutcome::Inserted,
        });
    }

    let row = sqlx::query(
        r#"
        SELECT job_id, shop, endpoint_kind, status, result, error, webhook_delivered,
               prompt, image_url, completed_at, rehosted_keys, rehosted_at,
               created_at, updated_at
        FROM generation_jobs
        WHERE job_id = $1
        FOR UPDATE
        "#,
    )
    .bind(job_id)
    .fetch_one(&mut *tx)
    .await?;

    let mut job = job_from_row(&row)?;
    let outcome = job.merge(update, now);
    if outcome == MergeOutcome::Applied {
        write_merged(&mut tx, &job).await?;
    }
    tx.commit().await?;

    Ok(UpsertResult { job, outcome })
}

async fn write_merged(conn: &mut PgConnection, job: &Job) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE generation_jobs
        SET shop = $2,
            endpoint_kind = $3,
            status = $4,
            result = $5,
            error = $6,
            webhook_delivered = $7,
            prompt = $8,
            image_url = $9,
            completed_at = $10,
            updated_at = $11
        WHERE job_id = $1
        "#,
    )
    .bind(&job.job_id)
    .bind(&job.shop)
    .bind(job.endpoint_kind.map(|k| k.to_string()))
    .bind(job.status.as_str())
    .bind(&job.result)
    .bind(&job.error)
    .bind(job.webhook_delivered)
    .bind(&job.prompt)
    .bind(&job.image_url)
    .bind(job.completed_at)
    .bind(job.updated_at)
    .execute(conn)
    .await?;

    Ok(())
}

/// Record the object keys generated assets were copied to.
pub async fn record_rehost(
    pool: &PgPool,
    job_id: &str,
    keys: &[String],
) -> Result<(), StoreError> {
    let updated = sqlx::query(
        r#"
        UPDATE generation_jobs
        SET rehosted_keys = $2,
            rehosted_at = NOW(),
            updated_at = NOW()
        WHERE job_id = $1
        "#,
    )
    .bind(job_id)
    .bind(Json(keys))
    .execute(pool)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(StoreError::NotFound(job_id.to_string()));
    }
    Ok(())
}

/// Jobs recorded under the placeholder tenant, oldest first.
pub async fn list_unassigned_jobs(pool: &PgPool, limit: i64) -> Result<Vec<Job>, StoreError> {
    let rows = sqlx::query(
        r#"
        SELECT job_id, shop, endpoint_kind, status, result, error, webhook_delivered,
               prompt, image_url, completed_at, rehosted_keys, rehosted_at,
               created_at, updated_at
        FROM generation_jobs
        WHERE shop = 'unassigned'
        ORDER BY created_at ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}
