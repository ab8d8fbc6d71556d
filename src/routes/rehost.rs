use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;
use crate::auth::ShopIdentity;
use crate::error::ApiError;
use crate::services::rehost::RehostTask;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RehostResponse {
    pub job_id: String,
    pub scheduled: bool,
}

/// POST /api/imai/jobs/{jobId}/rehost: queue asset copying again.
pub async fn retrigger(
    State(state): State<AppState>,
    shop: ShopIdentity,
    Path(job_id): Path<String>,
) -> Result<(StatusCode, Json<RehostResponse>), ApiError> {
    let scheduler = state
        .rehost
        .clone()
        .ok_or_else(|| ApiError::Unavailable("Asset rehosting is not configured".to_string()))?;

    let job = state
        .jobs
        .find(&job_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .filter(|job| job.shop == shop.shop())
        .ok_or_else(|| ApiError::NotFound("Job not found".to_string()))?;

    let Some(task) = RehostTask::for_job(&job) else {
        return Ok((
            StatusCode::OK,
            Json(RehostResponse {
                job_id,
                scheduled: false,
            }),
        ));
    };

    scheduler.schedule(&task).await.map_err(|e| {
        tracing::warn!(job_id = %job_id, error = %e, "Rehost queue unavailable");
        ApiError::Unavailable("Rehost queue unavailable".to_string())
    })?;
    tracing::info!(job_id = %job_id, shop = %shop.shop(), "Asset rehost re-triggered");

    Ok((
        StatusCode::ACCEPTED,
        Json(RehostResponse {
            job_id,
            scheduled: true,
        }),
    ))
}
