use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::auth::ShopIdentity;
use crate::error::ApiError;
use crate::models::generation::StatusView;

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    #[serde(rename = "jobId")]
    pub job_id: Option<String>,
}

/// GET /api/imai/status?jobId=: what pollers call.
pub async fn job_status(
    State(state): State<AppState>,
    caller: Option<ShopIdentity>,
    query: Result<Query<StatusQuery>, QueryRejection>,
) -> Result<Json<StatusView>, ApiError> {
    let Query(query) = query?;
    let job_id = query
        .job_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing jobId parameter".to_string()))?;

    let view = state.resolver.resolve(job_id, caller.as_ref()).await?;
    Ok(Json(view))
}
