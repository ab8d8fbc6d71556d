use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;

use crate::app_state::AppState;
use crate::auth::ShopIdentity;
use crate::error::ApiError;
use crate::models::generation::{GenerateRequest, SubmitResponse};
use crate::models::job::EndpointKind;

/// POST /api/imai/generate: start a marketing or design generation.
pub async fn generate(
    State(state): State<AppState>,
    shop: ShopIdentity,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(request) = payload?;
    let kind = match request.mode {
        None => EndpointKind::Marketing,
        Some(EndpointKind::Ecommerce) => {
            return Err(ApiError::BadRequest(
                "use /api/imai/generate/ecommerce for product listings".to_string(),
            ))
        }
        Some(kind) => kind,
    };

    let response = state.submissions.submit(&shop, kind, &request).await?;
    Ok(Json(response))
}

/// POST /api/imai/generate/ecommerce: start a product listing generation.
pub async fn generate_ecommerce(
    State(state): State<AppState>,
    shop: ShopIdentity,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let Json(request) = payload?;
    let response = state
        .submissions
        .submit(&shop, EndpointKind::Ecommerce, &request)
        .await?;
    Ok(Json(response))
}
