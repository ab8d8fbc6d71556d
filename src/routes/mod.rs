use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

pub mod generate;
pub mod health;
pub mod metrics;
pub mod rehost;
pub mod status;
pub mod webhook;

/// API routes. `/metrics` is attached separately since it carries its own state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/imai/generate", post(generate::generate))
        .route("/api/imai/generate/ecommerce", post(generate::generate_ecommerce))
        .route("/api/imai/status", get(status::job_status))
        .route("/api/imai/webhook", post(webhook::receive))
        .route("/api/imai/jobs/{job_id}/rehost", post(rehost::retrigger))
        .with_state(state)
}
