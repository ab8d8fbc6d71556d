use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub store: ComponentHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rehost_queue: Option<ComponentHealth>,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    fn from_check<E>(started: std::time::Instant, result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self {
                status: "ok".to_string(),
                latency_ms: Some(started.elapsed().as_millis() as u64),
            },
            Err(_) => Self {
                status: "error".to_string(),
                latency_ms: None,
            },
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// GET /health: job store and (when configured) rehost queue status.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let start = std::time::Instant::now();
    let store = ComponentHealth::from_check(start, state.jobs.health_check().await);

    let rehost_queue = match &state.rehost {
        Some(scheduler) => {
            let start = std::time::Instant::now();
            Some(ComponentHealth::from_check(start, scheduler.health_check().await))
        }
        None => None,
    };

    let all_healthy = store.is_ok() && rehost_queue.as_ref().is_none_or(ComponentHealth::is_ok);
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            store,
            rehost_queue,
        },
    };

    (status_code, Json(response))
}
