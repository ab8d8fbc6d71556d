use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// GET /metrics: Prometheus text exposition.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the service emits.
pub fn describe() {
    metrics::describe_counter!(
        "generation_jobs_submitted_total",
        "Generation jobs accepted by IMAI, by pipeline"
    );
    metrics::describe_counter!(
        "webhook_deliveries_total",
        "IMAI webhook deliveries applied, by merge outcome"
    );
    metrics::describe_counter!(
        "webhook_rejections_total",
        "IMAI webhook deliveries rejected, by reason"
    );
    metrics::describe_counter!(
        "status_fallback_queries_total",
        "Status lookups answered by querying IMAI"
    );
    metrics::describe_gauge!("rehost_queue_depth", "Pending asset rehost tasks");
}
