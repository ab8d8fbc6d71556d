use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use imai_job_sync::{
    app_state::AppState,
    auth::SessionVerifier,
    config::AppConfig,
    db, routes,
    services::{
        credentials::PgCredentialStore,
        encryption::EncryptionService,
        imai::ImaiClient,
        job_store::PgJobStore,
        queue::JobQueue,
        rehost::RehostScheduler,
        submission::WebhookCallback,
    },
};

const QUEUE_DEPTH_INTERVAL: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing imai-job-sync server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe();

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let encryption =
        EncryptionService::new(&config.encryption_key).expect("Failed to initialize encryption");
    let credentials = PgCredentialStore::new(db_pool.clone(), Arc::new(encryption));
    let imai = ImaiClient::new(&config.imai_base_url).expect("Failed to initialize IMAI client");

    let queue = match &config.redis_url {
        Some(url) => {
            tracing::info!("Connecting to Redis rehost queue");
            Some(Arc::new(JobQueue::new(url).expect("Failed to initialize rehost queue")))
        }
        None => {
            tracing::warn!("REDIS_URL not set; asset rehosting disabled");
            None
        }
    };
    if let Some(queue) = queue.clone() {
        tokio::spawn(report_queue_depth(queue));
    }

    if config.imai_webhook_secret.is_none() {
        tracing::warn!("IMAI_WEBHOOK_SECRET not set; webhook signatures will not be verified");
    }
    let callback = WebhookCallback {
        url: config.webhook_url(),
        secret: config.imai_webhook_secret.clone(),
    };
    let sessions = SessionVerifier::new(
        &config.shopify_api_secret,
        config.shopify_api_key.as_deref(),
    );

    let state = AppState::new(
        Arc::new(PgJobStore::new(db_pool)),
        Arc::new(credentials),
        Arc::new(imai),
        queue.map(|q| q as Arc<dyn RehostScheduler>),
        sessions,
        callback,
    );

    let app = routes::router(state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(2 * 1024 * 1024));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}

async fn report_queue_depth(queue: Arc<JobQueue>) {
    let mut ticker = tokio::time::interval(QUEUE_DEPTH_INTERVAL);
    loop {
        ticker.tick().await;
        match queue.queue_depth().await {
            Ok(depth) => metrics::gauge!("rehost_queue_depth").set(depth as f64),
            Err(e) => tracing::debug!(error = %e, "Could not read rehost queue depth"),
        }
    }
}
