//! Asset rehost against a local asset server and an in-memory sink.

use async_trait::async_trait;
use axum::routing::get;
use axum::Router;
use serde_json::json;
use std::sync::{Arc, Mutex};

use imai_job_sync::models::job::{JobStatus, JobUpdate};
use imai_job_sync::services::job_store::{JobStore, MemoryJobStore};
use imai_job_sync::services::rehost::{AssetRehoster, AssetSink, RehostReport, RehostTask};
use imai_job_sync::services::storage::StorageError;

const JOB_ID: &str = "job_1700000000_abc123def";
const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

#[derive(Default)]
struct MemorySink {
    objects: Mutex<Vec<(String, usize, String)>>,
}

#[async_trait]
impl AssetSink for MemorySink {
    async fn put(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        self.objects
            .lock()
            .unwrap()
            .push((key.to_string(), data.len(), content_type.to_string()));
        Ok(())
    }
}

async fn asset_server() -> String {
    let app = Router::new()
        .route("/a.png", get(|| async { PNG_MAGIC.to_vec() }))
        .route("/b.jpg", get(|| async { JPEG_MAGIC.to_vec() }))
        .route("/c", get(|| async { b"plain bytes".to_vec() }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn completed_job(jobs: &MemoryJobStore, base: &str, pending: &[&str]) {
    jobs.upsert(
        JOB_ID,
        &JobUpdate::from_webhook(
            JobStatus::Completed,
            Some(json!({
                "urls": [format!("{base}/a.png"), format!("{base}/b.jpg"), format!("{base}/c")],
                "pendingIds": pending,
            })),
            None,
            None,
        ),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_rehost_copies_assets_once() {
    let base = asset_server().await;
    let jobs = Arc::new(MemoryJobStore::new());
    completed_job(&jobs, &base, &[]).await;

    let sink = Arc::new(MemorySink::default());
    let rehoster = AssetRehoster::new(sink.clone(), jobs.clone()).unwrap();
    let task = RehostTask::for_job(&jobs.find(JOB_ID).await.unwrap().unwrap()).unwrap();

    let report = rehoster.rehost(&task).await.unwrap();
    let expected = vec![
        format!("generated/{JOB_ID}/0.png"),
        format!("generated/{JOB_ID}/1.jpg"),
        format!("generated/{JOB_ID}/2.bin"),
    ];
    assert_eq!(report, RehostReport::Copied(expected.clone()));

    let objects = sink.objects.lock().unwrap().clone();
    assert_eq!(objects[0].2, "image/png");
    assert_eq!(objects[1].2, "image/jpeg");
    assert_eq!(objects[2].2, "application/octet-stream");

    let job = jobs.find(JOB_ID).await.unwrap().unwrap();
    assert_eq!(job.rehosted_keys, expected);
    assert!(job.rehosted_at.is_some());

    // redelivered task is a no-op
    assert_eq!(rehoster.rehost(&task).await.unwrap(), RehostReport::AlreadyDone);
    assert_eq!(sink.objects.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_rehost_waits_for_pending_items() {
    let base = asset_server().await;
    let jobs = Arc::new(MemoryJobStore::new());
    completed_job(&jobs, &base, &["asset_3"]).await;

    let sink = Arc::new(MemorySink::default());
    let rehoster = AssetRehoster::new(sink.clone(), jobs).unwrap();
    let task = RehostTask {
        job_id: JOB_ID.to_string(),
        urls: vec![format!("{base}/a.png")],
        attempt: 0,
    };

    assert_eq!(rehoster.rehost(&task).await.unwrap(), RehostReport::NotReady);
    assert!(sink.objects.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_rehost_download_failure_records_nothing() {
    let base = asset_server().await;
    let jobs = Arc::new(MemoryJobStore::new());
    jobs.upsert(
        JOB_ID,
        &JobUpdate::from_webhook(
            JobStatus::Completed,
            Some(json!({"urls": [format!("{base}/missing.png")]})),
            None,
            None,
        ),
    )
    .await
    .unwrap();

    let rehoster = AssetRehoster::new(Arc::new(MemorySink::default()), jobs.clone()).unwrap();
    let task = RehostTask::for_job(&jobs.find(JOB_ID).await.unwrap().unwrap()).unwrap();

    assert!(rehoster.rehost(&task).await.is_err());
    assert!(jobs.find(JOB_ID).await.unwrap().unwrap().rehosted_keys.is_empty());
}
