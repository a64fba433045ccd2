mod common;

use common::{BUCKET, MockObjectStore, SAMPLE_EXPORT};
use healthion_ingest::services::conversion::{
    ConversionMonitor, ConversionOutcome, ConversionService, FailureKind, TracingMonitor,
};
use healthion_ingest::services::dispatcher::{ConversionJob, TaskDispatcher, WorkerPool};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

fn service(storage: &Arc<MockObjectStore>, scratch: &Path) -> ConversionService {
    ConversionService::new(
        storage.clone(),
        Arc::new(TracingMonitor),
        2,
        Some(scratch.to_path_buf()),
    )
}

fn scratch_is_empty(scratch: &Path) -> bool {
    std::fs::read_dir(scratch).unwrap().next().is_none()
}

#[tokio::test]
async fn test_export_converted_to_tables() {
    let storage = Arc::new(MockObjectStore::new());
    storage.put(BUCKET, "1/raw/export.xml", SAMPLE_EXPORT);
    let scratch = tempfile::tempdir().unwrap();

    let outcome = service(&storage, scratch.path())
        .convert(BUCKET, "1/raw/export.xml")
        .await;

    let ConversionOutcome::Converted { artifacts, rows } = outcome else {
        panic!("conversion failed: {:?}", outcome);
    };
    assert_eq!(rows, 4);
    let keys: Vec<&str> = artifacts.iter().map(|a| a.key.as_str()).collect();
    assert_eq!(
        keys,
        vec![
            "1/processed/export.parquet",
            "1/processed/export.workouts.parquet",
            "1/processed/export.workout_stats.parquet",
        ]
    );

    for artifact in &artifacts {
        let stored = storage.get(BUCKET, &artifact.key).unwrap();
        assert_eq!(stored.len() as u64, artifact.size);
        assert_eq!(artifact.sha256.len(), 64);
        assert_eq!(&stored[..4], b"PAR1");
    }
    assert!(scratch_is_empty(scratch.path()));
}

#[tokio::test]
async fn test_conversion_is_idempotent() {
    let storage = Arc::new(MockObjectStore::new());
    storage.put(BUCKET, "7/raw/export.xml", SAMPLE_EXPORT);
    let scratch = tempfile::tempdir().unwrap();
    let service = service(&storage, scratch.path());

    let first = service.convert(BUCKET, "7/raw/export.xml").await;
    let before = storage.get(BUCKET, "7/processed/export.parquet").unwrap();
    let second = service.convert(BUCKET, "7/raw/export.xml").await;
    let after = storage.get(BUCKET, "7/processed/export.parquet").unwrap();

    assert!(first.is_success());
    assert_eq!(first, second);
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_malformed_export_uploads_nothing() {
    let storage = Arc::new(MockObjectStore::new());
    storage.put(
        BUCKET,
        "1/raw/broken.xml",
        r#"<HealthData><Record type="x" value="1"></HealthData>"#,
    );
    let scratch = tempfile::tempdir().unwrap();

    let outcome = service(&storage, scratch.path())
        .convert(BUCKET, "1/raw/broken.xml")
        .await;

    assert!(matches!(
        outcome,
        ConversionOutcome::Failed {
            kind: FailureKind::Parse,
            ..
        }
    ));
    assert_eq!(storage.keys(), vec!["1/raw/broken.xml".to_string()]);
    assert!(scratch_is_empty(scratch.path()));
}

#[tokio::test]
async fn test_upload_failure_is_reported() {
    let storage = Arc::new(MockObjectStore::new());
    storage.put(BUCKET, "1/raw/export.xml", SAMPLE_EXPORT);
    *storage.fail_uploads.lock().unwrap() = true;
    let scratch = tempfile::tempdir().unwrap();

    let outcome = service(&storage, scratch.path())
        .convert(BUCKET, "1/raw/export.xml")
        .await;

    assert!(matches!(
        outcome,
        ConversionOutcome::Failed {
            kind: FailureKind::Upload,
            ..
        }
    ));
    assert_eq!(storage.keys(), vec!["1/raw/export.xml".to_string()]);
    assert!(scratch_is_empty(scratch.path()));
}

#[tokio::test]
async fn test_failed_main_upload_removes_uploaded_siblings() {
    let storage = Arc::new(MockObjectStore::new());
    storage.put(BUCKET, "1/raw/export.xml", SAMPLE_EXPORT);
    storage
        .fail_upload_keys
        .lock()
        .unwrap()
        .push("1/processed/export.parquet".to_string());
    let scratch = tempfile::tempdir().unwrap();

    let outcome = service(&storage, scratch.path())
        .convert(BUCKET, "1/raw/export.xml")
        .await;

    assert!(matches!(
        outcome,
        ConversionOutcome::Failed {
            kind: FailureKind::Upload,
            ..
        }
    ));
    assert_eq!(storage.keys(), vec!["1/raw/export.xml".to_string()]);
    assert!(scratch_is_empty(scratch.path()));
}

#[tokio::test]
async fn test_truncated_export_uploads_nothing() {
    let truncated = SAMPLE_EXPORT
        .split_once("</Workout>")
        .map(|(head, _)| head)
        .unwrap();
    let storage = Arc::new(MockObjectStore::new());
    storage.put(BUCKET, "1/raw/cut.xml", truncated);
    let scratch = tempfile::tempdir().unwrap();

    let outcome = service(&storage, scratch.path())
        .convert(BUCKET, "1/raw/cut.xml")
        .await;

    assert!(matches!(
        outcome,
        ConversionOutcome::Failed {
            kind: FailureKind::Parse,
            ..
        }
    ));
    assert_eq!(storage.keys(), vec!["1/raw/cut.xml".to_string()]);
    assert!(scratch_is_empty(scratch.path()));
}

#[tokio::test]
async fn test_invalid_key_and_missing_object() {
    let storage = Arc::new(MockObjectStore::new());
    let scratch = tempfile::tempdir().unwrap();
    let service = service(&storage, scratch.path());

    let outcome = service.convert(BUCKET, "1/processed/export.parquet").await;
    assert!(matches!(
        outcome,
        ConversionOutcome::Failed {
            kind: FailureKind::InvalidKey,
            ..
        }
    ));

    let outcome = service.convert(BUCKET, "1/raw/missing.xml").await;
    assert!(matches!(
        outcome,
        ConversionOutcome::Failed {
            kind: FailureKind::Fetch,
            ..
        }
    ));
    assert!(scratch_is_empty(scratch.path()));
}

#[derive(Default)]
struct RecordingMonitor {
    outcomes: Mutex<Vec<(String, bool)>>,
}

impl ConversionMonitor for RecordingMonitor {
    fn report(&self, job: &ConversionJob, outcome: &ConversionOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .push((job.key.clone(), outcome.is_success()));
    }
}

#[tokio::test]
async fn test_worker_pool_runs_conversions() {
    let storage = Arc::new(MockObjectStore::new());
    storage.put(BUCKET, "1/raw/export.xml", SAMPLE_EXPORT);
    let scratch = tempfile::tempdir().unwrap();
    let monitor = Arc::new(RecordingMonitor::default());

    let converter = Arc::new(ConversionService::new(
        storage.clone(),
        monitor.clone(),
        100,
        Some(scratch.path().to_path_buf()),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (pool, handle) = WorkerPool::start(converter, 2, 8, shutdown_rx);

    pool.dispatch(BUCKET, "1/raw/export.xml").await.unwrap();
    pool.dispatch(BUCKET, "1/raw/absent.xml").await.unwrap();

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    let mut outcomes = monitor.outcomes.lock().unwrap().clone();
    outcomes.sort();
    assert_eq!(
        outcomes,
        vec![
            ("1/raw/absent.xml".to_string(), false),
            ("1/raw/export.xml".to_string(), true),
        ]
    );
    assert!(storage.get(BUCKET, "1/processed/export.parquet").is_some());
}
