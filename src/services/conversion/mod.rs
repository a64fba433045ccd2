//! Raw export → Parquet conversion, run as a worker pool task.

pub mod columnar;
pub mod health_xml;

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use thiserror::Error;

use crate::services::dispatcher::{ConversionJob, TaskRunner};
use crate::services::storage::{ObjectStore, StorageError};
use crate::utils::hash::sha256_hex_from_reader;
use crate::utils::keys::{processed_key, table_key};

pub const PARQUET_CONTENT_TYPE: &str = "application/vnd.apache.parquet";

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Key is not a raw upload key: {0}")]
    InvalidKey(String),

    #[error("Failed to fetch source object: {0}")]
    Fetch(#[source] StorageError),

    #[error("Failed to parse export: {0}")]
    Parse(String),

    #[error("Failed to write columnar output: {0}")]
    Write(String),

    #[error("Failed to upload artifact: {0}")]
    Upload(#[source] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    InvalidKey,
    Fetch,
    Parse,
    Write,
    Upload,
    Io,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidKey => "invalid_key",
            FailureKind::Fetch => "fetch",
            FailureKind::Parse => "parse",
            FailureKind::Write => "write",
            FailureKind::Upload => "upload",
            FailureKind::Io => "io",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ConversionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ConversionError::InvalidKey(_) => FailureKind::InvalidKey,
            ConversionError::Fetch(_) => FailureKind::Fetch,
            ConversionError::Parse(_) => FailureKind::Parse,
            ConversionError::Write(_) => FailureKind::Write,
            ConversionError::Upload(_) => FailureKind::Upload,
            ConversionError::Io(_) => FailureKind::Io,
        }
    }
}

/// An uploaded table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub table: &'static str,
    pub key: String,
    pub rows: usize,
    pub size: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    Converted { artifacts: Vec<Artifact>, rows: usize },
    Failed { kind: FailureKind, reason: String },
}

impl ConversionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ConversionOutcome::Converted { .. })
    }
}

/// Observes every finished conversion
pub trait ConversionMonitor: Send + Sync {
    fn report(&self, job: &ConversionJob, outcome: &ConversionOutcome);
}

/// Default monitor: structured log lines
pub struct TracingMonitor;

impl ConversionMonitor for TracingMonitor {
    fn report(&self, job: &ConversionJob, outcome: &ConversionOutcome) {
        match outcome {
            ConversionOutcome::Converted { artifacts, rows } => {
                let keys: Vec<&str> = artifacts.iter().map(|a| a.key.as_str()).collect();
                tracing::info!(
                    task_id = %job.task_id,
                    bucket = %job.bucket,
                    key = %job.key,
                    rows,
                    artifacts = ?keys,
                    "✅ Conversion completed"
                );
            }
            ConversionOutcome::Failed { kind, reason } => {
                tracing::error!(
                    task_id = %job.task_id,
                    bucket = %job.bucket,
                    key = %job.key,
                    kind = %kind,
                    error = %reason,
                    "❌ Conversion failed"
                );
            }
        }
    }
}

pub struct ConversionService {
    storage: Arc<dyn ObjectStore>,
    monitor: Arc<dyn ConversionMonitor>,
    batch_rows: usize,
    scratch_root: Option<PathBuf>,
}

impl ConversionService {
    pub fn new(
        storage: Arc<dyn ObjectStore>,
        monitor: Arc<dyn ConversionMonitor>,
        batch_rows: usize,
        scratch_root: Option<PathBuf>,
    ) -> Self {
        Self {
            storage,
            monitor,
            batch_rows,
            scratch_root,
        }
    }

    pub async fn convert(&self, bucket: &str, key: &str) -> ConversionOutcome {
        match self.try_convert(bucket, key).await {
            Ok(artifacts) => {
                let rows = artifacts.iter().map(|a| a.rows).sum();
                ConversionOutcome::Converted { artifacts, rows }
            }
            Err(e) => ConversionOutcome::Failed {
                kind: e.kind(),
                reason: e.to_string(),
            },
        }
    }

    fn scratch_dir(&self) -> Result<TempDir, ConversionError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("conversion-");
        let dir = match &self.scratch_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    async fn try_convert(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Vec<Artifact>, ConversionError> {
        let start = Instant::now();
        let destination =
            processed_key(key).ok_or_else(|| ConversionError::InvalidKey(key.to_string()))?;

        // Removed on drop, whichever way this function exits
        let scratch = self.scratch_dir()?;
        let input = scratch.path().join("source");

        let bytes = self
            .storage
            .download_to(bucket, key, &input)
            .await
            .map_err(ConversionError::Fetch)?;
        tracing::info!(bucket, key, bytes, "Source object fetched");

        let out_dir = scratch.path().join("out");
        tokio::fs::create_dir(&out_dir).await?;

        let batch_rows = self.batch_rows;
        let tables = {
            let out_dir = out_dir.clone();
            tokio::task::spawn_blocking(move || {
                columnar::convert_export(&input, &out_dir, batch_rows)
            })
            .await
            .map_err(|e| ConversionError::Io(std::io::Error::other(e)))??
        };

        let mut artifacts = Vec::with_capacity(tables.len());
        for table in &tables {
            let artifact_key = if table.table == columnar::RECORDS_TABLE {
                destination.clone()
            } else {
                table_key(&destination, table.table)
            };
            artifacts.push(describe(&table.path, table.table, artifact_key, table.rows).await?);
        }

        // Siblings go up first so the main artifact appearing means the set is complete
        let mut uploaded: Vec<&str> = Vec::with_capacity(artifacts.len());
        for (artifact, table) in artifacts.iter().zip(&tables).rev() {
            if let Err(e) = self
                .storage
                .upload_file(bucket, &artifact.key, &table.path, PARQUET_CONTENT_TYPE)
                .await
            {
                self.remove_uploaded(bucket, &uploaded).await;
                return Err(ConversionError::Upload(e));
            }
            uploaded.push(&artifact.key);
        }

        tracing::debug!(
            bucket,
            key,
            duration_ms = start.elapsed().as_millis() as u64,
            "Conversion finished"
        );
        Ok(artifacts)
    }

    /// Failures are logged only
    async fn remove_uploaded(&self, bucket: &str, keys: &[&str]) {
        for key in keys {
            if let Err(e) = self.storage.delete_object(bucket, key).await {
                tracing::warn!(bucket, key, error = %e, "Could not remove partial artifact");
            }
        }
    }
}

async fn describe(
    path: &Path,
    table: &'static str,
    key: String,
    rows: usize,
) -> Result<Artifact, ConversionError> {
    let file = tokio::fs::File::open(path).await?;
    let size = file.metadata().await?.len();
    let sha256 = sha256_hex_from_reader(file)
        .await
        .map_err(|e| ConversionError::Io(std::io::Error::other(e.to_string())))?;
    Ok(Artifact {
        table,
        key,
        rows,
        size,
        sha256,
    })
}

#[async_trait]
impl TaskRunner for ConversionService {
    async fn run(&self, job: ConversionJob) {
        tracing::info!(
            task_id = %job.task_id,
            bucket = %job.bucket,
            key = %job.key,
            "Starting conversion"
        );
        let outcome = self.convert(&job.bucket, &job.key).await;
        self.monitor.report(&job, &outcome);
    }
}
