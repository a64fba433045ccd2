use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionJob {
    pub task_id: Uuid,
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Worker pool is shut down")]
    Closed,

    #[error("Dispatch failed: {0}")]
    Rejected(String),
}

/// Hands conversion work to whatever executes it. Fire-and-forget: the
/// returned id is for logs only.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn dispatch(&self, bucket: &str, key: &str) -> Result<Uuid, DispatchError>;
}

/// Executes one job inside the pool
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, job: ConversionJob);
}

/// Bounded in-process worker pool.
///
/// Submission waits while the channel is full; at most `max_concurrent` jobs
/// run at once. After shutdown is signalled no new jobs are accepted, jobs
/// already buffered are still started, and the returned handle resolves once
/// every running job finished.
pub struct WorkerPool {
    tx: mpsc::Sender<ConversionJob>,
}

impl WorkerPool {
    pub fn start(
        runner: Arc<dyn TaskRunner>,
        max_concurrent: usize,
        capacity: usize,
        shutdown: watch::Receiver<bool>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let max_concurrent = max_concurrent.max(1);
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let handle = tokio::spawn(Self::run_pool(rx, runner, max_concurrent, shutdown));

        tracing::info!(
            queue_size = capacity,
            max_concurrent,
            "Conversion worker pool initialized"
        );

        (Arc::new(Self { tx }), handle)
    }

    async fn run_pool(
        mut rx: mpsc::Receiver<ConversionJob>,
        runner: Arc<dyn TaskRunner>,
        max_concurrent: usize,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let semaphore = Arc::new(Semaphore::new(max_concurrent));

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                job = rx.recv() => match job {
                    Some(job) => Self::spawn_job(job, &semaphore, &runner).await,
                    None => break,
                },
            }
        }

        rx.close();
        while let Some(job) = rx.recv().await {
            Self::spawn_job(job, &semaphore, &runner).await;
        }

        // All permits back means nothing is running
        let _ = semaphore.acquire_many(max_concurrent as u32).await;
        tracing::info!("🛑 Conversion worker pool drained");
    }

    async fn spawn_job(
        job: ConversionJob,
        semaphore: &Arc<Semaphore>,
        runner: &Arc<dyn TaskRunner>,
    ) {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        let runner = runner.clone();

        tokio::spawn(async move {
            let _permit = permit;
            runner.run(job).await;
        });
    }
}

#[async_trait]
impl TaskDispatcher for WorkerPool {
    #[tracing::instrument(skip(self), fields(job.type = "conversion"))]
    async fn dispatch(&self, bucket: &str, key: &str) -> Result<Uuid, DispatchError> {
        let job = ConversionJob {
            task_id: Uuid::new_v4(),
            bucket: bucket.to_string(),
            key: key.to_string(),
        };
        let task_id = job.task_id;

        self.tx.send(job).await.map_err(|_| DispatchError::Closed)?;
        tracing::info!(task_id = %task_id, "Enqueued conversion job");
        Ok(task_id)
    }
}
