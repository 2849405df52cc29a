//! Single background worker moving finished segments into durable storage.
//!
//! Upload failures are terminal for that segment: they are logged and the
//! worker moves on. Exactly one worker runs per queue, so throughput is one
//! upload at a time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::models::upload::{UploadTask, VideoAsset};
use crate::services::dispatcher::TaskDispatcher;
use crate::services::storage::{StorageBackend, StorageError};
use crate::services::upload_queue::UploadQueue;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct UploadWorker {
    queue: Arc<UploadQueue>,
    storage: Arc<dyn StorageBackend>,
    dispatcher: TaskDispatcher,
    poll_interval: Duration,
}

impl UploadWorker {
    pub fn new(
        queue: Arc<UploadQueue>,
        storage: Arc<dyn StorageBackend>,
        dispatcher: TaskDispatcher,
    ) -> Self {
        Self {
            queue,
            storage,
            dispatcher,
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Start the worker on the runtime and return its control handle.
    pub fn spawn(self) -> UploadWorkerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let queue = Arc::clone(&self.queue);
        let join = tokio::spawn(async move { self.run(stop_rx).await });
        info!("Upload worker started");
        UploadWorkerHandle {
            stop: stop_tx,
            join,
            queue,
        }
    }

    /// Process tasks until stopped. A stop request is only honoured once the
    /// queue is empty, so pending uploads drain first.
    pub async fn run(&self, stop: watch::Receiver<bool>) {
        loop {
            match self.queue.dequeue(self.poll_interval).await {
                Some(task) => {
                    // Outcome is already logged; a failed upload is dropped.
                    let _ = self.process(task).await;
                    self.queue.task_done();
                }
                None => {
                    if *stop.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Upload worker stopped");
    }

    /// Upload one segment and, when it has a shop context, request analysis.
    pub async fn process(&self, task: UploadTask) -> Result<VideoAsset, StorageError> {
        info!(camera = %task.camera_name, bucket = %task.bucket, "Starting upload");
        let started = Instant::now();

        let asset = match self.upload(&task).await {
            Ok(asset) => asset,
            Err(e) => {
                error!(
                    camera = %task.camera_name,
                    artifact = %task.artifact.display(),
                    error = %e,
                    "Upload failed, segment dropped"
                );
                metrics::counter!("uploads_failed").increment(1);
                return Err(e);
            }
        };

        metrics::counter!("uploads_total").increment(1);
        metrics::histogram!("upload_duration_seconds").record(started.elapsed().as_secs_f64());
        info!(camera = %asset.camera_name, uri = %asset.uri, "Upload succeeded");

        if let Err(e) = tokio::fs::remove_file(&task.artifact).await {
            warn!(artifact = %task.artifact.display(), error = %e, "Could not remove uploaded segment");
        }

        if let Err(e) = self
            .dispatcher
            .dispatch(
                &asset,
                task.shop_id.as_deref(),
                task.detection_threshold,
                task.analysis_iterations,
            )
            .await
        {
            error!(uri = %asset.uri, error = %e, "Failed to dispatch analysis job");
        }

        Ok(asset)
    }

    async fn upload(&self, task: &UploadTask) -> Result<VideoAsset, StorageError> {
        let data = tokio::fs::read(&task.artifact).await?;
        let uri = self.storage.upload(&data, &task.camera_name).await?;
        Ok(VideoAsset {
            uri,
            camera_name: task.camera_name.clone(),
        })
    }
}

/// Outcome of [`UploadWorkerHandle::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Every queued task was acknowledged before the drain deadline.
    pub drained: bool,
    /// The worker task exited before the exit deadline.
    pub exited: bool,
}

pub struct UploadWorkerHandle {
    stop: watch::Sender<bool>,
    join: JoinHandle<()>,
    queue: Arc<UploadQueue>,
}

impl UploadWorkerHandle {
    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }

    pub fn queue(&self) -> &Arc<UploadQueue> {
        &self.queue
    }

    /// Ask the worker to drain and stop, then wait for it with bounded
    /// timeouts. A worker that overruns is logged and aborted, never awaited
    /// indefinitely.
    pub async fn shutdown(self, drain_timeout: Duration, exit_timeout: Duration) -> ShutdownReport {
        info!(pending = self.queue.len(), "Stopping upload worker, waiting for pending uploads");
        let _ = self.stop.send(true);

        let drained = tokio::time::timeout(drain_timeout, self.queue.join())
            .await
            .is_ok();
        if !drained {
            warn!(
                pending = self.queue.unfinished(),
                "Pending uploads did not finish before the drain deadline"
            );
        }

        let mut join = self.join;
        let exited = match tokio::time::timeout(exit_timeout, &mut join).await {
            Ok(_) => true,
            Err(_) => {
                warn!("Upload worker did not stop gracefully");
                join.abort();
                false
            }
        };

        ShutdownReport { drained, exited }
    }
}
