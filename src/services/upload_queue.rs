//! FIFO of upload tasks between the recorder and the upload worker.
//!
//! Unbounded: a slow uploader grows memory instead of stalling the recorder.
//! Every dequeued task must be acknowledged with [`UploadQueue::task_done`];
//! [`UploadQueue::join`] waits until every enqueued task has been acknowledged.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use garde::Validate;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

use crate::models::upload::{UploadTask, ValidationError};

pub struct UploadQueue {
    tasks: Mutex<VecDeque<UploadTask>>,
    available: Notify,
    unfinished: watch::Sender<usize>,
}

impl Default for UploadQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadQueue {
    pub fn new() -> Self {
        let (unfinished, _) = watch::channel(0);
        Self {
            tasks: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            unfinished,
        }
    }

    /// Validate and append. Invalid tasks are rejected and never queued.
    pub fn enqueue(&self, task: UploadTask) -> Result<(), ValidationError> {
        task.validate().map_err(ValidationError::from)?;

        tracing::info!(
            camera = %task.camera_name,
            bucket = %task.bucket,
            "Queuing upload task"
        );
        self.unfinished.send_modify(|n| *n += 1);
        self.lock().push_back(task);
        self.available.notify_one();
        metrics::gauge!("upload_queue_depth").set(self.len() as f64);
        Ok(())
    }

    /// Pop the oldest task, waiting up to `timeout`. `None` on expiry.
    pub async fn dequeue(&self, timeout: Duration) -> Option<UploadTask> {
        let deadline = Instant::now() + timeout;
        loop {
            let next = self.lock().pop_front();
            if let Some(task) = next {
                metrics::gauge!("upload_queue_depth").set(self.len() as f64);
                return Some(task);
            }
            // A notify_one issued before we start waiting leaves a permit,
            // so a push between the pop above and this await is not lost.
            if tokio::time::timeout_at(deadline, self.available.notified())
                .await
                .is_err()
            {
                return self.lock().pop_front();
            }
        }
    }

    /// Acknowledge a dequeued task, whatever its outcome.
    pub fn task_done(&self) {
        self.unfinished.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Wait until every enqueued task has been acknowledged.
    pub async fn join(&self) {
        let mut rx = self.unfinished.subscribe();
        // The sender lives in self, so wait_for cannot see a closed channel.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tasks enqueued but not yet acknowledged (queued plus in flight).
    pub fn unfinished(&self) -> usize {
        *self.unfinished.borrow()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<UploadTask>> {
        // The critical sections never panic, so a poisoned lock still holds
        // a consistent deque.
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn task(camera: &str) -> UploadTask {
        UploadTask::new("videos", camera, Some("shop-1".to_string()), 0.8, 1).unwrap()
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = UploadQueue::new();
        queue.enqueue(task("a")).unwrap();
        queue.enqueue(task("b")).unwrap();
        assert_eq!(queue.len(), 2);

        let first = queue.dequeue(Duration::from_millis(10)).await.unwrap();
        let second = queue.dequeue(Duration::from_millis(10)).await.unwrap();
        assert_eq!(first.camera_name, "a");
        assert_eq!(second.camera_name, "b");
    }

    #[tokio::test]
    async fn test_dequeue_times_out_empty() {
        let queue = UploadQueue::new();
        let started = std::time::Instant::now();
        assert!(queue.dequeue(Duration::from_millis(50)).await.is_none());
        assert!(started.elapsed() >= Duration::from_millis(45));
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(UploadQueue::new());
        let q = Arc::clone(&queue);
        let waiter = tokio::spawn(async move { q.dequeue(Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(task("late")).unwrap();

        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.camera_name, "late");
    }

    #[tokio::test]
    async fn test_invalid_task_never_enters_queue() {
        let queue = UploadQueue::new();
        let mut bad = task("a");
        bad.bucket = String::new();
        assert!(queue.enqueue(bad).is_err());
        assert!(queue.is_empty());
        assert_eq!(queue.unfinished(), 0);
    }

    #[tokio::test]
    async fn test_join_waits_for_task_done() {
        let queue = Arc::new(UploadQueue::new());
        queue.enqueue(task("a")).unwrap();

        let q = Arc::clone(&queue);
        let joiner = tokio::spawn(async move { q.join().await });

        let _t = queue.dequeue(Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!joiner.is_finished());

        queue.task_done();
        tokio::time::timeout(Duration::from_secs(1), joiner)
            .await
            .expect("join should return once acknowledged")
            .unwrap();
    }
}
