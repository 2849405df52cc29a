//! Segment loop for one camera.
//!
//! `Idle -> Authenticated -> Recording (loop) -> Stopping -> Idle`. A stop
//! request is honoured between segments only, so a segment in flight is
//! always finished and queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use strum::Display;
use tracing::{info, warn};

use crate::models::upload::{RecordingSegment, UploadTask, ValidationError};
use crate::services::capture::{CaptureError, CaptureSource};
use crate::services::upload_queue::UploadQueue;
use crate::services::uploader::{ShutdownReport, UploadWorkerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RecorderState {
    Idle,
    Authenticated,
    Recording,
    Stopping,
}

/// Per-recorder context copied into every upload task.
#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub bucket: String,
    pub shop_id: Option<String>,
    pub detection_threshold: f64,
    pub analysis_iterations: u32,
}

/// Cloneable handle used to request a stop from another task or a signal
/// handler.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct RecordingController {
    capture: Arc<dyn CaptureSource>,
    queue: Arc<UploadQueue>,
    settings: RecorderSettings,
    state: Mutex<RecorderState>,
    stop: StopHandle,
}

impl RecordingController {
    pub fn new(
        capture: Arc<dyn CaptureSource>,
        queue: Arc<UploadQueue>,
        settings: RecorderSettings,
    ) -> Self {
        Self {
            capture,
            queue,
            settings,
            state: Mutex::new(RecorderState::Idle),
            stop: StopHandle::default(),
        }
    }

    pub fn state(&self) -> RecorderState {
        *self.lock_state()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Authenticate once, then record `duration`-long segments until a stop
    /// is requested. Returns the number of segments queued.
    pub async fn start(&self, camera_name: &str, duration: Duration) -> Result<u64, RecordingError> {
        // Reject bad settings before touching the camera.
        self.upload_task(camera_name)?;

        {
            let mut state = self.lock_state();
            if *state != RecorderState::Idle {
                return Err(RecordingError::AlreadyRunning(camera_name.to_string()));
            }
            *state = RecorderState::Authenticated;
        }

        if let Err(e) = self.capture.authenticate().await {
            self.set_state(RecorderState::Idle);
            return Err(e.into());
        }
        info!(camera = camera_name, "Authenticated to capture source");

        let outcome = self.record_loop(camera_name, duration).await;
        self.set_state(RecorderState::Idle);
        outcome
    }

    async fn record_loop(&self, camera_name: &str, duration: Duration) -> Result<u64, RecordingError> {
        let mut segments = 0u64;
        while !self.stop.is_stop_requested() {
            self.set_state(RecorderState::Recording);
            let segment = self.record_segment(camera_name, duration).await?;
            let task = self.upload_task(camera_name)?.with_artifact(segment.artifact);
            self.queue.enqueue(task)?;
            segments += 1;
        }
        self.set_state(RecorderState::Stopping);
        info!(camera = camera_name, segments, "Stop requested, recording loop finished");
        Ok(segments)
    }

    /// Capture one segment of `duration`.
    pub async fn record_segment(
        &self,
        camera_name: &str,
        duration: Duration,
    ) -> Result<RecordingSegment, RecordingError> {
        let started_at = Utc::now();
        self.capture.start_capture(camera_name).await?;
        info!(camera = camera_name, duration_secs = duration.as_secs(), "Recording segment");

        tokio::time::sleep(duration).await;

        let artifact = self.capture.stop_capture(camera_name).await?;
        info!(camera = camera_name, artifact = %artifact.display(), "Segment finished");
        Ok(RecordingSegment {
            camera_name: camera_name.to_string(),
            started_at,
            planned_duration_secs: duration.as_secs(),
            artifact,
        })
    }

    /// Drain the upload worker and wait for it to exit.
    pub async fn shutdown(&self, uploader: UploadWorkerHandle, timeout: Duration) -> ShutdownReport {
        self.stop.request_stop();
        let report = uploader.shutdown(timeout, timeout).await;
        if !report.exited {
            warn!(pending = self.queue.unfinished(), "Upload worker still alive after shutdown");
        }
        report
    }

    fn upload_task(&self, camera_name: &str) -> Result<UploadTask, ValidationError> {
        UploadTask::new(
            self.settings.bucket.clone(),
            camera_name,
            self.settings.shop_id.clone(),
            self.settings.detection_threshold,
            self.settings.analysis_iterations,
        )
    }

    fn set_state(&self, next: RecorderState) {
        *self.lock_state() = next;
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecordingError {
    #[error("Recorder for camera {0} is already running")]
    AlreadyRunning(String),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;

    /// Writes a small file per segment and requests a stop after `stop_after`
    /// segments.
    struct FakeCapture {
        dir: tempfile::TempDir,
        stopped: AtomicUsize,
        stop_after: usize,
        stop: Mutex<Option<StopHandle>>,
        fail_auth: bool,
    }

    impl FakeCapture {
        fn new(stop_after: usize) -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                stopped: AtomicUsize::new(0),
                stop_after,
                stop: Mutex::new(None),
                fail_auth: false,
            }
        }
    }

    #[async_trait]
    impl CaptureSource for FakeCapture {
        async fn authenticate(&self) -> Result<(), CaptureError> {
            if self.fail_auth {
                return Err(CaptureError::Authentication("bad password".into()));
            }
            Ok(())
        }

        async fn start_capture(&self, _camera_name: &str) -> Result<(), CaptureError> {
            Ok(())
        }

        async fn stop_capture(&self, camera_name: &str) -> Result<PathBuf, CaptureError> {
            let n = self.stopped.fetch_add(1, Ordering::SeqCst) + 1;
            let path = self.dir.path().join(format!("{camera_name}_{n}.mp4"));
            std::fs::write(&path, b"segment")?;
            if n >= self.stop_after {
                if let Some(stop) = self.stop.lock().unwrap().as_ref() {
                    stop.request_stop();
                }
            }
            Ok(path)
        }
    }

    fn settings() -> RecorderSettings {
        RecorderSettings {
            bucket: "videos".into(),
            shop_id: Some("shop-1".into()),
            detection_threshold: 0.7,
            analysis_iterations: 2,
        }
    }

    #[tokio::test]
    async fn test_segments_are_queued_until_stop() {
        let capture = Arc::new(FakeCapture::new(3));
        let queue = Arc::new(UploadQueue::new());
        let controller = RecordingController::new(capture.clone(), queue.clone(), settings());
        *capture.stop.lock().unwrap() = Some(controller.stop_handle());

        let segments = controller.start("Entrance", Duration::from_millis(5)).await.unwrap();

        assert_eq!(segments, 3);
        assert_eq!(queue.len(), 3);
        assert_eq!(controller.state(), RecorderState::Idle);
        let task = queue.dequeue(Duration::from_millis(10)).await.unwrap();
        assert_eq!(task.shop_id.as_deref(), Some("shop-1"));
        assert_eq!(task.analysis_iterations, 2);
        assert!(task.artifact.exists());
    }

    #[tokio::test]
    async fn test_stop_during_segment_still_finishes_it() {
        let capture = Arc::new(FakeCapture::new(usize::MAX));
        let queue = Arc::new(UploadQueue::new());
        let controller = Arc::new(RecordingController::new(capture, queue.clone(), settings()));

        let c = Arc::clone(&controller);
        let run = tokio::spawn(async move { c.start("Entrance", Duration::from_millis(100)).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        controller.stop_handle().request_stop();

        assert_eq!(run.await.unwrap().unwrap(), 1);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_settings_fail_before_capture() {
        let capture = Arc::new(FakeCapture::new(1));
        let queue = Arc::new(UploadQueue::new());
        let mut bad = settings();
        bad.detection_threshold = 1.5;
        let controller = RecordingController::new(capture.clone(), queue, bad);

        let err = controller.start("Entrance", Duration::from_millis(1)).await.unwrap_err();
        assert!(matches!(err, RecordingError::Validation(_)));
        assert_eq!(capture.stopped.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_auth_failure_returns_to_idle() {
        let mut fake = FakeCapture::new(1);
        fake.fail_auth = true;
        let controller =
            RecordingController::new(Arc::new(fake), Arc::new(UploadQueue::new()), settings());

        let err = controller.start("Entrance", Duration::from_millis(1)).await.unwrap_err();
        assert!(matches!(err, RecordingError::Capture(CaptureError::Authentication(_))));
        assert_eq!(controller.state(), RecorderState::Idle);
    }
}
