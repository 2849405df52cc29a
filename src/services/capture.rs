use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::services::storage::camera_slug;

/// Side-effecting capture primitives driven by the recording controller.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Verify the source is reachable before the first segment.
    async fn authenticate(&self) -> Result<(), CaptureError>;

    async fn start_capture(&self, camera_name: &str) -> Result<(), CaptureError>;

    /// Finish the running capture and return the local artifact.
    async fn stop_capture(&self, camera_name: &str) -> Result<PathBuf, CaptureError>;
}

/// Records a camera stream into local MP4 files with `ffmpeg`.
///
/// Each ffmpeg runs in its own process group, so an interrupt aimed at the
/// recorder's group does not cut the segment short. Only `stop_capture`
/// ends a capture; the segment limit bounds an ffmpeg whose recorder was
/// killed outright.
pub struct FfmpegCapture {
    feed_url: String,
    recordings_dir: PathBuf,
    ffmpeg_bin: String,
    segment_limit: Option<Duration>,
    active: Mutex<Option<ActiveCapture>>,
}

struct ActiveCapture {
    camera_name: String,
    child: Child,
    artifact: PathBuf,
}

const STOP_GRACE: Duration = Duration::from_secs(10);

impl FfmpegCapture {
    /// `feed_url` may contain a `{camera}` placeholder, replaced by the
    /// camera slug.
    pub fn new(feed_url: impl Into<String>, recordings_dir: impl Into<PathBuf>) -> Self {
        Self {
            feed_url: feed_url.into(),
            recordings_dir: recordings_dir.into(),
            ffmpeg_bin: "ffmpeg".to_string(),
            segment_limit: None,
            active: Mutex::new(None),
        }
    }

    /// Cap each capture at `limit` of output (`ffmpeg -t`).
    pub fn with_segment_limit(mut self, limit: Duration) -> Self {
        self.segment_limit = Some(limit);
        self
    }

    pub fn with_binary(mut self, ffmpeg_bin: impl Into<String>) -> Self {
        self.ffmpeg_bin = ffmpeg_bin.into();
        self
    }

    pub fn feed_url_for(&self, camera_name: &str) -> String {
        self.feed_url.replace("{camera}", &camera_slug(camera_name))
    }

    fn capture_args(&self, camera_name: &str, artifact: &Path) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-y", "-i"]
            .iter()
            .map(|a| a.to_string())
            .collect();
        args.push(self.feed_url_for(camera_name));
        if let Some(limit) = self.segment_limit {
            args.push("-t".to_string());
            args.push(format!("{:.3}", limit.as_secs_f64()));
        }
        args.extend(["-c".to_string(), "copy".to_string()]);
        args.push(artifact.display().to_string());
        args
    }

    fn artifact_path(&self, camera_name: &str) -> PathBuf {
        self.recordings_dir.join(format!(
            "{}_{}.mp4",
            camera_slug(camera_name),
            Utc::now().format("%Y%m%dT%H%M%S%.3f")
        ))
    }
}

#[async_trait]
impl CaptureSource for FfmpegCapture {
    async fn authenticate(&self) -> Result<(), CaptureError> {
        if self.feed_url.trim().is_empty() {
            return Err(CaptureError::Authentication("camera feed url is empty".into()));
        }
        tokio::fs::create_dir_all(&self.recordings_dir).await?;

        let status = Command::new(&self.ffmpeg_bin)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => CaptureError::NotFound(self.ffmpeg_bin.clone()),
                _ => CaptureError::Io(e),
            })?;
        if !status.success() {
            return Err(CaptureError::NotFound(self.ffmpeg_bin.clone()));
        }

        tracing::info!(recordings_dir = %self.recordings_dir.display(), "Capture source ready");
        Ok(())
    }

    async fn start_capture(&self, camera_name: &str) -> Result<(), CaptureError> {
        let mut active = self.active.lock().await;
        if let Some(current) = active.as_ref() {
            return Err(CaptureError::AlreadyCapturing(current.camera_name.clone()));
        }

        let artifact = self.artifact_path(camera_name);
        let mut command = Command::new(&self.ffmpeg_bin);
        command
            .args(self.capture_args(camera_name, &artifact))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        let child = command.spawn()?;

        tracing::debug!(camera = camera_name, artifact = %artifact.display(), "Capture started");
        *active = Some(ActiveCapture {
            camera_name: camera_name.to_string(),
            child,
            artifact,
        });
        Ok(())
    }

    async fn stop_capture(&self, camera_name: &str) -> Result<PathBuf, CaptureError> {
        let taken = self.active.lock().await.take();
        let Some(mut capture) = taken else {
            return Err(CaptureError::NotCapturing(camera_name.to_string()));
        };

        // ffmpeg finalises the container when it reads `q` on stdin.
        if let Some(mut stdin) = capture.child.stdin.take() {
            let _ = stdin.write_all(b"q").await;
            let _ = stdin.flush().await;
        }
        if tokio::time::timeout(STOP_GRACE, capture.child.wait()).await.is_err() {
            tracing::warn!(camera = camera_name, "ffmpeg ignored quit request, killing");
            capture.child.kill().await?;
        }

        ensure_artifact(&capture.artifact).await?;
        Ok(capture.artifact)
    }
}

async fn ensure_artifact(path: &Path) -> Result<(), CaptureError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => Err(CaptureError::MissingArtifact(path.to_path_buf())),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Capture source not found: {0}")]
    NotFound(String),

    #[error("Capture source authentication failed: {0}")]
    Authentication(String),

    #[error("Camera {0} is already capturing")]
    AlreadyCapturing(String),

    #[error("Camera {0} is not capturing")]
    NotCapturing(String),

    #[error("Capture produced no artifact at {0}")]
    MissingArtifact(PathBuf),

    #[error("Capture I/O error: {0}")]
    Io(#[from] std::io::Error),
}
