use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

/// One captured segment, produced per loop iteration of the recorder.
#[derive(Debug, Clone)]
pub struct RecordingSegment {
    pub camera_name: String,
    pub started_at: DateTime<Utc>,
    pub planned_duration_secs: u64,
    pub artifact: PathBuf,
}

/// Unit of work handed from the recorder to the uploader.
///
/// Construct through [`UploadTask::new`]; invalid field combinations are
/// rejected there and never reach the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct UploadTask {
    #[garde(custom(not_blank))]
    pub bucket: String,

    #[garde(custom(not_blank))]
    pub camera_name: String,

    /// Absent for videos that are stored but never analysed.
    #[garde(custom(optional_not_blank))]
    pub shop_id: Option<String>,

    #[garde(custom(unit_interval))]
    pub detection_threshold: f64,

    #[garde(range(min = 1))]
    pub analysis_iterations: u32,

    /// Local file produced by the capture source.
    #[garde(skip)]
    #[serde(default)]
    pub artifact: PathBuf,
}

impl UploadTask {
    pub fn new(
        bucket: impl Into<String>,
        camera_name: impl Into<String>,
        shop_id: Option<String>,
        detection_threshold: f64,
        analysis_iterations: u32,
    ) -> Result<Self, ValidationError> {
        let task = Self {
            bucket: bucket.into(),
            camera_name: camera_name.into(),
            shop_id,
            detection_threshold,
            analysis_iterations,
            artifact: PathBuf::new(),
        };
        task.validate().map_err(ValidationError::from)?;
        Ok(task)
    }

    pub fn with_artifact(mut self, artifact: impl Into<PathBuf>) -> Self {
        self.artifact = artifact.into();
        self
    }
}

impl fmt::Display for UploadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UploadTask[{} -> {}", self.camera_name, self.bucket)?;
        if let Some(shop_id) = &self.shop_id {
            write!(f, " (shop: {shop_id})")?;
        }
        write!(f, "]")
    }
}

pub(crate) fn not_blank(value: &str, _ctx: &()) -> garde::Result {
    if value.trim().is_empty() {
        return Err(garde::Error::new("cannot be empty"));
    }
    Ok(())
}

fn optional_not_blank(value: &Option<String>, ctx: &()) -> garde::Result {
    match value {
        Some(v) => not_blank(v, ctx).map_err(|_| garde::Error::new("cannot be empty (use None instead)")),
        None => Ok(()),
    }
}

// NaN fails `contains`, unlike a plain range comparison.
fn unit_interval(value: &f64, _ctx: &()) -> garde::Result {
    if !(0.0..=1.0).contains(value) {
        return Err(garde::Error::new("must be within [0.0, 1.0]"));
    }
    Ok(())
}

/// Produced by the upload worker once the segment is in durable storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoAsset {
    pub uri: String,
    pub camera_name: String,
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid upload task: {0}")]
pub struct ValidationError(String);

impl From<garde::Report> for ValidationError {
    fn from(report: garde::Report) -> Self {
        Self(report.to_string())
    }
}
