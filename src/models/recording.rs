use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::upload::not_blank;

fn default_duration() -> u64 {
    30
}

fn default_threshold() -> f64 {
    0.8
}

fn default_iterations() -> u32 {
    1
}

/// Request to start recording one camera of a shop.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StartRecordingRequest {
    #[garde(custom(not_blank), length(max = 200))]
    pub camera_name: String,

    /// Seconds per captured segment.
    #[garde(range(min = 1, max = 3600))]
    #[serde(default = "default_duration")]
    pub duration: u64,

    #[garde(range(min = 0.0, max = 1.0))]
    #[serde(default = "default_threshold")]
    pub detection_threshold: f64,

    #[garde(range(min = 1, max = 10))]
    #[serde(default = "default_iterations")]
    pub analysis_iterations: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartRecordingResponse {
    pub recording_started: bool,
    pub shop_id: String,
    pub camera_name: String,
    pub pid: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopRecordingResponse {
    pub recording_stopped: bool,
    pub shop_id: String,
    pub camera_name: String,
}

/// Snapshot of a supervised recorder process.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveRecording {
    pub shop_id: String,
    pub camera_name: String,
    pub pid: Option<u32>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}
