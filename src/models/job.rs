use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// State of an analysis job in the job system.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Retrying,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }
}

/// An analysis request for one uploaded segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisJob {
    pub job_id: Uuid,
    pub camera_name: String,
    pub video_uri: String,
    pub shop_id: String,
    pub detection_threshold: f64,
    pub iterations: u32,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
}

impl AnalysisJob {
    pub fn new(
        camera_name: impl Into<String>,
        video_uri: impl Into<String>,
        shop_id: impl Into<String>,
        detection_threshold: f64,
        iterations: u32,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            camera_name: camera_name.into(),
            video_uri: video_uri.into(),
            shop_id: shop_id.into(),
            detection_threshold,
            iterations: iterations.max(1),
            state: JobState::Pending,
            created_at: Utc::now(),
        }
    }
}
