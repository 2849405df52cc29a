use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::models::job::AnalysisJob;
use crate::models::upload::VideoAsset;
use crate::services::queue::{JobSystem, QueueError};

/// Bridge from "segment uploaded" to "analysis requested".
#[derive(Clone)]
pub struct TaskDispatcher {
    jobs: Arc<dyn JobSystem>,
}

impl TaskDispatcher {
    pub fn new(jobs: Arc<dyn JobSystem>) -> Self {
        Self { jobs }
    }

    /// Submit an analysis job for an uploaded segment.
    ///
    /// Returns `Ok(None)` without submitting when there is no shop context:
    /// such videos are kept in storage but never analysed.
    pub async fn dispatch(
        &self,
        asset: &VideoAsset,
        shop_id: Option<&str>,
        detection_threshold: f64,
        iterations: u32,
    ) -> Result<Option<Uuid>, QueueError> {
        let Some(shop_id) = shop_id.filter(|s| !s.trim().is_empty()) else {
            warn!(video_uri = %asset.uri, "No shop_id provided - skipping analysis");
            return Ok(None);
        };

        let job = AnalysisJob::new(
            &asset.camera_name,
            &asset.uri,
            shop_id,
            detection_threshold,
            iterations,
        );
        let job_id = self.jobs.submit(&job).await?;
        metrics::counter!("analysis_jobs_dispatched").increment(1);

        info!(
            job_id = %job_id,
            camera = %asset.camera_name,
            shop_id,
            video_uri = %asset.uri,
            detection_threshold,
            iterations,
            "Dispatched analysis job"
        );
        Ok(Some(job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobState;
    use crate::services::queue::MemoryJobQueue;

    fn asset() -> VideoAsset {
        VideoAsset {
            uri: "s3://videos/entrance/1.mp4".to_string(),
            camera_name: "Entrance".to_string(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_submits_pending_job() {
        let jobs = Arc::new(MemoryJobQueue::new());
        let dispatcher = TaskDispatcher::new(jobs.clone());

        let job_id = dispatcher
            .dispatch(&asset(), Some("shop-7"), 0.7, 3)
            .await
            .unwrap()
            .expect("job id");

        let job = jobs.next().expect("queued job");
        assert_eq!(job.job_id, job_id);
        assert_eq!(job.shop_id, "shop-7");
        assert_eq!(job.iterations, 3);
        assert_eq!(jobs.state(job_id), Some(JobState::Pending));
    }

    #[tokio::test]
    async fn test_no_shop_means_no_job() {
        let jobs = Arc::new(MemoryJobQueue::new());
        let dispatcher = TaskDispatcher::new(jobs.clone());

        assert_eq!(dispatcher.dispatch(&asset(), None, 0.7, 1).await.unwrap(), None);
        assert_eq!(dispatcher.dispatch(&asset(), Some(""), 0.7, 1).await.unwrap(), None);
        assert!(jobs.is_empty());
    }
}
