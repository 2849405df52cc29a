//! Job handler: runs the inference ensemble for one uploaded segment and
//! fuses it into a single verdict.
//!
//! `run` never fails. Exhausted retries and permanent errors come back as
//! [`AnalysisResult::terminal_failure`], so the job system never retries on
//! its own.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::analysis::{AnalysisIteration, AnalysisResult};
use crate::models::job::{AnalysisJob, JobState};
use crate::services::fusion::DecisionFusion;
use crate::services::inference::{InferenceClient, InferenceError};
use crate::services::persistence::PersistenceGateway;
use crate::services::queue::JobSystem;
use crate::services::retry::{RetryDecision, RetryPolicy};

/// Result of one handled job.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub result: AnalysisResult,
    /// Set when the result was stored.
    pub event_id: Option<Uuid>,
    /// Attempts made, including the successful one.
    pub attempts: u32,
}

pub struct AnalysisWorker {
    inference: Arc<dyn InferenceClient>,
    jobs: Arc<dyn JobSystem>,
    persistence: Option<Arc<dyn PersistenceGateway>>,
    fusion: DecisionFusion,
    retry: RetryPolicy,
}

impl AnalysisWorker {
    pub fn new(inference: Arc<dyn InferenceClient>, jobs: Arc<dyn JobSystem>) -> Self {
        Self {
            inference,
            jobs,
            persistence: None,
            fusion: DecisionFusion::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceGateway>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_fusion(mut self, fusion: DecisionFusion) -> Self {
        self.fusion = fusion;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn run(&self, job: &AnalysisJob) -> AnalysisOutcome {
        let started = Instant::now();
        info!(
            job_id = %job.job_id,
            camera = %job.camera_name,
            shop_id = %job.shop_id,
            video_uri = %job.video_uri,
            iterations = job.iterations,
            "Starting video analysis"
        );
        self.transition(job.job_id, JobState::Running).await;

        if let Some(reason) = self.verify_shop(&job.shop_id).await {
            error!(job_id = %job.job_id, shop_id = %job.shop_id, %reason, "Shop verification failed");
            return self.fail(job, reason, 1).await;
        }

        let mut attempt: u32 = 0;
        let iterations = loop {
            match self.run_ensemble(job).await {
                Ok(iterations) => break iterations,
                Err(e) => {
                    let message = e.to_string();
                    let class = self.retry.classify(&e);
                    match self.retry.decide(attempt, class, &message) {
                        RetryDecision::Retry { delay, reason } => {
                            warn!(job_id = %job.job_id, attempt = attempt + 1, %reason, "Retrying analysis");
                            self.transition(job.job_id, JobState::Retrying).await;
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                            self.transition(job.job_id, JobState::Running).await;
                        }
                        RetryDecision::GiveUp { reason } => {
                            error!(job_id = %job.job_id, attempt = attempt + 1, %class, %reason, "Giving up on analysis");
                            return self.fail(job, reason, attempt + 1).await;
                        }
                    }
                }
            }
        };

        let result = self.fusion.fuse(iterations, job.detection_threshold);
        metrics::histogram!("analysis_duration_seconds").record(started.elapsed().as_secs_f64());
        info!(
            job_id = %job.job_id,
            detected = result.final_detection,
            confidence = result.final_confidence,
            "Analysis completed"
        );

        let event_id = self.persist(job, &result).await;
        self.transition(job.job_id, JobState::Succeeded).await;
        metrics::counter!("analysis_jobs_completed").increment(1);

        AnalysisOutcome {
            result,
            event_id,
            attempts: attempt + 1,
        }
    }

    /// Every iteration runs even when earlier ones disagree; fusion needs the
    /// whole ensemble. Any failed call fails the attempt.
    async fn run_ensemble(&self, job: &AnalysisJob) -> Result<Vec<AnalysisIteration>, InferenceError> {
        let count = job.iterations.max(1);
        let mut iterations = Vec::with_capacity(count as usize);
        for index in 0..count {
            let iteration = self.inference.run_iteration(&job.video_uri).await?;
            tracing::debug!(
                job_id = %job.job_id,
                iteration = index + 1,
                confidence = iteration.confidence,
                detected = iteration.detected,
                tier = %iteration.evidence_tier,
                "Iteration finished"
            );
            iterations.push(iteration);
        }
        Ok(iterations)
    }

    async fn verify_shop(&self, shop_id: &str) -> Option<String> {
        let persistence = self.persistence.as_ref()?;
        match persistence.shop_exists(shop_id).await {
            Ok(true) => None,
            Ok(false) => Some(format!("Shop verification failed: shop {shop_id} not found")),
            Err(e) => Some(format!("Shop verification failed: {e}")),
        }
    }

    async fn persist(&self, job: &AnalysisJob, result: &AnalysisResult) -> Option<Uuid> {
        let persistence = self.persistence.as_ref()?;
        match persistence
            .record(&job.video_uri, &job.camera_name, &job.shop_id, result)
            .await
        {
            Ok(event_id) => Some(event_id),
            Err(e) => {
                // The analysis stands even when its record could not be written.
                error!(job_id = %job.job_id, error = %e, "Failed to persist analysis result");
                None
            }
        }
    }

    async fn fail(&self, job: &AnalysisJob, reason: String, attempts: u32) -> AnalysisOutcome {
        self.transition(job.job_id, JobState::Failed).await;
        metrics::counter!("analysis_jobs_failed").increment(1);
        AnalysisOutcome {
            result: AnalysisResult::terminal_failure(reason),
            event_id: None,
            attempts,
        }
    }

    async fn transition(&self, job_id: Uuid, state: JobState) {
        if let Err(e) = self.jobs.set_state(job_id, state).await {
            warn!(job_id = %job_id, %state, error = %e, "Failed to record job state");
        }
    }
}
