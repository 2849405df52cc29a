use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::models::job::{AnalysisJob, JobState};

const QUEUE_KEY: &str = "guardian:analysis_jobs";
const PROCESSING_KEY: &str = "guardian:analysis_processing";
const STATE_KEY: &str = "guardian:analysis_state";

/// Asynchronous job system the dispatcher submits to and the analysis worker
/// reports state to. Delivery is at-least-once.
#[async_trait]
pub trait JobSystem: Send + Sync {
    async fn submit(&self, job: &AnalysisJob) -> Result<Uuid, QueueError>;

    async fn set_state(&self, job_id: Uuid, state: JobState) -> Result<(), QueueError>;
}

/// Redis-backed job queue with a processing list for at-least-once delivery.
pub struct RedisJobQueue {
    client: redis::Client,
}

impl RedisJobQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    /// Move the oldest job to the processing list and return it.
    pub async fn next(&self) -> Result<Option<AnalysisJob>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let result: Option<String> = conn
            .rpoplpush(QUEUE_KEY, PROCESSING_KEY)
            .await
            .map_err(QueueError::Redis)?;

        match result {
            Some(payload) => {
                let job: AnalysisJob = serde_json::from_str(&payload).map_err(QueueError::Serialize)?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// Drop a finished job from the processing list.
    pub async fn complete(&self, job: &AnalysisJob) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let payload = serde_json::to_string(job).map_err(QueueError::Serialize)?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Move every job left on the processing list back onto the pending list
    /// and mark it pending again. Called at worker startup, before any job
    /// is taken, so work interrupted by a crash or shutdown is redelivered.
    /// With several workers this may also redeliver a job another worker is
    /// still running.
    pub async fn requeue_stale(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let mut moved = 0;
        loop {
            let payload: Option<String> = conn
                .rpoplpush(PROCESSING_KEY, QUEUE_KEY)
                .await
                .map_err(QueueError::Redis)?;
            let Some(payload) = payload else {
                break;
            };
            moved += 1;
            if let Ok(job) = serde_json::from_str::<AnalysisJob>(&payload) {
                conn.hset::<_, _, _, ()>(STATE_KEY, job.job_id.to_string(), JobState::Pending.to_string())
                    .await
                    .map_err(QueueError::Redis)?;
            }
        }
        Ok(moved)
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let depth: u64 = conn.llen(QUEUE_KEY).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    pub async fn state(&self, job_id: Uuid) -> Result<Option<JobState>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let raw: Option<String> = conn
            .hget(STATE_KEY, job_id.to_string())
            .await
            .map_err(QueueError::Redis)?;
        Ok(raw.and_then(|s| s.parse().ok()))
    }
}

#[async_trait]
impl JobSystem for RedisJobQueue {
    async fn submit(&self, job: &AnalysisJob) -> Result<Uuid, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let payload = serde_json::to_string(job).map_err(QueueError::Serialize)?;
        conn.hset::<_, _, _, ()>(STATE_KEY, job.job_id.to_string(), job.state.to_string())
            .await
            .map_err(QueueError::Redis)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(job.job_id)
    }

    async fn set_state(&self, job_id: Uuid, state: JobState) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        conn.hset::<_, _, _, ()>(STATE_KEY, job_id.to_string(), state.to_string())
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

/// In-process job system for local runs and tests.
#[derive(Default)]
pub struct MemoryJobQueue {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    pending: VecDeque<AnalysisJob>,
    states: HashMap<Uuid, Vec<JobState>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> Option<AnalysisJob> {
        self.lock().pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self, job_id: Uuid) -> Option<JobState> {
        self.lock().states.get(&job_id).and_then(|h| h.last().copied())
    }

    /// Every state a job passed through, in order.
    pub fn history(&self, job_id: Uuid) -> Vec<JobState> {
        self.lock().states.get(&job_id).cloned().unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl JobSystem for MemoryJobQueue {
    async fn submit(&self, job: &AnalysisJob) -> Result<Uuid, QueueError> {
        let mut inner = self.lock();
        inner.states.entry(job.job_id).or_default().push(job.state);
        inner.pending.push_back(job.clone());
        Ok(job.job_id)
    }

    async fn set_state(&self, job_id: Uuid, state: JobState) -> Result<(), QueueError> {
        self.lock().states.entry(job_id).or_default().push(state);
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
