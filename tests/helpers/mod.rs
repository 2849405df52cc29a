//! Test doubles for the pipeline ports
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use shop_guardian::models::analysis::{AnalysisIteration, AnalysisResult, EvidenceTier};
use shop_guardian::services::inference::{InferenceClient, InferenceError};
use shop_guardian::services::persistence::{PersistenceError, PersistenceGateway};
use shop_guardian::services::storage::{StorageBackend, StorageError};

/// Storage that keeps uploads in memory. Calls listed in `fail_calls`
/// (zero-based) are rejected.
#[derive(Default)]
pub struct FakeStorage {
    pub uploads: Mutex<Vec<(String, Vec<u8>)>>,
    calls: AtomicUsize,
    fail_calls: Vec<usize>,
    delay: Option<Duration>,
}

impl FakeStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(fail_calls: Vec<usize>) -> Self {
        Self {
            fail_calls,
            ..Self::default()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn uploaded(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

#[async_trait]
impl StorageBackend for FakeStorage {
    async fn upload(&self, data: &[u8], camera_name: &str) -> Result<String, StorageError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_calls.contains(&call) {
            return Err(StorageError::Rejected(503));
        }
        let uri = format!("s3://test-bucket/{camera_name}/{call}.mp4");
        self.uploads
            .lock()
            .unwrap()
            .push((uri.clone(), data.to_vec()));
        Ok(uri)
    }
}

/// Inference client replaying a fixed script of outcomes.
pub struct ScriptedInference {
    steps: Mutex<VecDeque<Result<AnalysisIteration, String>>>,
    pub calls: AtomicUsize,
}

impl ScriptedInference {
    pub fn new(steps: Vec<Result<AnalysisIteration, String>>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answers with the same iteration.
    pub fn repeating(iteration: AnalysisIteration, times: usize) -> Self {
        Self::new(vec![Ok(iteration); times])
    }
}

#[async_trait]
impl InferenceClient for ScriptedInference {
    async fn run_iteration(&self, _video_uri: &str) -> Result<AnalysisIteration, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.steps.lock().unwrap().pop_front() {
            Some(Ok(iteration)) => Ok(iteration),
            Some(Err(message)) => Err(InferenceError::Other(message)),
            None => Err(InferenceError::Other("invalid argument: script exhausted".into())),
        }
    }
}

/// In-memory gateway with a fixed set of known shops.
#[derive(Default)]
pub struct FakePersistence {
    shops: HashSet<String>,
    pub records: Mutex<Vec<(String, String, String, AnalysisResult)>>,
    fail_writes: bool,
}

impl FakePersistence {
    pub fn with_shops(shops: &[&str]) -> Self {
        Self {
            shops: shops.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn recorded(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl PersistenceGateway for FakePersistence {
    async fn record(
        &self,
        video_uri: &str,
        camera_name: &str,
        shop_id: &str,
        result: &AnalysisResult,
    ) -> Result<Uuid, PersistenceError> {
        if self.fail_writes {
            return Err(PersistenceError::Database(sqlx::Error::PoolTimedOut));
        }
        self.records.lock().unwrap().push((
            video_uri.to_string(),
            camera_name.to_string(),
            shop_id.to_string(),
            result.clone(),
        ));
        Ok(Uuid::new_v4())
    }

    async fn shop_exists(&self, shop_id: &str) -> Result<bool, PersistenceError> {
        Ok(self.shops.contains(shop_id))
    }
}

pub fn iteration(confidence: f64, detected: bool, tier: EvidenceTier) -> AnalysisIteration {
    AnalysisIteration {
        confidence,
        detected,
        evidence_tier: tier,
        key_behaviors: vec![],
        concealment_actions: vec![],
        reasoning: format!("Observed activity, confidence {confidence}"),
    }
}

/// Write a fake segment file and return its path.
pub fn write_segment(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"\x00\x00\x00\x18ftypmp42segment").unwrap();
    path
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
