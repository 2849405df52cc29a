//! Server-side entry point for starting and stopping camera recorders.

use std::path::PathBuf;
use std::sync::Arc;

use garde::Validate;

use crate::models::recording::{
    ActiveRecording, StartRecordingRequest, StartRecordingResponse, StopRecordingResponse,
};
use crate::services::persistence::{PersistenceError, PersistenceGateway};
use crate::services::process::{ProcessError, ProcessKey, ProcessRegistry, ProcessSpec, StopOutcome};

pub struct RecordingService {
    registry: Arc<ProcessRegistry>,
    shops: Arc<dyn PersistenceGateway>,
    recorder_bin: PathBuf,
    recorder_args: Vec<String>,
}

impl RecordingService {
    pub fn new(
        registry: Arc<ProcessRegistry>,
        shops: Arc<dyn PersistenceGateway>,
        recorder_bin: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            shops,
            recorder_bin: recorder_bin.into(),
            recorder_args: Vec::new(),
        }
    }

    /// Arguments placed before the recorder flags, for launching the recorder
    /// through a wrapper.
    pub fn with_recorder_args(mut self, args: Vec<String>) -> Self {
        self.recorder_args = args;
        self
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub async fn start_recording(
        &self,
        shop_id: &str,
        request: StartRecordingRequest,
    ) -> Result<StartRecordingResponse, RecordingServiceError> {
        request
            .validate()
            .map_err(|report| RecordingServiceError::Invalid(report.to_string()))?;
        if !self.shops.shop_exists(shop_id).await? {
            return Err(RecordingServiceError::UnknownShop(shop_id.to_string()));
        }

        let key = ProcessKey::new(shop_id, request.camera_name.as_str());
        let pid = self.registry.start(&key, &self.recorder_spec(shop_id, &request)).await?;

        tracing::info!(
            shop_id,
            camera = %request.camera_name,
            duration = request.duration,
            pid,
            "Recording started"
        );
        Ok(StartRecordingResponse {
            recording_started: true,
            shop_id: shop_id.to_string(),
            camera_name: request.camera_name,
            pid,
        })
    }

    /// Stopping a camera that is not recording succeeds with
    /// `recording_stopped: false`.
    pub async fn stop_recording(
        &self,
        shop_id: &str,
        camera_name: &str,
    ) -> Result<StopRecordingResponse, RecordingServiceError> {
        let outcome = self.registry.stop(&ProcessKey::new(shop_id, camera_name)).await?;
        tracing::info!(shop_id, camera = camera_name, ?outcome, "Recording stop handled");
        Ok(StopRecordingResponse {
            recording_stopped: outcome != StopOutcome::NotRunning,
            shop_id: shop_id.to_string(),
            camera_name: camera_name.to_string(),
        })
    }

    pub fn active_recordings(&self, shop_id: Option<&str>) -> Vec<ActiveRecording> {
        self.registry
            .list()
            .into_iter()
            .filter(|r| shop_id.map_or(true, |s| r.shop_id == s))
            .collect()
    }

    fn recorder_spec(&self, shop_id: &str, request: &StartRecordingRequest) -> ProcessSpec {
        let mut args = self.recorder_args.clone();
        args.extend([
            "--camera".to_string(),
            request.camera_name.clone(),
            "--duration".to_string(),
            request.duration.to_string(),
            "--shop-id".to_string(),
            shop_id.to_string(),
            "--detection-threshold".to_string(),
            request.detection_threshold.to_string(),
            "--analysis-iterations".to_string(),
            request.analysis_iterations.to_string(),
        ]);
        ProcessSpec {
            program: self.recorder_bin.clone(),
            args,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecordingServiceError {
    #[error("Invalid recording request: {0}")]
    Invalid(String),

    #[error("Shop {0} not found")]
    UnknownShop(String),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
