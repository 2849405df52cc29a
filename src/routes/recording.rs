use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;
use crate::models::recording::{
    ActiveRecording, StartRecordingRequest, StartRecordingResponse, StopRecordingResponse,
};
use crate::services::process::ProcessError;
use crate::services::recording::RecordingServiceError;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for RecordingServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            RecordingServiceError::Invalid(_) => StatusCode::BAD_REQUEST,
            RecordingServiceError::UnknownShop(_) => StatusCode::NOT_FOUND,
            RecordingServiceError::Process(ProcessError::AlreadyActive(_)) => StatusCode::CONFLICT,
            RecordingServiceError::Process(_) | RecordingServiceError::Persistence(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "Recording request failed");
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

/// POST /api/v1/shops/{shop_id}/recordings — start recording a camera.
pub async fn start_recording(
    State(state): State<AppState>,
    Path(shop_id): Path<String>,
    Json(request): Json<StartRecordingRequest>,
) -> Result<(StatusCode, Json<StartRecordingResponse>), RecordingServiceError> {
    let response = state.recordings.start_recording(&shop_id, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// DELETE /api/v1/shops/{shop_id}/recordings/{camera_name} — stop a camera.
pub async fn stop_recording(
    State(state): State<AppState>,
    Path((shop_id, camera_name)): Path<(String, String)>,
) -> Result<Json<StopRecordingResponse>, RecordingServiceError> {
    let response = state.recordings.stop_recording(&shop_id, &camera_name).await?;
    Ok(Json(response))
}

/// GET /api/v1/shops/{shop_id}/recordings — cameras currently recording.
pub async fn list_recordings(
    State(state): State<AppState>,
    Path(shop_id): Path<String>,
) -> Json<Vec<ActiveRecording>> {
    Json(state.recordings.active_recordings(Some(&shop_id)))
}
