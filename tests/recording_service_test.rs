//! Recording service against real child processes (`/bin/sh` stands in for
//! the recorder binary).
#![cfg(unix)]

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use helpers::FakePersistence;
use shop_guardian::models::recording::StartRecordingRequest;
use shop_guardian::services::process::{ProcessError, ProcessKey, ProcessRegistry};
use shop_guardian::services::recording::{RecordingService, RecordingServiceError};

/// `sh -c <script> recorder --camera ...`: the recorder flags land in `$1..`
/// and are ignored by the script.
fn service(script: &str) -> RecordingService {
    let registry = Arc::new(ProcessRegistry::new(
        Duration::from_millis(200),
        Duration::from_secs(2),
    ));
    RecordingService::new(
        registry,
        Arc::new(FakePersistence::with_shops(&["shop-1"])),
        "/bin/sh",
    )
    .with_recorder_args(vec!["-c".into(), script.into(), "recorder".into()])
}

fn request(camera: &str) -> StartRecordingRequest {
    StartRecordingRequest {
        camera_name: camera.to_string(),
        duration: 30,
        detection_threshold: 0.8,
        analysis_iterations: 1,
    }
}

#[tokio::test]
async fn test_start_list_stop() {
    let service = service("exec sleep 30");

    let started = service.start_recording("shop-1", request("Back Door")).await.unwrap();
    assert!(started.recording_started);
    assert!(started.pid.is_some());

    let active = service.active_recordings(Some("shop-1"));
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].camera_name, "Back Door");
    assert!(service.active_recordings(Some("shop-2")).is_empty());
    assert!(service.registry().is_running(&ProcessKey::new("shop-1", "Back Door")));

    let stopped = service.stop_recording("shop-1", "Back Door").await.unwrap();
    assert!(stopped.recording_stopped);
    assert!(service.active_recordings(None).is_empty());
}

#[tokio::test]
async fn test_second_start_conflicts() {
    let service = service("exec sleep 30");
    service.start_recording("shop-1", request("Entrance")).await.unwrap();

    let err = service.start_recording("shop-1", request("Entrance")).await.unwrap_err();
    assert!(matches!(err, RecordingServiceError::Process(ProcessError::AlreadyActive(_))));
    assert_eq!(err.into_response().status(), StatusCode::CONFLICT);

    service.stop_recording("shop-1", "Entrance").await.unwrap();
}

#[tokio::test]
async fn test_stop_without_recording_is_not_an_error() {
    let service = service("exec sleep 30");

    let stopped = service.stop_recording("shop-1", "Entrance").await.unwrap();
    assert!(!stopped.recording_stopped);
    assert!(service.active_recordings(None).is_empty());
}

#[tokio::test]
async fn test_unknown_shop_is_not_found() {
    let service = service("exec sleep 30");

    let err = service.start_recording("ghost", request("Entrance")).await.unwrap_err();
    assert!(matches!(err, RecordingServiceError::UnknownShop(_)));
    assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    assert!(service.active_recordings(None).is_empty());
}

#[tokio::test]
async fn test_invalid_request_is_bad_request() {
    let service = service("exec sleep 30");
    let mut bad = request("Entrance");
    bad.analysis_iterations = 0;

    let err = service.start_recording("shop-1", bad).await.unwrap_err();
    assert!(matches!(err, RecordingServiceError::Invalid(_)));
    assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_blank_camera_name_is_bad_request() {
    let service = service("exec sleep 30");

    let err = service.start_recording("shop-1", request("  \t ")).await.unwrap_err();
    assert!(matches!(err, RecordingServiceError::Invalid(_)));
    assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    assert!(service.active_recordings(None).is_empty());
}

#[tokio::test]
async fn test_recorder_that_dies_reports_exit_reason() {
    let service = service("exit 3");

    let err = service.start_recording("shop-1", request("Entrance")).await.unwrap_err();
    match &err {
        RecordingServiceError::Process(ProcessError::EarlyExit { code, description, .. }) => {
            assert_eq!(*code, Some(3));
            assert_eq!(description, "Recorder configuration error");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(service.active_recordings(None).is_empty());
}
