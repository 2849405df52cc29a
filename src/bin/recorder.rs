//! Supervised capture process for one camera.
//!
//! Exit codes: 0 clean stop, 1 general error, 2 camera not found or
//! authentication failed, 3 configuration error.

use clap::error::ErrorKind;
use clap::Parser;
use shop_guardian::{
    config::AppConfig,
    routes::metrics::describe as describe_metrics,
    services::{
        capture::{CaptureError, FfmpegCapture},
        dispatcher::TaskDispatcher,
        queue::RedisJobQueue,
        recorder::{RecorderSettings, RecordingController, RecordingError},
        storage::ObjectStorage,
        upload_queue::UploadQueue,
        uploader::UploadWorker,
    },
};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const EXIT_GENERAL: u8 = 1;
const EXIT_CAMERA: u8 = 2;
const EXIT_CONFIG: u8 = 3;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "recorder", about = "Record camera segments and queue them for upload and analysis")]
struct Args {
    /// Camera name as known to the capture source
    #[arg(long)]
    camera: String,

    /// Seconds per segment
    #[arg(long, default_value_t = 30)]
    duration: u64,

    /// Shop the camera belongs to; without it segments are uploaded but never analysed
    #[arg(long)]
    shop_id: Option<String>,

    #[arg(long, default_value_t = 0.8)]
    detection_threshold: f64,

    #[arg(long, default_value_t = 1)]
    analysis_iterations: u32,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    describe_metrics();

    let storage = match ObjectStorage::new(
        &config.storage_bucket,
        &config.storage_endpoint,
        &config.storage_access_key,
        &config.storage_secret_key,
    ) {
        Ok(storage) => storage,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize object storage");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    let jobs = match RedisJobQueue::new(&config.redis_url) {
        Ok(jobs) => jobs,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize job queue");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    tracing::info!(
        camera = %args.camera,
        duration = args.duration,
        shop_id = ?args.shop_id,
        detection_threshold = args.detection_threshold,
        analysis_iterations = args.analysis_iterations,
        bucket = %config.storage_bucket,
        "Starting recorder"
    );

    let queue = Arc::new(UploadQueue::new());
    let uploader = UploadWorker::new(
        Arc::clone(&queue),
        Arc::new(storage),
        TaskDispatcher::new(Arc::new(jobs)),
    )
    .spawn();

    let capture = FfmpegCapture::new(config.camera_feed_url.clone(), config.recordings_dir.clone())
        .with_segment_limit(Duration::from_secs(args.duration));
    let controller = RecordingController::new(
        Arc::new(capture),
        Arc::clone(&queue),
        RecorderSettings {
            bucket: config.storage_bucket.clone(),
            shop_id: args.shop_id.clone(),
            detection_threshold: args.detection_threshold,
            analysis_iterations: args.analysis_iterations,
        },
    );

    // The supervisor stops us with SIGINT; finish the current segment first.
    // ffmpeg sits in its own process group and never sees that signal.
    let stop = controller.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested, finishing current segment");
            stop.request_stop();
        }
    });

    let outcome = controller
        .start(&args.camera, Duration::from_secs(args.duration))
        .await;

    let report = controller.shutdown(uploader, SHUTDOWN_TIMEOUT).await;
    tracing::info!(drained = report.drained, exited = report.exited, "Upload worker stopped");

    match outcome {
        Ok(segments) => {
            tracing::info!(segments, "Recorder stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "Recorder failed");
            ExitCode::from(exit_code(&e))
        }
    }
}

fn exit_code(error: &RecordingError) -> u8 {
    match error {
        RecordingError::Capture(CaptureError::NotFound(_) | CaptureError::Authentication(_)) => {
            EXIT_CAMERA
        }
        RecordingError::Validation(_) => EXIT_CONFIG,
        _ => EXIT_GENERAL,
    }
}
