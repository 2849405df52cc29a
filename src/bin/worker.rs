use shop_guardian::{
    config::AppConfig,
    db,
    routes::metrics::describe as describe_metrics,
    services::{
        analysis::AnalysisWorker, inference::HttpInferenceClient, persistence::PgPersistence,
        queue::RedisJobQueue,
    },
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL_MS: u64 = 1000; // 1 second

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting analysis worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");
    describe_metrics();

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Initializing services");
    let queue =
        Arc::new(RedisJobQueue::new(&config.redis_url).expect("Failed to initialize job queue"));
    let inference = HttpInferenceClient::new(&config.inference_endpoint, &config.inference_api_token)
        .expect("Failed to initialize inference client");

    let worker = AnalysisWorker::new(Arc::new(inference), queue.clone())
        .with_persistence(Arc::new(PgPersistence::new(db_pool)))
        .with_retry_policy(config.retry_policy());

    match queue.requeue_stale().await {
        Ok(0) => {}
        Ok(moved) => tracing::warn!(moved, "Requeued jobs left over from an interrupted worker"),
        Err(e) => tracing::error!(error = %e, "Failed to requeue interrupted jobs"),
    }

    tracing::info!("Worker ready, starting job processing loop");

    loop {
        tokio::select! {
            processed = process_next_job(&queue, &worker) => match processed {
                Ok(true) => tracing::debug!("Job processed, checking for next job"),
                Ok(false) => {
                    tracing::trace!("No jobs available, sleeping");
                    sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Error polling job queue, will retry");
                    sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                // A job interrupted here stays on the processing list until
                // the next worker start requeues it.
                tracing::info!("Shutdown signal received, stopping worker");
                break;
            }
        }
    }
}

/// Handle the next job from the queue.
/// Returns Ok(true) if a job was handled, Ok(false) if none was available.
async fn process_next_job(
    queue: &RedisJobQueue,
    worker: &AnalysisWorker,
) -> Result<bool, Box<dyn std::error::Error>> {
    let job = match queue.next().await? {
        Some(j) => j,
        None => return Ok(false),
    };

    // Terminal failures come back as results; run never errors.
    let outcome = worker.run(&job).await;

    tracing::info!(
        job_id = %job.job_id,
        camera = %job.camera_name,
        detected = outcome.result.final_detection,
        confidence = outcome.result.final_confidence,
        attempts = outcome.attempts,
        event_id = ?outcome.event_id,
        "Job finished"
    );

    // Only now is the job dropped from the processing list.
    queue.complete(&job).await?;
    Ok(true)
}
