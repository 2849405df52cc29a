use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;

/// Install the global Prometheus recorder and describe the pipeline metrics.
pub fn install_recorder() -> Result<Arc<PrometheusHandle>, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe();
    Ok(Arc::new(handle))
}

/// Register descriptions for every metric the pipeline emits. Safe to call
/// from any binary; without an installed recorder it is a no-op.
pub fn describe() {
    metrics::describe_counter!("uploads_total", "Segments uploaded to storage");
    metrics::describe_counter!("uploads_failed", "Segments dropped after a failed upload");
    metrics::describe_histogram!("upload_duration_seconds", "Time to read and upload one segment");
    metrics::describe_gauge!("upload_queue_depth", "Segments waiting in the upload queue");
    metrics::describe_counter!("analysis_jobs_dispatched", "Analysis jobs submitted to the job queue");
    metrics::describe_counter!("analysis_jobs_completed", "Analysis jobs fused successfully");
    metrics::describe_counter!("analysis_jobs_failed", "Analysis jobs ending in a terminal failure");
    metrics::describe_histogram!("analysis_duration_seconds", "Time to run and fuse one analysis job");
}

/// GET /metrics — Prometheus text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
