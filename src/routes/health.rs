use std::future::Future;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub active_recordings: usize,
    /// Analysis jobs waiting for a worker; absent when Redis is unreachable.
    pub pending_jobs: Option<u64>,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: ComponentHealth,
    pub redis: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: &'static str,
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

async fn probe<E>(check: impl Future<Output = Result<(), E>>) -> ComponentHealth {
    let start = Instant::now();
    match check.await {
        Ok(()) => ComponentHealth {
            status: "ok",
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        Err(_) => ComponentHealth {
            status: "error",
            latency_ms: None,
        },
    }
}

/// GET /health — dependency status plus the number of running recorders.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = probe(async {
        sqlx::query("SELECT 1").execute(&state.db).await.map(|_| ())
    })
    .await;
    let redis = probe(state.queue.health_check()).await;
    let pending_jobs = if redis.is_ok() {
        state.queue.queue_depth().await.ok()
    } else {
        None
    };

    let healthy = database.is_ok() && redis.is_ok();
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        active_recordings: state.recordings.active_recordings(None).len(),
        pending_jobs,
        checks: HealthChecks { database, redis },
    };

    (status_code, Json(response))
}
