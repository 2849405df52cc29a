use sqlx::PgPool;
use std::sync::Arc;

use crate::services::{queue::RedisJobQueue, recording::RecordingService};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub queue: Arc<RedisJobQueue>,
    pub recordings: Arc<RecordingService>,
}

impl AppState {
    pub fn new(db: PgPool, queue: RedisJobQueue, recordings: RecordingService) -> Self {
        Self {
            db,
            queue: Arc::new(queue),
            recordings: Arc::new(recordings),
        }
    }
}
