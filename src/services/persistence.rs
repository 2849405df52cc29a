use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::queries;
use crate::models::analysis::AnalysisResult;

/// Where finished analyses end up.
///
/// A failed `record` never invalidates the result passed to it; callers log
/// the error and keep the result.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn record(
        &self,
        video_uri: &str,
        camera_name: &str,
        shop_id: &str,
        result: &AnalysisResult,
    ) -> Result<Uuid, PersistenceError>;

    async fn shop_exists(&self, shop_id: &str) -> Result<bool, PersistenceError>;
}

/// Postgres-backed gateway. An event and its analysis are written in one
/// transaction.
#[derive(Clone)]
pub struct PgPersistence {
    pool: PgPool,
}

impl PgPersistence {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PersistenceGateway for PgPersistence {
    async fn record(
        &self,
        video_uri: &str,
        camera_name: &str,
        shop_id: &str,
        result: &AnalysisResult,
    ) -> Result<Uuid, PersistenceError> {
        // Dropping the transaction without commit rolls back partial writes.
        let mut tx = self.pool.begin().await?;

        let camera_id = queries::upsert_camera(&mut tx, shop_id, camera_name).await?;
        let description = event_description(&result.decision_reasoning);
        let event_id =
            queries::insert_event(&mut tx, shop_id, camera_id, &description, video_uri).await?;
        let iterations = serde_json::to_value(&result.iterations)?;
        queries::insert_analysis(&mut tx, event_id, result, iterations).await?;

        tx.commit().await?;

        tracing::info!(
            event_id = %event_id,
            shop_id,
            camera = camera_name,
            detected = result.final_detection,
            "Recorded analysis event"
        );
        Ok(event_id)
    }

    async fn shop_exists(&self, shop_id: &str) -> Result<bool, PersistenceError> {
        Ok(queries::shop_exists(&self.pool, shop_id).await?)
    }
}

/// Short human-readable label for an event, derived from observable actions
/// mentioned in the fused reasoning.
pub fn event_description(decision_reasoning: &str) -> String {
    const RULES: &[(&[&str], &str)] = &[
        (&["phone", "smartphone", "mobile", "screen"], "Person checking phone"),
        (&["pocket", "putting", "placed in", "concealed"], "Person putting item in pocket"),
        (&["examining", "looking at", "inspecting", "product"], "Customer examining products"),
        (&["browsing", "walking", "moving through"], "Customer browsing store"),
        (&["basket", "cart", "shopping"], "Person with shopping basket"),
        (&["comparing", "selecting"], "Customer selecting products"),
        (&["checkout", "cashier", "paying"], "Customer at checkout"),
        (&["clothing", "trying on", "fitting"], "Customer examining clothing"),
    ];

    let text = decision_reasoning.to_lowercase();
    if text.trim().is_empty() {
        return "Customer in store".to_string();
    }
    RULES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| text.contains(k)))
        .map(|(_, label)| label.to_string())
        .unwrap_or_else(|| "Customer in store".to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to encode iterations: {0}")]
    Encode(#[from] serde_json::Error),
}
