use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::models::analysis::AnalysisResult;

/// Check whether a shop is registered
pub async fn shop_exists(pool: &PgPool, shop_id: &str) -> Result<bool, sqlx::Error> {
    let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM shops WHERE shop_id = $1) AS found")
        .bind(shop_id)
        .fetch_one(pool)
        .await?;

    row.try_get("found")
}

/// Register a shop (idempotent)
pub async fn insert_shop(pool: &PgPool, shop_id: &str, name: Option<&str>) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO shops (shop_id, name)
        VALUES ($1, $2)
        ON CONFLICT (shop_id) DO NOTHING
        "#,
    )
    .bind(shop_id)
    .bind(name)
    .execute(pool)
    .await?;

    Ok(())
}

/// Find or create the camera row for `(shop_id, camera_name)`
pub async fn upsert_camera(
    tx: &mut Transaction<'_, Postgres>,
    shop_id: &str,
    camera_name: &str,
) -> Result<Uuid, sqlx::Error> {
    // DO UPDATE (instead of DO NOTHING) so RETURNING yields the existing row.
    let row = sqlx::query(
        r#"
        INSERT INTO cameras (camera_id, shop_id, camera_name)
        VALUES ($1, $2, $3)
        ON CONFLICT (shop_id, camera_name) DO UPDATE SET camera_name = EXCLUDED.camera_name
        RETURNING camera_id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(shop_id)
    .bind(camera_name)
    .fetch_one(&mut **tx)
    .await?;

    row.try_get("camera_id")
}

/// Insert an event row
pub async fn insert_event(
    tx: &mut Transaction<'_, Postgres>,
    shop_id: &str,
    camera_id: Uuid,
    description: &str,
    video_url: &str,
) -> Result<Uuid, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO events (event_id, shop_id, camera_id, event_timestamp, description, video_url)
        VALUES ($1, $2, $3, NOW(), $4, $5)
        RETURNING event_id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(shop_id)
    .bind(camera_id)
    .bind(description)
    .bind(video_url)
    .fetch_one(&mut **tx)
    .await?;

    row.try_get("event_id")
}

/// Insert the fused analysis for an event
pub async fn insert_analysis(
    tx: &mut Transaction<'_, Postgres>,
    event_id: Uuid,
    result: &AnalysisResult,
    iterations: serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO analyses (event_id, final_detection, final_confidence, decision_reasoning,
                              iterations, analysis_timestamp)
        VALUES ($1, $2, $3, $4, $5, NOW())
        "#,
    )
    .bind(event_id)
    .bind(result.final_detection)
    .bind(result.final_confidence)
    .bind(&result.decision_reasoning)
    .bind(iterations)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
