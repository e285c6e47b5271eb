//! Pipeline bookkeeping: stall markers and the notified flag

use cobra_common::db::models::PipelineStateRow;
use cobra_common::Result;
use sqlx::SqlitePool;

/// Record that `stage` gave up after `attempts` attempts
pub async fn mark_stalled(
    pool: &SqlitePool,
    video_id: i64,
    stage: &str,
    attempts: u32,
    error: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO pipeline_state (video_id, stalled_stage, attempts, last_error, updated_at)
        VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(video_id) DO UPDATE SET
            stalled_stage = excluded.stalled_stage,
            attempts = pipeline_state.attempts + excluded.attempts,
            last_error = excluded.last_error,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(video_id)
    .bind(stage)
    .bind(i64::from(attempts))
    .bind(error)
    .execute(pool)
    .await?;
    Ok(())
}

/// Clear a stall marker after a stage succeeds (no-op when not stalled)
pub async fn clear_stall(pool: &SqlitePool, video_id: i64) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE pipeline_state
        SET stalled_stage = NULL, last_error = NULL, updated_at = CURRENT_TIMESTAMP
        WHERE video_id = ? AND stalled_stage IS NOT NULL
        "#,
    )
    .bind(video_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record successful notification delivery
pub async fn mark_notified(pool: &SqlitePool, video_id: i64) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO pipeline_state (video_id, notified_at, updated_at)
        VALUES (?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
        ON CONFLICT(video_id) DO UPDATE SET
            notified_at = CURRENT_TIMESTAMP,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(video_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_state(pool: &SqlitePool, video_id: i64) -> Result<Option<PipelineStateRow>> {
    let row = sqlx::query_as::<_, PipelineStateRow>(
        r#"
        SELECT video_id, stalled_stage, attempts, last_error, notified_at, updated_at
        FROM pipeline_state WHERE video_id = ?
        "#,
    )
    .bind(video_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn list_stalled(pool: &SqlitePool) -> Result<Vec<PipelineStateRow>> {
    let rows = sqlx::query_as::<_, PipelineStateRow>(
        r#"
        SELECT video_id, stalled_stage, attempts, last_error, notified_at, updated_at
        FROM pipeline_state
        WHERE stalled_stage IS NOT NULL
        ORDER BY video_id
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
