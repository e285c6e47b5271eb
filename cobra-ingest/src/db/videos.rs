//! Video rows and enrichment progress facts

use chrono::{DateTime, Utc};
use cobra_common::db::models::Video;
use cobra_common::Result;
use sqlx::{Row, SqlitePool};

const VIDEO_COLUMNS: &str =
    "id, youtube_id, channel_id, title, youtube_created_at, created_at, thumbnail_url";

/// A video as first sighted in a feed
#[derive(Debug, Clone, Copy)]
pub struct NewVideo<'a> {
    pub channel_id: i64,
    pub youtube_id: &'a str,
    pub title: &'a str,
    pub published: DateTime<Utc>,
    pub thumbnail_url: Option<&'a str>,
}

/// Insert a video unless its external id is already known
///
/// Returns the new row id, or `None` when the id was already present. The
/// pipeline bookkeeping row is created in the same transaction.
pub async fn insert_video_if_new(pool: &SqlitePool, video: NewVideo<'_>) -> Result<Option<i64>> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO video (youtube_id, channel_id, title, youtube_created_at, thumbnail_url)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(video.youtube_id)
    .bind(video.channel_id)
    .bind(video.title)
    .bind(video.published)
    .bind(video.thumbnail_url)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(None);
    }

    let video_id = result.last_insert_rowid();
    sqlx::query("INSERT OR IGNORE INTO pipeline_state (video_id) VALUES (?)")
        .bind(video_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(Some(video_id))
}

pub async fn get_video(pool: &SqlitePool, id: i64) -> Result<Option<Video>> {
    let video = sqlx::query_as::<_, Video>(&format!(
        "SELECT {} FROM video WHERE id = ?",
        VIDEO_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(video)
}

pub async fn get_video_by_youtube_id(pool: &SqlitePool, youtube_id: &str) -> Result<Option<Video>> {
    let video = sqlx::query_as::<_, Video>(&format!(
        "SELECT {} FROM video WHERE youtube_id = ?",
        VIDEO_COLUMNS
    ))
    .bind(youtube_id)
    .fetch_optional(pool)
    .await?;
    Ok(video)
}

pub async fn count_videos(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM video")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Which enrichment artifacts exist for one video
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentFacts {
    pub has_transcript: bool,
    pub has_summary: bool,
    pub has_embedding: bool,
    pub notified: bool,
}

impl EnrichmentFacts {
    pub fn fully_enriched(&self) -> bool {
        self.has_transcript && self.has_summary && self.has_embedding
    }
}

/// Read the child-row facts progress is derived from
pub async fn enrichment_facts(pool: &SqlitePool, video_id: i64) -> Result<EnrichmentFacts> {
    let row = sqlx::query(
        r#"
        SELECT
            EXISTS (SELECT 1 FROM transcript WHERE video_id = ?1) AS has_transcript,
            EXISTS (SELECT 1 FROM summary WHERE video_id = ?1) AS has_summary,
            EXISTS (SELECT 1 FROM video_embedding WHERE video_id = ?1) AS has_embedding,
            EXISTS (
                SELECT 1 FROM pipeline_state WHERE video_id = ?1 AND notified_at IS NOT NULL
            ) AS notified
        "#,
    )
    .bind(video_id)
    .fetch_one(pool)
    .await?;

    Ok(EnrichmentFacts {
        has_transcript: row.get::<bool, _>("has_transcript"),
        has_summary: row.get::<bool, _>("has_summary"),
        has_embedding: row.get::<bool, _>("has_embedding"),
        notified: row.get::<bool, _>("notified"),
    })
}

/// Videos the pipeline still owes work
///
/// A video qualifies when any artifact is missing, or when the pipeline
/// enriched it but the notification was never delivered. Rows with no
/// bookkeeping entry predate the pipeline and are never re-notified.
pub async fn list_unfinished_video_ids(pool: &SqlitePool) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar(
        r#"
        SELECT v.id FROM video v
        LEFT JOIN pipeline_state ps ON ps.video_id = v.id
        WHERE NOT EXISTS (SELECT 1 FROM transcript t WHERE t.video_id = v.id)
           OR NOT EXISTS (SELECT 1 FROM summary s WHERE s.video_id = v.id)
           OR NOT EXISTS (SELECT 1 FROM video_embedding e WHERE e.video_id = v.id)
           OR (ps.video_id IS NOT NULL AND ps.notified_at IS NULL)
        ORDER BY v.youtube_created_at ASC, v.id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// Videos with a stored transcript, oldest first
pub async fn list_transcribed_video_ids(pool: &SqlitePool) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar(
        r#"
        SELECT v.id FROM video v
        WHERE EXISTS (SELECT 1 FROM transcript t WHERE t.video_id = v.id)
        ORDER BY v.youtube_created_at ASC, v.id ASC
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(ids)
}
