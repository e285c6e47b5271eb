//! `video_embedding` rows
//!
//! One row per video; a re-run of the embedding stage overwrites it.

use cobra_common::db::models::EmbeddingRow;
use cobra_common::embedding::{decode_embedding, encode_embedding};
use cobra_common::Result;
use sqlx::SqlitePool;

/// Write (or overwrite) the embedding of a video in one transaction
pub async fn store_embedding(pool: &SqlitePool, video_id: i64, vector: &[f32]) -> Result<()> {
    let encoded = encode_embedding(vector)?;

    let mut tx = pool.begin().await?;
    sqlx::query("INSERT OR REPLACE INTO video_embedding (video_id, embedding) VALUES (?, ?)")
        .bind(video_id)
        .bind(&encoded)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Decoded embedding of one video
pub async fn load_embedding(pool: &SqlitePool, video_id: i64) -> Result<Option<Vec<f32>>> {
    let text: Option<String> =
        sqlx::query_scalar("SELECT embedding FROM video_embedding WHERE video_id = ?")
            .bind(video_id)
            .fetch_optional(pool)
            .await?;
    text.map(|t| decode_embedding(&t)).transpose()
}

/// Every stored row in text form, ordered by video id
pub async fn load_all_embeddings(pool: &SqlitePool) -> Result<Vec<EmbeddingRow>> {
    let rows = sqlx::query_as::<_, EmbeddingRow>(
        "SELECT video_id, embedding FROM video_embedding ORDER BY video_id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn count_embeddings(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM video_embedding")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
