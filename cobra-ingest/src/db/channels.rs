//! Channel rows
//!
//! A channel is created the first time it appears in configuration and is
//! never modified afterwards.

use cobra_common::db::models::Channel;
use cobra_common::Result;
use sqlx::SqlitePool;

/// Return the channel row for `youtube_id`, creating it on first sight
pub async fn get_or_create_channel(
    pool: &SqlitePool,
    youtube_id: &str,
    name: &str,
) -> Result<Channel> {
    sqlx::query("INSERT OR IGNORE INTO channel (youtube_id, name) VALUES (?, ?)")
        .bind(youtube_id)
        .bind(name)
        .execute(pool)
        .await?;

    let channel = sqlx::query_as::<_, Channel>(
        "SELECT id, youtube_id, name FROM channel WHERE youtube_id = ?",
    )
    .bind(youtube_id)
    .fetch_one(pool)
    .await?;

    Ok(channel)
}

pub async fn get_channel(pool: &SqlitePool, id: i64) -> Result<Option<Channel>> {
    let channel =
        sqlx::query_as::<_, Channel>("SELECT id, youtube_id, name FROM channel WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
    Ok(channel)
}

pub async fn list_channels(pool: &SqlitePool) -> Result<Vec<Channel>> {
    let channels =
        sqlx::query_as::<_, Channel>("SELECT id, youtube_id, name FROM channel ORDER BY id")
            .fetch_all(pool)
            .await?;
    Ok(channels)
}
