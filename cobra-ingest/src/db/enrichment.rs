//! Transcript, summary and topic writes
//!
//! Each stage's output replaces whatever an earlier attempt left behind, inside
//! one transaction. Re-running a stage therefore never duplicates summary,
//! quote or topic-link rows.

use cobra_common::Result;
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::collections::BTreeSet;

/// Replace the transcript of a video
pub async fn replace_transcript(pool: &SqlitePool, video_id: i64, content: &str) -> Result<i64> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM transcript WHERE video_id = ?")
        .bind(video_id)
        .execute(&mut *tx)
        .await?;

    let transcript_id = sqlx::query("INSERT INTO transcript (video_id, content) VALUES (?, ?)")
        .bind(video_id)
        .bind(content)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

    tx.commit().await?;
    Ok(transcript_id)
}

pub async fn get_transcript(pool: &SqlitePool, video_id: i64) -> Result<Option<String>> {
    let content = sqlx::query_scalar(
        "SELECT content FROM transcript WHERE video_id = ? ORDER BY id DESC LIMIT 1",
    )
    .bind(video_id)
    .fetch_optional(pool)
    .await?;
    Ok(content)
}

pub async fn get_summary(pool: &SqlitePool, video_id: i64) -> Result<Option<String>> {
    let content =
        sqlx::query_scalar("SELECT content FROM summary WHERE video_id = ? ORDER BY id DESC LIMIT 1")
            .bind(video_id)
            .fetch_optional(pool)
            .await?;
    Ok(content)
}

/// All known topic names, alphabetically
pub async fn list_topic_names(pool: &SqlitePool) -> Result<Vec<String>> {
    let names = sqlx::query_scalar("SELECT name FROM topic ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(names)
}

pub async fn topics_for_video(pool: &SqlitePool, video_id: i64) -> Result<Vec<String>> {
    let names = sqlx::query_scalar(
        r#"
        SELECT t.name FROM topic t
        JOIN video_topic vt ON vt.topic_id = t.id
        WHERE vt.video_id = ?
        ORDER BY t.name
        "#,
    )
    .bind(video_id)
    .fetch_all(pool)
    .await?;
    Ok(names)
}

pub async fn quotes_for_video(pool: &SqlitePool, video_id: i64) -> Result<Vec<String>> {
    let quotes = sqlx::query_scalar("SELECT content FROM quote WHERE video_id = ? ORDER BY id")
        .bind(video_id)
        .fetch_all(pool)
        .await?;
    Ok(quotes)
}

/// Trimmed, lowercased topic name; `None` for blanks
pub fn normalize_topic(name: &str) -> Option<String> {
    let normalized = name.trim().to_lowercase();
    (!normalized.is_empty()).then_some(normalized)
}

/// Summary-stage output ready for storage
#[derive(Debug, Clone, Copy)]
pub struct SummaryWrite<'a> {
    pub summary: &'a str,
    pub topics: &'a [String],
    pub quotes: &'a [String],
}

/// Replace summary, quotes and topic links of a video
pub async fn replace_summary(
    pool: &SqlitePool,
    video_id: i64,
    write: SummaryWrite<'_>,
) -> Result<()> {
    let topics: BTreeSet<String> = write.topics.iter().filter_map(|t| normalize_topic(t)).collect();

    let mut tx = pool.begin().await?;

    for table in ["summary", "quote", "video_topic"] {
        sqlx::query(&format!("DELETE FROM {} WHERE video_id = ?", table))
            .bind(video_id)
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query("INSERT INTO summary (video_id, content) VALUES (?, ?)")
        .bind(video_id)
        .bind(write.summary)
        .execute(&mut *tx)
        .await?;

    link_topics(&mut tx, video_id, &topics).await?;

    for quote in write.quotes.iter().map(|q| q.trim()).filter(|q| !q.is_empty()) {
        sqlx::query("INSERT INTO quote (video_id, content) VALUES (?, ?)")
            .bind(video_id)
            .bind(quote)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Replace only the topic links of a video; summary and quotes are untouched
///
/// Returns the normalized topic names that were linked.
pub async fn replace_video_topics(
    pool: &SqlitePool,
    video_id: i64,
    topics: &[String],
) -> Result<Vec<String>> {
    let topics: BTreeSet<String> = topics.iter().filter_map(|t| normalize_topic(t)).collect();

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM video_topic WHERE video_id = ?")
        .bind(video_id)
        .execute(&mut *tx)
        .await?;
    link_topics(&mut tx, video_id, &topics).await?;
    tx.commit().await?;

    Ok(topics.into_iter().collect())
}

/// Delete topics no video links to any more; returns how many went
pub async fn prune_unused_topics(pool: &SqlitePool) -> Result<u64> {
    let removed = sqlx::query(
        "DELETE FROM topic WHERE id NOT IN (SELECT DISTINCT topic_id FROM video_topic)",
    )
    .execute(pool)
    .await?
    .rows_affected();
    Ok(removed)
}

async fn link_topics(
    tx: &mut Transaction<'_, Sqlite>,
    video_id: i64,
    topics: &BTreeSet<String>,
) -> Result<()> {
    for topic in topics {
        sqlx::query("INSERT OR IGNORE INTO topic (name) VALUES (?)")
            .bind(topic)
            .execute(&mut **tx)
            .await?;
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO video_topic (video_id, topic_id)
            SELECT ?, id FROM topic WHERE name = ?
            "#,
        )
        .bind(video_id)
        .bind(topic)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_topic() {
        assert_eq!(normalize_topic("  Drink Combos "), Some("drink combos".to_string()));
        assert_eq!(normalize_topic("   "), None);
    }
}
