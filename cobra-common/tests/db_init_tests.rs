//! Tests for database initialization
//!
//! Covers first-run creation, reopening an existing store, the exact column
//! layout shared with the presentation layer, and FTS trigger synchronization.

use cobra_common::db::init::init_database;
use sqlx::{Row, SqlitePool};
use tempfile::TempDir;

async fn column_names(pool: &SqlitePool, table: &str) -> Vec<String> {
    sqlx::query(&format!("PRAGMA table_info({})", table))
        .fetch_all(pool)
        .await
        .unwrap()
        .iter()
        .map(|row| row.get::<String, _>("name"))
        .collect()
}

async fn seed_video(pool: &SqlitePool) -> i64 {
    sqlx::query("INSERT INTO channel (youtube_id, name) VALUES ('UC1', 'Channel One')")
        .execute(pool)
        .await
        .unwrap();
    sqlx::query(
        "INSERT INTO video (youtube_id, channel_id, title, youtube_created_at)
         VALUES ('vid1', 1, 'First', '2024-01-01T00:00:00Z')",
    )
    .execute(pool)
    .await
    .unwrap()
    .last_insert_rowid()
}

#[tokio::test]
async fn test_database_creation_when_missing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("cobra.db");

    let result = init_database(&db_path).await;
    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("cobra.db");

    let pool1 = init_database(&db_path).await.unwrap();
    let video_id = seed_video(&pool1).await;
    pool1.close().await;

    // Second open re-runs schema creation without touching data
    let pool2 = init_database(&db_path).await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM video WHERE id = ?")
        .bind(video_id)
        .fetch_one(&pool2)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_shared_tables_keep_exact_columns() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("cobra.db")).await.unwrap();

    assert_eq!(column_names(&pool, "channel").await, ["id", "youtube_id", "name"]);
    assert_eq!(
        column_names(&pool, "video").await,
        [
            "id",
            "youtube_id",
            "channel_id",
            "title",
            "youtube_created_at",
            "created_at",
            "thumbnail_url"
        ]
    );
    assert_eq!(column_names(&pool, "transcript").await, ["id", "video_id", "content"]);
    assert_eq!(column_names(&pool, "summary").await, ["id", "video_id", "content"]);
    assert_eq!(column_names(&pool, "topic").await, ["id", "name"]);
    assert_eq!(column_names(&pool, "video_topic").await, ["video_id", "topic_id"]);
    assert_eq!(column_names(&pool, "quote").await, ["id", "video_id", "content"]);
    assert_eq!(
        column_names(&pool, "video_embedding").await,
        ["video_id", "embedding"]
    );
}

#[tokio::test]
async fn test_foreign_keys_enforced() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("cobra.db")).await.unwrap();

    let result = sqlx::query("INSERT INTO transcript (video_id, content) VALUES (999, 'orphan')")
        .execute(&pool)
        .await;
    assert!(result.is_err(), "Orphan transcript should violate the foreign key");
}

#[tokio::test]
async fn test_video_topic_link_is_unique() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("cobra.db")).await.unwrap();
    let video_id = seed_video(&pool).await;

    sqlx::query("INSERT INTO topic (name) VALUES ('rust')")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO video_topic (video_id, topic_id) VALUES (?, 1)")
        .bind(video_id)
        .execute(&pool)
        .await
        .unwrap();
    let duplicate = sqlx::query("INSERT INTO video_topic (video_id, topic_id) VALUES (?, 1)")
        .bind(video_id)
        .execute(&pool)
        .await;
    assert!(duplicate.is_err());
}

#[tokio::test]
async fn test_fts_projection_follows_transcript_rows() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_database(&temp_dir.path().join("cobra.db")).await.unwrap();
    let video_id = seed_video(&pool).await;

    let transcript_id = sqlx::query("INSERT INTO transcript (video_id, content) VALUES (?, ?)")
        .bind(video_id)
        .bind("the borrow checker keeps memory safe")
        .execute(&pool)
        .await
        .unwrap()
        .last_insert_rowid();

    let hits: Vec<i64> =
        sqlx::query_scalar("SELECT rowid FROM transcript_fts WHERE transcript_fts MATCH 'borrow'")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(hits, vec![transcript_id]);

    sqlx::query("DELETE FROM transcript WHERE id = ?")
        .bind(transcript_id)
        .execute(&pool)
        .await
        .unwrap();

    let hits: Vec<i64> =
        sqlx::query_scalar("SELECT rowid FROM transcript_fts WHERE transcript_fts MATCH 'borrow'")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert!(hits.is_empty(), "Deleted transcript still matched: {:?}", hits);
}
