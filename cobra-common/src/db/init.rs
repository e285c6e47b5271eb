//! Database initialization
//!
//! Creates the durable store on first run and brings an existing one up to the
//! current schema. Every statement is idempotent (`IF NOT EXISTS`), so this is
//! safe to call on each startup.
//!
//! The channel/video/transcript/summary/topic/video_topic/quote/video_embedding
//! tables are shared with the presentation layer and must keep their exact
//! column layout. `pipeline_state` is owned by the ingest pipeline.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// SQLite busy timeout applied to every pooled connection
const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Connection options apply per connection, unlike one-off PRAGMA queries
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables, indexes, and triggers (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_channel_table(pool).await?;
    create_video_table(pool).await?;
    create_transcript_tables(pool).await?;
    create_summary_table(pool).await?;
    create_topic_tables(pool).await?;
    create_quote_table(pool).await?;
    create_video_embedding_table(pool).await?;
    create_pipeline_state_table(pool).await?;

    info!("Database schema ready");
    Ok(())
}

async fn execute_all(pool: &SqlitePool, statements: &[&str]) -> Result<()> {
    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

async fn create_channel_table(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[r#"
        CREATE TABLE IF NOT EXISTS channel (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            youtube_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL
        )
        "#],
    )
    .await
}

async fn create_video_table(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS video (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                youtube_id TEXT NOT NULL UNIQUE,
                channel_id INTEGER NOT NULL REFERENCES channel(id),
                title TEXT NOT NULL,
                youtube_created_at TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                thumbnail_url TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_video_channel ON video(channel_id)",
        ],
    )
    .await
}

/// Transcript table plus its FTS5 projection
///
/// `transcript_fts` is an external-content table keyed by `transcript.id`.
/// The insert trigger keeps it in sync; the delete trigger handles wholesale
/// replacement when the transcript stage re-runs.
async fn create_transcript_tables(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS transcript (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                video_id INTEGER NOT NULL REFERENCES video(id),
                content TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_transcript_video ON transcript(video_id)",
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS transcript_fts USING fts5(
                content,
                content='transcript',
                content_rowid='id'
            )
            "#,
            r#"
            CREATE TRIGGER IF NOT EXISTS transcript_ai AFTER INSERT ON transcript BEGIN
                INSERT INTO transcript_fts(rowid, content) VALUES (new.id, new.content);
            END
            "#,
            r#"
            CREATE TRIGGER IF NOT EXISTS transcript_ad AFTER DELETE ON transcript BEGIN
                INSERT INTO transcript_fts(transcript_fts, rowid, content)
                VALUES ('delete', old.id, old.content);
            END
            "#,
        ],
    )
    .await
}

async fn create_summary_table(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS summary (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                video_id INTEGER NOT NULL REFERENCES video(id),
                content TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_summary_video ON summary(video_id)",
        ],
    )
    .await
}

async fn create_topic_tables(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS topic (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS video_topic (
                video_id INTEGER NOT NULL REFERENCES video(id),
                topic_id INTEGER NOT NULL REFERENCES topic(id),
                PRIMARY KEY (video_id, topic_id)
            )
            "#,
        ],
    )
    .await
}

async fn create_quote_table(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS quote (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                video_id INTEGER NOT NULL REFERENCES video(id),
                content TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_quote_video ON quote(video_id)",
        ],
    )
    .await
}

async fn create_video_embedding_table(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[r#"
        CREATE TABLE IF NOT EXISTS video_embedding (
            video_id INTEGER PRIMARY KEY REFERENCES video(id),
            embedding TEXT NOT NULL
        )
        "#],
    )
    .await
}

async fn create_pipeline_state_table(pool: &SqlitePool) -> Result<()> {
    execute_all(
        pool,
        &[r#"
        CREATE TABLE IF NOT EXISTS pipeline_state (
            video_id INTEGER PRIMARY KEY REFERENCES video(id),
            stalled_stage TEXT,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            notified_at TEXT,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#],
    )
    .await
}
