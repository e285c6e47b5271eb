//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Channel {
    pub id: i64,
    pub youtube_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Video {
    pub id: i64,
    pub youtube_id: String,
    pub channel_id: i64,
    pub title: String,
    pub youtube_created_at: DateTime<Utc>,
    /// SQLite `CURRENT_TIMESTAMP` text (`YYYY-MM-DD HH:MM:SS`, UTC)
    pub created_at: String,
    pub thumbnail_url: Option<String>,
}

impl Video {
    /// Public watch URL for this video
    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.youtube_id)
    }
}

/// One `video_embedding` row, still in its stored text form
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct EmbeddingRow {
    pub video_id: i64,
    pub embedding: String,
}

/// Pipeline bookkeeping for a video (stall marker, notification flag)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct PipelineStateRow {
    pub video_id: i64,
    pub stalled_stage: Option<String>,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub notified_at: Option<String>,
    pub updated_at: String,
}
