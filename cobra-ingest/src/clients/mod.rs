//! Upstream and downstream collaborators
//!
//! Every external call goes through one of the traits below so the watcher and
//! the pipeline can be driven by scripted fakes in tests. Failures are reported
//! as [`SourceError`], split into transient (retry) and permanent (stall).

pub mod discord;
pub mod openai;
pub mod transcript;
pub mod youtube_feed;

pub use discord::{DiscordWebhookSink, LogSink};
pub use openai::OpenAiClient;
pub use transcript::TimedTextClient;
pub use youtube_feed::{YoutubeDataApiClient, YoutubeFeedClient};

use crate::utils::Transient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failure of one upstream call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Network, timeout, rate limit or server error; worth retrying
    #[error("transient: {0}")]
    Transient(String),

    /// Malformed data, missing resource or rejection; retrying will not help
    #[error("permanent: {0}")]
    Permanent(String),
}

impl SourceError {
    pub fn transient(message: impl Into<String>) -> Self {
        SourceError::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        SourceError::Permanent(message.into())
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: StatusCode, context: &str) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
        {
            SourceError::Transient(format!("{} returned HTTP {}", context, status))
        } else {
            SourceError::Permanent(format!("{} returned HTTP {}", context, status))
        }
    }
}

impl Transient for SourceError {
    fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return SourceError::from_status(status, "upstream");
        }
        if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
            SourceError::Transient(err.to_string())
        } else {
            // Decode and builder errors
            SourceError::Permanent(err.to_string())
        }
    }
}

/// Build the shared HTTP client for upstream calls
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, SourceError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .user_agent(concat!("cobra-ingest/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SourceError::permanent(format!("HTTP client build failed: {}", e)))
}

/// One video listed in a channel feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub youtube_id: String,
    pub title: String,
    pub published: DateTime<Utc>,
    pub thumbnail_url: Option<String>,
}

/// Structured output of the summarization stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSummary {
    pub summary: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub quotes: Vec<String>,
}

/// Input to the summarization stage
#[derive(Debug, Clone, Copy)]
pub struct SummaryRequest<'a> {
    pub system_prompt: &'a str,
    pub transcript: &'a str,
    /// Known topic names, offered so the model reuses them
    pub existing_topics: &'a [String],
}

/// Input to topic re-extraction for an already transcribed video
#[derive(Debug, Clone, Copy)]
pub struct TopicRequest<'a> {
    pub transcript: &'a str,
    pub existing_topics: &'a [String],
}

/// Recent uploads of a channel (the polling path)
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_entries(&self, channel_youtube_id: &str) -> Result<Vec<FeedEntry>, SourceError>;
}

/// Full upload history of a channel (the backfill path)
#[async_trait]
pub trait UploadHistory: Send + Sync {
    async fn list_uploads(
        &self,
        channel_youtube_id: &str,
        max_results: usize,
    ) -> Result<Vec<FeedEntry>, SourceError>;
}

/// Transcript text keyed by video external id
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    async fn fetch_transcript(&self, video_youtube_id: &str) -> Result<String, SourceError>;
}

/// Summarization and embedding service
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn summarize(&self, request: SummaryRequest<'_>) -> Result<VideoSummary, SourceError>;

    /// Topic names only, preferring names from `existing_topics`
    async fn extract_topics(&self, request: TopicRequest<'_>) -> Result<Vec<String>, SourceError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SourceError>;
}

/// Outbound notification destination
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, message: &str) -> Result<(), SourceError>;
}
