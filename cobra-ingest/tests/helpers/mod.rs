//! Test Helper Utilities
//!
//! Temporary databases and scripted fakes for every upstream and downstream
//! collaborator of cobra-ingest.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use cobra_common::config::ChannelConfig;
use cobra_common::db::init::init_database;
use cobra_common::events::EventBus;
use cobra_ingest::clients::{
    FeedEntry, FeedSource, LanguageModel, NotificationSink, SourceError, SummaryRequest,
    TopicRequest, TranscriptSource, UploadHistory, VideoSummary,
};
use cobra_ingest::config::IngestConfig;
use cobra_ingest::index::VectorIndex;
use cobra_ingest::notifier::Notifier;
use cobra_ingest::pipeline::{Pipeline, PipelineSettings};
use cobra_ingest::utils::RetryPolicy;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const EMBEDDING_DIM: usize = 8;

/// Create a temporary database with the full schema
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test_cobra.db");
    let pool = init_database(&db_path)
        .await
        .expect("Failed to initialize test database");
    (temp_dir, pool)
}

pub async fn count_rows(pool: &SqlitePool, table: &str, video_id: i64) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {} WHERE video_id = ?", table))
        .bind(video_id)
        .fetch_one(pool)
        .await
        .expect("count query failed")
}

pub async fn count_all(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .expect("count query failed")
}

/// Fixed reference time so feed entries sort deterministically
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn entry(youtube_id: &str, title: &str, minutes_after_t0: i64) -> FeedEntry {
    FeedEntry {
        youtube_id: youtube_id.to_string(),
        title: title.to_string(),
        published: t0() + ChronoDuration::minutes(minutes_after_t0),
        thumbnail_url: Some(format!("https://i.ytimg.com/vi/{}/hqdefault.jpg", youtube_id)),
    }
}

pub fn channel(youtube_id: &str, name: &str) -> ChannelConfig {
    ChannelConfig {
        youtube_id: youtube_id.to_string(),
        name: name.to_string(),
        system_prompt: None,
    }
}

/// Config with the given channels and millisecond-scale retries
pub fn test_config(channels: Vec<ChannelConfig>) -> IngestConfig {
    let mut config = IngestConfig::default();
    config.base.channels = channels;
    config.watcher.fetch_max_attempts = 3;
    config.watcher.retry_initial_ms = 1;
    config.watcher.retry_max_ms = 4;
    config.watcher.fetch_timeout_secs = 5;
    config.pipeline.stage_max_attempts = 3;
    config.pipeline.retry_initial_ms = 1;
    config.pipeline.retry_max_ms = 4;
    config.pipeline.call_timeout_secs = 5;
    config
}

/// Deterministic embedding of a text: byte values folded into 8 buckets
pub fn embed_text(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBEDDING_DIM];
    for (i, byte) in text.bytes().enumerate() {
        vector[i % EMBEDDING_DIM] += f32::from(byte) / 255.0;
    }
    vector[0] += 1.0;
    vector
}

// ============================================================================
// Feed
// ============================================================================

#[derive(Default)]
pub struct FakeFeed {
    entries: Mutex<HashMap<String, Vec<FeedEntry>>>,
    failures: Mutex<HashMap<String, SourceError>>,
    calls: Mutex<HashMap<String, u32>>,
}

impl FakeFeed {
    pub fn set_entries(&self, channel: &str, entries: Vec<FeedEntry>) {
        self.entries
            .lock()
            .unwrap()
            .insert(channel.to_string(), entries);
    }

    /// Every fetch for `channel` fails with `error`
    pub fn fail_channel(&self, channel: &str, error: SourceError) {
        self.failures
            .lock()
            .unwrap()
            .insert(channel.to_string(), error);
    }

    pub fn calls(&self, channel: &str) -> u32 {
        self.calls.lock().unwrap().get(channel).copied().unwrap_or(0)
    }
}

#[async_trait]
impl FeedSource for FakeFeed {
    async fn fetch_entries(&self, channel_youtube_id: &str) -> Result<Vec<FeedEntry>, SourceError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(channel_youtube_id.to_string())
            .or_default() += 1;

        if let Some(error) = self.failures.lock().unwrap().get(channel_youtube_id) {
            return Err(error.clone());
        }
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(channel_youtube_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl UploadHistory for FakeFeed {
    async fn list_uploads(
        &self,
        channel_youtube_id: &str,
        max_results: usize,
    ) -> Result<Vec<FeedEntry>, SourceError> {
        let mut entries = self.fetch_entries(channel_youtube_id).await?;
        entries.truncate(max_results);
        Ok(entries)
    }
}

// ============================================================================
// Transcripts
// ============================================================================

#[derive(Default)]
pub struct FakeTranscripts {
    texts: Mutex<HashMap<String, String>>,
    permanent_failures: Mutex<HashSet<String>>,
    transient_failures_left: AtomicU32,
    pub calls: AtomicU32,
}

impl FakeTranscripts {
    pub fn set_text(&self, youtube_id: &str, text: &str) {
        self.texts
            .lock()
            .unwrap()
            .insert(youtube_id.to_string(), text.to_string());
    }

    pub fn fail_permanently(&self, youtube_id: &str) {
        self.permanent_failures
            .lock()
            .unwrap()
            .insert(youtube_id.to_string());
    }

    pub fn fail_transiently(&self, times: u32) {
        self.transient_failures_left.store(times, Ordering::SeqCst);
    }
}

pub fn default_transcript(youtube_id: &str) -> String {
    format!("spoken words of video {} about async rust and databases", youtube_id)
}

#[async_trait]
impl TranscriptSource for FakeTranscripts {
    async fn fetch_transcript(&self, video_youtube_id: &str) -> Result<String, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.permanent_failures.lock().unwrap().contains(video_youtube_id) {
            return Err(SourceError::permanent("transcript unavailable"));
        }
        if take_one(&self.transient_failures_left) {
            return Err(SourceError::transient("HTTP 503 from transcript source"));
        }
        Ok(self
            .texts
            .lock()
            .unwrap()
            .get(video_youtube_id)
            .cloned()
            .unwrap_or_else(|| default_transcript(video_youtube_id)))
    }
}

/// Decrement the counter if it is positive; returns whether it was
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// ============================================================================
// Language model
// ============================================================================

#[derive(Default)]
pub struct FakeModel {
    summarize_transient_left: AtomicU32,
    summarize_permanent: AtomicBool,
    embed_transient_left: AtomicU32,
    /// Embedding input containing any of these fails permanently
    embed_permanent_markers: Mutex<Vec<String>>,
    embed_delay: Mutex<Option<Duration>>,
    topics: Mutex<Vec<String>>,
    /// Transcript marker → topics returned by `extract_topics`
    topic_overrides: Mutex<Vec<(String, Vec<String>)>>,
    /// Topic extraction for a transcript containing any of these fails permanently
    topic_failure_markers: Mutex<Vec<String>>,
    pub summarize_calls: AtomicU32,
    pub topic_calls: AtomicU32,
    /// Topic lists offered to `extract_topics`, one per call
    pub topic_requests: Mutex<Vec<Vec<String>>>,
    pub embed_calls: AtomicU32,
    /// Topic lists offered to the model, one per summarize call
    pub offered_topics: Mutex<Vec<Vec<String>>>,
}

impl FakeModel {
    pub fn fail_summarize_transiently(&self, times: u32) {
        self.summarize_transient_left.store(times, Ordering::SeqCst);
    }

    pub fn fail_summarize_permanently(&self, fail: bool) {
        self.summarize_permanent.store(fail, Ordering::SeqCst);
    }

    pub fn fail_embed_transiently(&self, times: u32) {
        self.embed_transient_left.store(times, Ordering::SeqCst);
    }

    pub fn fail_embed_for(&self, marker: &str) {
        self.embed_permanent_markers
            .lock()
            .unwrap()
            .push(marker.to_string());
    }

    pub fn clear_embed_failures(&self) {
        self.embed_permanent_markers.lock().unwrap().clear();
    }

    pub fn set_embed_delay(&self, delay: Duration) {
        *self.embed_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_topics(&self, topics: &[&str]) {
        *self.topics.lock().unwrap() = topics.iter().map(|t| t.to_string()).collect();
    }

    pub fn set_topics_for(&self, marker: &str, topics: &[&str]) {
        self.topic_overrides.lock().unwrap().push((
            marker.to_string(),
            topics.iter().map(|t| t.to_string()).collect(),
        ));
    }

    pub fn fail_topics_for(&self, marker: &str) {
        self.topic_failure_markers
            .lock()
            .unwrap()
            .push(marker.to_string());
    }

    fn configured_topics(&self) -> Vec<String> {
        let configured = self.topics.lock().unwrap().clone();
        if configured.is_empty() {
            vec!["Rust".to_string(), " databases ".to_string()]
        } else {
            configured
        }
    }
}

#[async_trait]
impl LanguageModel for FakeModel {
    async fn summarize(&self, request: SummaryRequest<'_>) -> Result<VideoSummary, SourceError> {
        self.summarize_calls.fetch_add(1, Ordering::SeqCst);
        self.offered_topics
            .lock()
            .unwrap()
            .push(request.existing_topics.to_vec());

        if self.summarize_permanent.load(Ordering::SeqCst) {
            return Err(SourceError::permanent("model rejected the request"));
        }
        if take_one(&self.summarize_transient_left) {
            return Err(SourceError::transient("HTTP 429 rate limited"));
        }

        let topics = self.configured_topics();
        let first_words: String = request
            .transcript
            .split_whitespace()
            .take(6)
            .collect::<Vec<_>>()
            .join(" ");

        Ok(VideoSummary {
            summary: format!("Summary: {}", first_words),
            topics,
            quotes: vec![format!("\"{}\"", first_words)],
        })
    }

    async fn extract_topics(&self, request: TopicRequest<'_>) -> Result<Vec<String>, SourceError> {
        self.topic_calls.fetch_add(1, Ordering::SeqCst);
        self.topic_requests
            .lock()
            .unwrap()
            .push(request.existing_topics.to_vec());

        let failing = self
            .topic_failure_markers
            .lock()
            .unwrap()
            .iter()
            .any(|marker| request.transcript.contains(marker.as_str()));
        if failing {
            return Err(SourceError::permanent("model rejected the request"));
        }

        let overridden = self
            .topic_overrides
            .lock()
            .unwrap()
            .iter()
            .find(|(marker, _)| request.transcript.contains(marker.as_str()))
            .map(|(_, topics)| topics.clone());
        Ok(overridden.unwrap_or_else(|| self.configured_topics()))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, SourceError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.embed_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let permanent = self
            .embed_permanent_markers
            .lock()
            .unwrap()
            .iter()
            .any(|marker| text.contains(marker.as_str()));
        if permanent {
            return Err(SourceError::permanent("HTTP 400 input rejected"));
        }
        if take_one(&self.embed_transient_left) {
            return Err(SourceError::transient("connection reset"));
        }
        Ok(embed_text(text))
    }
}

// ============================================================================
// Notification sink
// ============================================================================

#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Messages that mention the given video id
    pub fn count_for(&self, youtube_id: &str) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.contains(&format!("watch?v={}", youtube_id)))
            .count()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, message: &str) -> Result<(), SourceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SourceError::transient("webhook returned HTTP 502"));
        }
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

// ============================================================================
// Assembled pipeline
// ============================================================================

/// A pipeline wired to fakes, with handles to every fake for scripting
pub struct TestPipeline {
    pub pool: SqlitePool,
    pub pipeline: Arc<Pipeline>,
    pub index: Arc<VectorIndex>,
    pub event_bus: EventBus,
    pub transcripts: Arc<FakeTranscripts>,
    pub model: Arc<FakeModel>,
    pub sink: Arc<RecordingSink>,
}

pub fn test_settings() -> PipelineSettings {
    PipelineSettings {
        retry: RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(4)),
        call_timeout: Duration::from_secs(5),
        db_lock_wait_ms: 2000,
        max_input_chars: 24_000,
        default_system_prompt: "Summarize the transcript.".to_string(),
        channel_prompts: HashMap::new(),
        archive_dir: None,
    }
}

pub fn build_pipeline(pool: &SqlitePool, settings: PipelineSettings) -> TestPipeline {
    let index = Arc::new(VectorIndex::new());
    let event_bus = EventBus::new(256);
    let transcripts = Arc::new(FakeTranscripts::default());
    let model = Arc::new(FakeModel::default());
    let sink = Arc::new(RecordingSink::default());
    let notifier = Arc::new(Notifier::new(
        sink.clone(),
        true,
        Duration::from_secs(5),
    ));

    let pipeline = Arc::new(Pipeline::new(
        pool.clone(),
        transcripts.clone(),
        model.clone(),
        Arc::clone(&index),
        notifier,
        event_bus.clone(),
        settings,
    ));

    TestPipeline {
        pool: pool.clone(),
        pipeline,
        index,
        event_bus,
        transcripts,
        model,
        sink,
    }
}

/// Insert a channel (if needed) and a video as the watcher would
pub async fn seed_video(pool: &SqlitePool, channel_youtube_id: &str, video: &FeedEntry) -> i64 {
    let channel = cobra_ingest::db::channels::get_or_create_channel(
        pool,
        channel_youtube_id,
        &format!("Channel {}", channel_youtube_id),
    )
    .await
    .expect("channel insert failed");

    cobra_ingest::db::videos::insert_video_if_new(
        pool,
        cobra_ingest::db::videos::NewVideo {
            channel_id: channel.id,
            youtube_id: &video.youtube_id,
            title: &video.title,
            published: video.published,
            thumbnail_url: video.thumbnail_url.as_deref(),
        },
    )
    .await
    .expect("video insert failed")
    .expect("video already existed")
}
