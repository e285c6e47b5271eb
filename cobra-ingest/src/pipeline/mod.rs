//! Enrichment Pipeline
//!
//! Drives one video through transcript → summary → embedding. Progress is
//! derived from which child rows exist, so a restart resumes where the store
//! says the video stands. Each stage:
//! - retries transient failures with bounded exponential backoff
//! - commits its output in one transaction that replaces any earlier attempt
//! - on exhausted retries or a permanent failure, records a stall marker and
//!   gives the worker back to the queue
//!
//! After the embedding commit the vector goes into the index and the
//! Notification Dispatcher announces the video.

pub mod archive;
pub mod queue;
mod topics;

pub use queue::{run_workers, work_queue, WorkQueue, WorkReceiver, WorkerReport};
pub use topics::TopicReport;

use crate::clients::{LanguageModel, SourceError, SummaryRequest, TranscriptSource};
use crate::config::IngestConfig;
use crate::db::{channels, embeddings, enrichment, pipeline_state, videos};
use crate::index::VectorIndex;
use crate::notifier::Notifier;
use crate::utils::{retry_on_lock, retry_transient, RetryFailure, RetryPolicy, Transient};
use chrono::Utc;
use cobra_common::db::models::{Channel, Video};
use cobra_common::events::{EventBus, IngestEvent};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Enrichment stages in dependency order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Transcript,
    Summary,
    Embedding,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Transcript => "transcript",
            Stage::Summary => "summary",
            Stage::Embedding => "embedding",
        }
    }

    pub fn parse(name: &str) -> Option<Stage> {
        match name {
            "transcript" => Some(Stage::Transcript),
            "summary" => Some(Stage::Summary),
            "embedding" => Some(Stage::Embedding),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How far a video has come, derived from store contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum VideoProgress {
    Discovered,
    Transcribed,
    Summarized,
    Embedded,
    Notified,
}

impl VideoProgress {
    pub fn from_facts(facts: &videos::EnrichmentFacts) -> Self {
        if !facts.has_transcript {
            VideoProgress::Discovered
        } else if !facts.has_summary {
            VideoProgress::Transcribed
        } else if !facts.has_embedding {
            VideoProgress::Summarized
        } else if !facts.notified {
            VideoProgress::Embedded
        } else {
            VideoProgress::Notified
        }
    }

    /// The stage that moves a video past this point, if any
    pub fn next_stage(&self) -> Option<Stage> {
        match self {
            VideoProgress::Discovered => Some(Stage::Transcript),
            VideoProgress::Transcribed => Some(Stage::Summary),
            VideoProgress::Summarized => Some(Stage::Embedding),
            VideoProgress::Embedded | VideoProgress::Notified => None,
        }
    }
}

/// Progress plus stall marker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoStatus {
    pub video_id: i64,
    pub progress: VideoProgress,
    pub stalled_stage: Option<Stage>,
    pub last_error: Option<String>,
}

pub async fn video_status(db: &SqlitePool, video_id: i64) -> cobra_common::Result<VideoStatus> {
    let facts = videos::enrichment_facts(db, video_id).await?;
    let state = pipeline_state::get_state(db, video_id).await?;
    let (stalled_stage, last_error) = match state {
        Some(row) => (row.stalled_stage.as_deref().and_then(Stage::parse), row.last_error),
        None => (None, None),
    };

    Ok(VideoStatus {
        video_id,
        progress: VideoProgress::from_facts(&facts),
        stalled_stage,
        last_error,
    })
}

/// Failure of one stage attempt
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("store: {0}")]
    Store(#[from] cobra_common::Error),

    #[error("external call timed out after {0:?}")]
    Timeout(Duration),
}

impl Transient for StageFailure {
    fn is_transient(&self) -> bool {
        match self {
            StageFailure::Source(e) => e.is_transient(),
            // A failed commit means "stage not completed"; the rerun is idempotent
            StageFailure::Store(e) => !matches!(
                e,
                cobra_common::Error::Codec(_) | cobra_common::Error::InvalidInput(_)
            ),
            StageFailure::Timeout(_) => true,
        }
    }
}

/// Result of driving one video
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// All stages done; `notified` tells whether the sink accepted the message
    Enriched { notified: bool },
    /// Nothing left to do
    AlreadyComplete,
    Stalled { stage: Stage, error: String },
    Cancelled,
    /// No such video row
    Missing,
}

enum StageStop {
    Stalled { stage: Stage, error: String },
    Cancelled,
}

impl From<StageStop> for ProcessOutcome {
    fn from(stop: StageStop) -> Self {
        match stop {
            StageStop::Stalled { stage, error } => ProcessOutcome::Stalled { stage, error },
            StageStop::Cancelled => ProcessOutcome::Cancelled,
        }
    }
}

/// Tunables for the pipeline, resolved from configuration
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub retry: RetryPolicy,
    pub call_timeout: Duration,
    pub db_lock_wait_ms: u64,
    /// Embedding input limit in characters (0 = unlimited)
    pub max_input_chars: usize,
    pub default_system_prompt: String,
    /// Channel youtube id → summarization prompt
    pub channel_prompts: HashMap<String, String>,
    pub archive_dir: Option<PathBuf>,
}

impl PipelineSettings {
    pub fn from_config(config: &IngestConfig) -> Self {
        let channel_prompts = config
            .channels()
            .iter()
            .filter_map(|c| {
                c.system_prompt
                    .as_ref()
                    .filter(|p| !p.trim().is_empty())
                    .map(|p| (c.youtube_id.clone(), p.clone()))
            })
            .collect();

        Self {
            retry: config.pipeline.stage_retry_policy(),
            call_timeout: config.pipeline.call_timeout(),
            db_lock_wait_ms: config.pipeline.db_lock_wait_ms,
            max_input_chars: config.openai.max_input_chars,
            default_system_prompt: config.openai.default_system_prompt.clone(),
            channel_prompts,
            archive_dir: config.pipeline.archive_dir.clone(),
        }
    }

    fn system_prompt_for(&self, channel: &Channel) -> &str {
        self.channel_prompts
            .get(&channel.youtube_id)
            .map(String::as_str)
            .unwrap_or(&self.default_system_prompt)
    }
}

/// Prefix of `text` holding at most `max_chars` characters (0 = all)
pub fn truncate_to_chars(text: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return text;
    }
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

pub struct Pipeline {
    db: SqlitePool,
    transcripts: Arc<dyn TranscriptSource>,
    model: Arc<dyn LanguageModel>,
    index: Arc<VectorIndex>,
    notifier: Arc<Notifier>,
    event_bus: EventBus,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        db: SqlitePool,
        transcripts: Arc<dyn TranscriptSource>,
        model: Arc<dyn LanguageModel>,
        index: Arc<VectorIndex>,
        notifier: Arc<Notifier>,
        event_bus: EventBus,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            db,
            transcripts,
            model,
            index,
            notifier,
            event_bus,
            settings,
        }
    }

    /// Run every outstanding stage for one video
    ///
    /// Errors are store failures while reading the video's state; stage
    /// failures are reported through [`ProcessOutcome::Stalled`].
    pub async fn process_video(
        &self,
        video_id: i64,
        cancel: &CancellationToken,
    ) -> cobra_common::Result<ProcessOutcome> {
        let Some(video) = videos::get_video(&self.db, video_id).await? else {
            warn!(video_id, "Video row not found, nothing to process");
            return Ok(ProcessOutcome::Missing);
        };
        let channel = channels::get_channel(&self.db, video.channel_id)
            .await?
            .ok_or_else(|| {
                cobra_common::Error::NotFound(format!("channel {} of video {}", video.channel_id, video_id))
            })?;

        let facts = videos::enrichment_facts(&self.db, video_id).await?;
        let tracked = pipeline_state::get_state(&self.db, video_id).await?.is_some();
        let progress = VideoProgress::from_facts(&facts);
        debug!(video_id, youtube_id = %video.youtube_id, ?progress, "Processing video");

        if facts.fully_enriched() {
            if facts.notified || !tracked {
                return Ok(ProcessOutcome::AlreadyComplete);
            }
            // Enriched earlier but the notification never went out
            let notified = self.dispatch_notification(&video).await;
            return Ok(ProcessOutcome::Enriched { notified });
        }

        match self.enrich(&video, &channel, facts, cancel).await {
            Ok(notified) => Ok(ProcessOutcome::Enriched { notified }),
            Err(stop) => Ok(stop.into()),
        }
    }

    async fn enrich(
        &self,
        video: &Video,
        channel: &Channel,
        facts: videos::EnrichmentFacts,
        cancel: &CancellationToken,
    ) -> Result<bool, StageStop> {
        let transcript = if facts.has_transcript {
            self.stored_transcript(video.id).await?
        } else {
            self.transcript_stage(video, channel, cancel).await?
        };

        if !facts.has_summary {
            self.summary_stage(video, channel, &transcript, cancel).await?;
        }

        let vector = self.embedding_stage(video, &transcript, cancel).await?;

        match self.index.insert(video.id, vector).await {
            Ok(outcome) => debug!(video_id = video.id, ?outcome, "Embedding added to index"),
            Err(e) => error!(
                video_id = video.id,
                error = %e,
                "Index insert failed; the store holds the embedding, rebuild the index to recover"
            ),
        }

        info!(video_id = video.id, youtube_id = %video.youtube_id, "Video fully enriched");
        self.event_bus.emit_lossy(IngestEvent::VideoEnriched {
            video_id: video.id,
            youtube_id: video.youtube_id.clone(),
            timestamp: Utc::now(),
        });

        Ok(self.dispatch_notification(video).await)
    }

    async fn stored_transcript(&self, video_id: i64) -> Result<String, StageStop> {
        match enrichment::get_transcript(&self.db, video_id).await {
            Ok(Some(text)) => Ok(text),
            Ok(None) => Err(StageStop::Stalled {
                stage: Stage::Transcript,
                error: "transcript row disappeared".to_string(),
            }),
            Err(e) => Err(StageStop::Stalled {
                stage: Stage::Transcript,
                error: format!("reading transcript failed: {}", e),
            }),
        }
    }

    /// Bound an external call by the configured timeout
    async fn call<T>(
        &self,
        future: impl Future<Output = Result<T, SourceError>>,
    ) -> Result<T, StageFailure> {
        match tokio::time::timeout(self.settings.call_timeout, future).await {
            Ok(result) => result.map_err(StageFailure::from),
            Err(_) => Err(StageFailure::Timeout(self.settings.call_timeout)),
        }
    }

    async fn run_stage<T, F, Fut>(
        &self,
        video_id: i64,
        stage: Stage,
        cancel: &CancellationToken,
        operation: F,
    ) -> Result<T, StageStop>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StageFailure>>,
    {
        let started = Instant::now();
        let operation_name = format!("{} stage for video {}", stage, video_id);

        match retry_transient(&operation_name, self.settings.retry, cancel, operation).await {
            Ok(value) => {
                if let Err(e) = pipeline_state::clear_stall(&self.db, video_id).await {
                    warn!(video_id, stage = %stage, error = %e, "Failed to clear stall marker");
                }
                info!(
                    video_id,
                    stage = %stage,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Stage committed"
                );
                self.event_bus.emit_lossy(IngestEvent::StageCompleted {
                    video_id,
                    stage: stage.as_str().to_string(),
                    timestamp: Utc::now(),
                });
                Ok(value)
            }
            Err(RetryFailure::Cancelled) => {
                info!(video_id, stage = %stage, "Stage cancelled by shutdown");
                Err(StageStop::Cancelled)
            }
            Err(RetryFailure::Failed { attempts, error }) => {
                let message = error.to_string();
                warn!(
                    video_id,
                    stage = %stage,
                    attempt = attempts,
                    error = %message,
                    "Stage stalled"
                );
                if let Err(e) =
                    pipeline_state::mark_stalled(&self.db, video_id, stage.as_str(), attempts, &message)
                        .await
                {
                    error!(video_id, stage = %stage, error = %e, "Failed to record stall marker");
                }
                self.event_bus.emit_lossy(IngestEvent::VideoStalled {
                    video_id,
                    stage: stage.as_str().to_string(),
                    error: message.clone(),
                    timestamp: Utc::now(),
                });
                Err(StageStop::Stalled {
                    stage,
                    error: message,
                })
            }
        }
    }

    async fn transcript_stage(
        &self,
        video: &Video,
        channel: &Channel,
        cancel: &CancellationToken,
    ) -> Result<String, StageStop> {
        let transcript = self
            .run_stage(video.id, Stage::Transcript, cancel, |_| async move {
                let text = self
                    .call(self.transcripts.fetch_transcript(&video.youtube_id))
                    .await?;
                if text.trim().is_empty() {
                    return Err(SourceError::permanent("transcript unavailable").into());
                }
                retry_on_lock("commit transcript", self.settings.db_lock_wait_ms, || {
                    enrichment::replace_transcript(&self.db, video.id, &text)
                })
                .await?;
                Ok(text)
            })
            .await?;

        if let Some(archive_dir) = &self.settings.archive_dir {
            match archive::write_transcript(
                archive_dir,
                &channel.name,
                &video.title,
                video.youtube_created_at,
                &transcript,
            )
            .await
            {
                Ok(path) => debug!(video_id = video.id, path = %path.display(), "Transcript archived"),
                Err(e) => warn!(video_id = video.id, error = %e, "Transcript archive write failed"),
            }
        }

        Ok(transcript)
    }

    async fn summary_stage(
        &self,
        video: &Video,
        channel: &Channel,
        transcript: &str,
        cancel: &CancellationToken,
    ) -> Result<(), StageStop> {
        let system_prompt = self.settings.system_prompt_for(channel);

        self.run_stage(video.id, Stage::Summary, cancel, |_| async move {
            let existing_topics = enrichment::list_topic_names(&self.db).await?;
            let summary = self
                .call(self.model.summarize(SummaryRequest {
                    system_prompt,
                    transcript,
                    existing_topics: &existing_topics,
                }))
                .await?;
            if summary.summary.trim().is_empty() {
                return Err(SourceError::permanent("model returned an empty summary").into());
            }

            retry_on_lock("commit summary", self.settings.db_lock_wait_ms, || {
                enrichment::replace_summary(
                    &self.db,
                    video.id,
                    enrichment::SummaryWrite {
                        summary: summary.summary.trim(),
                        topics: &summary.topics,
                        quotes: &summary.quotes,
                    },
                )
            })
            .await?;
            Ok(())
        })
        .await
    }

    async fn embedding_stage(
        &self,
        video: &Video,
        transcript: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<f32>, StageStop> {
        let input = truncate_to_chars(transcript, self.settings.max_input_chars);

        self.run_stage(video.id, Stage::Embedding, cancel, |_| async move {
            let vector = self.call(self.model.embed(input)).await?;
            if vector.is_empty() || vector.iter().any(|v| !v.is_finite()) {
                return Err(SourceError::permanent("embedding has empty or non-finite values").into());
            }

            retry_on_lock("commit embedding", self.settings.db_lock_wait_ms, || {
                embeddings::store_embedding(&self.db, video.id, &vector)
            })
            .await?;
            Ok(vector)
        })
        .await
    }

    /// Send the announcement and record delivery; returns whether it was delivered
    async fn dispatch_notification(&self, video: &Video) -> bool {
        let summary = match enrichment::get_summary(&self.db, video.id).await {
            Ok(summary) => summary.unwrap_or_default(),
            Err(e) => {
                warn!(video_id = video.id, error = %e, "Cannot read summary for notification");
                return false;
            }
        };

        if !self.notifier.notify(video, &summary).await {
            return false;
        }

        if let Err(e) = retry_on_lock("record notification", self.settings.db_lock_wait_ms, || {
            pipeline_state::mark_notified(&self.db, video.id)
        })
        .await
        {
            // Delivered but unrecorded: the resume sweep may send it again
            warn!(video_id = video.id, error = %e, "Failed to record notification");
        }

        self.event_bus.emit_lossy(IngestEvent::NotificationSent {
            video_id: video.id,
            timestamp: Utc::now(),
        });
        true
    }
}
