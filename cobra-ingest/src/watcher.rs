//! Feed Watcher
//!
//! On every tick, fetches each configured channel's feed, inserts videos whose
//! external id is new, and enqueues exactly those for enrichment. A channel
//! whose fetch keeps failing is skipped for the tick; other channels and later
//! ticks are unaffected.

use crate::clients::{FeedEntry, FeedSource, SourceError, UploadHistory};
use crate::config::IngestConfig;
use crate::db::{channels, videos};
use crate::pipeline::WorkQueue;
use crate::utils::{retry_transient, RetryFailure, RetryPolicy};
use chrono::Utc;
use cobra_common::db::models::Channel;
use cobra_common::events::{EventBus, IngestEvent};
use cobra_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of one discovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub channels_polled: usize,
    pub channels_failed: usize,
    /// Row ids of videos inserted by this pass
    pub new_videos: Vec<i64>,
    /// How many of them were handed to the work queue
    pub enqueued: usize,
}

pub struct FeedWatcher {
    db: SqlitePool,
    feed: Arc<dyn FeedSource>,
    queue: WorkQueue,
    event_bus: EventBus,
    channels: Vec<Channel>,
    retry: RetryPolicy,
    fetch_timeout: Duration,
    poll_interval: Duration,
    resume_every_ticks: u64,
}

impl FeedWatcher {
    /// Create the watcher, registering configured channels in the store
    pub async fn new(
        db: SqlitePool,
        feed: Arc<dyn FeedSource>,
        queue: WorkQueue,
        event_bus: EventBus,
        config: &IngestConfig,
    ) -> Result<Self> {
        let mut registered = Vec::with_capacity(config.channels().len());
        for channel in config.channels() {
            let row = channels::get_or_create_channel(&db, &channel.youtube_id, &channel.name).await?;
            debug!(channel = %row.youtube_id, id = row.id, "Channel registered");
            registered.push(row);
        }

        Ok(Self {
            db,
            feed,
            queue,
            event_bus,
            channels: registered,
            retry: config.watcher.fetch_retry_policy(),
            fetch_timeout: config.watcher.fetch_timeout(),
            poll_interval: config.watcher.poll_interval(),
            resume_every_ticks: config.watcher.resume_every_ticks,
        })
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// One discovery pass over every channel
    pub async fn poll_once(&self, cancel: &CancellationToken) -> PollReport {
        let mut report = PollReport::default();

        for channel in &self.channels {
            if cancel.is_cancelled() {
                break;
            }
            report.channels_polled += 1;

            let operation = format!("feed fetch for {}", channel.youtube_id);
            let fetched = retry_transient(&operation, self.retry, cancel, |_| async move {
                match tokio::time::timeout(self.fetch_timeout, self.feed.fetch_entries(&channel.youtube_id))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(SourceError::transient(format!(
                        "feed fetch timed out after {:?}",
                        self.fetch_timeout
                    ))),
                }
            })
            .await;

            let entries = match fetched {
                Ok(entries) => entries,
                Err(RetryFailure::Cancelled) => break,
                Err(RetryFailure::Failed { attempts, error }) => {
                    warn!(
                        channel = %channel.youtube_id,
                        attempt = attempts,
                        error = %error,
                        "Feed fetch failed, skipping channel until next tick"
                    );
                    report.channels_failed += 1;
                    continue;
                }
            };

            let discovered = self.discover(channel, entries).await;
            report.enqueued += discovered.enqueued;
            report.new_videos.extend(discovered.new_videos);
        }

        if !report.new_videos.is_empty() || report.channels_failed > 0 {
            info!(
                channels = report.channels_polled,
                failed = report.channels_failed,
                new_videos = report.new_videos.len(),
                "Feed poll complete"
            );
        } else {
            debug!(channels = report.channels_polled, "Feed poll found nothing new");
        }
        report
    }

    /// Insert unseen entries (oldest first) and enqueue the inserted rows
    async fn discover(&self, channel: &Channel, mut entries: Vec<FeedEntry>) -> PollReport {
        let mut report = PollReport::default();
        entries.sort_by(|a, b| a.published.cmp(&b.published));

        for entry in &entries {
            let inserted = videos::insert_video_if_new(
                &self.db,
                videos::NewVideo {
                    channel_id: channel.id,
                    youtube_id: &entry.youtube_id,
                    title: &entry.title,
                    published: entry.published,
                    thumbnail_url: entry.thumbnail_url.as_deref(),
                },
            )
            .await;

            let video_id = match inserted {
                Ok(Some(video_id)) => video_id,
                Ok(None) => continue,
                Err(e) => {
                    error!(
                        channel = %channel.youtube_id,
                        youtube_id = %entry.youtube_id,
                        error = %e,
                        "Failed to record discovered video"
                    );
                    continue;
                }
            };

            info!(
                video_id,
                youtube_id = %entry.youtube_id,
                channel = %channel.youtube_id,
                title = %entry.title,
                "New video discovered"
            );
            self.event_bus.emit_lossy(IngestEvent::VideoDiscovered {
                video_id,
                youtube_id: entry.youtube_id.clone(),
                channel_youtube_id: channel.youtube_id.clone(),
                title: entry.title.clone(),
                timestamp: Utc::now(),
            });

            report.new_videos.push(video_id);
            if self.queue.enqueue(video_id).await {
                report.enqueued += 1;
            }
        }

        report
    }

    /// Enqueue every video the pipeline still owes work
    pub async fn resume_sweep(&self) -> Result<usize> {
        let pending = videos::list_unfinished_video_ids(&self.db).await?;
        let total = pending.len();
        let queued = self.queue.enqueue_all(pending).await;
        if total > 0 {
            info!(pending = total, queued, "Resume sweep enqueued unfinished videos");
        }
        Ok(queued)
    }

    /// Discover historical uploads of one configured channel
    pub async fn backfill(
        &self,
        history: &dyn UploadHistory,
        channel_youtube_id: &str,
        count: usize,
        cancel: &CancellationToken,
    ) -> Result<PollReport> {
        let channel = self
            .channels
            .iter()
            .find(|c| c.youtube_id == channel_youtube_id)
            .ok_or_else(|| {
                Error::NotFound(format!("channel {} is not configured", channel_youtube_id))
            })?;

        let operation = format!("upload history for {}", channel.youtube_id);
        let entries = retry_transient(&operation, self.retry, cancel, |_| {
            history.list_uploads(&channel.youtube_id, count)
        })
        .await
        .map_err(|failure| match failure {
            RetryFailure::Cancelled => Error::Internal("backfill cancelled".to_string()),
            RetryFailure::Failed { error, .. } => {
                Error::Internal(format!("backfill of {} failed: {}", channel.youtube_id, error))
            }
        })?;

        info!(
            channel = %channel.youtube_id,
            listed = entries.len(),
            "Backfill listing received"
        );

        let mut report = self.discover(channel, entries).await;
        report.channels_polled = 1;
        Ok(report)
    }

    /// Poll on a fixed interval until cancelled
    ///
    /// Runs a resume sweep first, then every `resume_every_ticks` ticks.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            channels = self.channels.len(),
            interval_secs = self.poll_interval.as_secs(),
            "Feed watcher started"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick: u64 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let sweep_due = tick == 0
                || (self.resume_every_ticks > 0 && tick % self.resume_every_ticks == 0);
            tick += 1;

            if sweep_due {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = self.resume_sweep() => {
                        if let Err(e) = result {
                            error!(error = %e, "Resume sweep failed");
                        }
                    }
                }
            }

            // Dropping a pass midway is safe: inserted-but-unqueued videos are
            // picked up by the next resume sweep
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.poll_once(&cancel) => {}
            }
        }

        info!("Feed watcher stopped");
    }
}
