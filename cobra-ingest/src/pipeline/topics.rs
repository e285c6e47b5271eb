//! Corpus-wide topic regeneration
//!
//! Re-extracts the topics of every transcribed video, one video at a time,
//! offering the current topic vocabulary on every call so names converge
//! across the corpus. Only topic links change; summaries and quotes stay as
//! they are. Topics no video links to afterwards are removed.

use super::{Pipeline, StageFailure};
use crate::clients::{SourceError, TopicRequest};
use crate::db::{enrichment, videos};
use crate::utils::{retry_on_lock, retry_transient, RetryFailure};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tally of a regeneration run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopicReport {
    /// Videos with a transcript when the run started
    pub videos: usize,
    pub regenerated: usize,
    /// Videos that kept their previous topics
    pub failed: usize,
    pub pruned_topics: u64,
    pub cancelled: bool,
}

impl Pipeline {
    /// Rewrite the topic links of every transcribed video
    ///
    /// A video whose extraction fails keeps its previous links and the run
    /// moves on. Errors are store failures outside any single video.
    pub async fn regenerate_topics(
        &self,
        cancel: &CancellationToken,
    ) -> cobra_common::Result<TopicReport> {
        let video_ids = videos::list_transcribed_video_ids(&self.db).await?;
        let mut report = TopicReport {
            videos: video_ids.len(),
            ..TopicReport::default()
        };
        info!(videos = report.videos, "Regenerating topics");

        for video_id in video_ids {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            match self.regenerate_video_topics(video_id, cancel).await {
                Ok(topics) => {
                    debug!(video_id, ?topics, "Topics regenerated");
                    report.regenerated += 1;
                }
                Err(RetryFailure::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(RetryFailure::Failed { attempts, error }) => {
                    warn!(
                        video_id,
                        attempt = attempts,
                        error = %error,
                        "Topic regeneration failed, keeping previous topics"
                    );
                    report.failed += 1;
                }
            }
        }

        report.pruned_topics = enrichment::prune_unused_topics(&self.db).await?;
        info!(
            regenerated = report.regenerated,
            failed = report.failed,
            pruned_topics = report.pruned_topics,
            cancelled = report.cancelled,
            "Topic regeneration finished"
        );
        Ok(report)
    }

    async fn regenerate_video_topics(
        &self,
        video_id: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, RetryFailure<StageFailure>> {
        let operation_name = format!("topic regeneration for video {}", video_id);

        retry_transient(&operation_name, self.settings.retry, cancel, |_| async move {
            let transcript = enrichment::get_transcript(&self.db, video_id)
                .await?
                .ok_or_else(|| SourceError::permanent("transcript row disappeared"))?;
            let existing_topics = enrichment::list_topic_names(&self.db).await?;

            let topics = self
                .call(self.model.extract_topics(TopicRequest {
                    transcript: &transcript,
                    existing_topics: &existing_topics,
                }))
                .await?;
            if topics.iter().all(|t| enrichment::normalize_topic(t).is_none()) {
                return Err(SourceError::permanent("model returned no topics").into());
            }

            let linked = retry_on_lock("commit topics", self.settings.db_lock_wait_ms, || {
                enrichment::replace_video_topics(&self.db, video_id, &topics)
            })
            .await?;
            Ok(linked)
        })
        .await
    }
}
