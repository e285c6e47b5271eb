//! Notification Dispatcher
//!
//! Announces a fully enriched video to the configured sink. Delivery is
//! at-least-once: the pipeline records `notified_at` only after the sink
//! accepts the message, and the resume sweep re-sends anything unrecorded.
//! A failed send never rolls back enrichment.

use crate::clients::{NotificationSink, SourceError};
use cobra_common::db::models::Video;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Discord rejects message content longer than this
pub const MAX_MESSAGE_CHARS: usize = 2000;

pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
    mention_everyone: bool,
    timeout: Duration,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>, mention_everyone: bool, timeout: Duration) -> Self {
        Self {
            sink,
            mention_everyone,
            timeout,
        }
    }

    pub fn format_message(&self, video: &Video, summary: &str) -> String {
        let prefix = if self.mention_everyone { "@everyone " } else { "" };
        let message = format!(
            "{}**New Video:** {}\n\n**Summary:** {}",
            prefix,
            video.watch_url(),
            summary.trim()
        );
        truncate_chars(&message, MAX_MESSAGE_CHARS)
    }

    /// Send one message; returns whether the sink accepted it
    pub async fn notify(&self, video: &Video, summary: &str) -> bool {
        let message = self.format_message(video, summary);

        let result = match tokio::time::timeout(self.timeout, self.sink.send(&message)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::transient(format!(
                "notification timed out after {:?}",
                self.timeout
            ))),
        };

        match result {
            Ok(()) => {
                info!(video_id = video.id, youtube_id = %video.youtube_id, "Notification sent");
                true
            }
            Err(e) => {
                warn!(
                    video_id = video.id,
                    youtube_id = %video.youtube_id,
                    error = %e,
                    "Notification failed; enrichment is kept and the send will be retried on resume"
                );
                false
            }
        }
    }
}

/// Cut `text` to at most `max_chars` characters, ending with `…` when cut
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(1);
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.push('…');
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::LogSink;
    use chrono::Utc;

    fn video() -> Video {
        Video {
            id: 1,
            youtube_id: "abc123".to_string(),
            channel_id: 1,
            title: "Title".to_string(),
            youtube_created_at: Utc::now(),
            created_at: "2024-01-01 00:00:00".to_string(),
            thumbnail_url: None,
        }
    }

    #[test]
    fn test_message_format() {
        let notifier = Notifier::new(Arc::new(LogSink), true, Duration::from_secs(5));
        assert_eq!(
            notifier.format_message(&video(), " Short summary. "),
            "@everyone **New Video:** https://www.youtube.com/watch?v=abc123\n\n**Summary:** Short summary."
        );

        let quiet = Notifier::new(Arc::new(LogSink), false, Duration::from_secs(5));
        assert!(quiet.format_message(&video(), "s").starts_with("**New Video:**"));
    }

    #[test]
    fn test_long_summary_truncated() {
        let notifier = Notifier::new(Arc::new(LogSink), true, Duration::from_secs(5));
        let message = notifier.format_message(&video(), &"é".repeat(5000));
        assert_eq!(message.chars().count(), MAX_MESSAGE_CHARS);
        assert!(message.ends_with('…'));
    }

    #[tokio::test]
    async fn test_log_sink_always_delivers() {
        let notifier = Notifier::new(Arc::new(LogSink), true, Duration::from_secs(5));
        assert!(notifier.notify(&video(), "summary").await);
    }
}
