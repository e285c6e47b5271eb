//! Event types for the Cobra event system
//!
//! Provides the shared event enum and the EventBus used to fan ingest progress
//! out to SSE clients and tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Ingest event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IngestEvent {
    /// Feed watcher inserted a new video row
    VideoDiscovered {
        video_id: i64,
        youtube_id: String,
        channel_youtube_id: String,
        title: String,
        timestamp: DateTime<Utc>,
    },

    /// One enrichment stage committed
    StageCompleted {
        video_id: i64,
        /// Stage name ("transcript", "summary", "embedding")
        stage: String,
        timestamp: DateTime<Utc>,
    },

    /// A stage exhausted its retries or failed permanently
    VideoStalled {
        video_id: i64,
        stage: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Transcript, summary, and embedding all exist
    VideoEnriched {
        video_id: i64,
        youtube_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Outbound notification delivered
    NotificationSent {
        video_id: i64,
        timestamp: DateTime<Utc>,
    },

    /// Vector index replaced from the durable store
    IndexRebuilt {
        vectors: usize,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl IngestEvent {
    /// Event type name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            IngestEvent::VideoDiscovered { .. } => "VideoDiscovered",
            IngestEvent::StageCompleted { .. } => "StageCompleted",
            IngestEvent::VideoStalled { .. } => "VideoStalled",
            IngestEvent::VideoEnriched { .. } => "VideoEnriched",
            IngestEvent::NotificationSent { .. } => "NotificationSent",
            IngestEvent::IndexRebuilt { .. } => "IndexRebuilt",
        }
    }
}

/// Broadcast bus for ingest events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<IngestEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: IngestEvent,
    ) -> Result<usize, broadcast::error::SendError<IngestEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: IngestEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
