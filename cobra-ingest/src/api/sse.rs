//! Server-Sent Events (SSE) stream of ingest progress

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// GET /events
///
/// Streams every ingest event: discovery, stage completion, stalls,
/// enrichment, notifications and index rebuilds.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to ingest events");

    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "SSE client lagged behind, events dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let event_type = event.event_type();
            match serde_json::to_string(&event) {
                Ok(event_json) => {
                    debug!("SSE: Broadcasting event: {}", event_type);
                    yield Ok(Event::default().event(event_type).data(event_json));
                }
                Err(e) => {
                    warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                }
            }
        }
        debug!("SSE: Event bus closed, ending stream");
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
