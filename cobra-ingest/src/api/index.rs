//! Vector index control endpoints
//!
//! `POST /index/rebuild` is the operator's recovery path when the index and
//! the store may have drifted apart.

use axum::{extract::State, routing::get, routing::post, Json, Router};
use chrono::Utc;
use cobra_common::events::IngestEvent;
use tracing::{error, info};

use crate::error::{ApiError, ApiResult};
use crate::index::{IndexStats, RebuildReport};
use crate::AppState;

/// GET /index/stats
pub async fn index_stats(State(state): State<AppState>) -> Json<IndexStats> {
    Json(state.index.stats().await)
}

/// POST /index/rebuild
///
/// Returns 409 while another rebuild requested through the API is running.
pub async fn rebuild_index(State(state): State<AppState>) -> ApiResult<Json<RebuildReport>> {
    let Ok(_guard) = state.rebuild_guard.try_lock() else {
        return Err(ApiError::Conflict("index rebuild already in progress".to_string()));
    };

    info!("Index rebuild requested");
    let report = match state.index.rebuild(&state.db).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Index rebuild failed");
            state.record_error(format!("index rebuild failed: {}", e)).await;
            return Err(e.into());
        }
    };

    state.event_bus.emit_lossy(IngestEvent::IndexRebuilt {
        vectors: report.vectors,
        elapsed_ms: report.elapsed_ms,
        timestamp: Utc::now(),
    });

    Ok(Json(report))
}

/// Build index routes
pub fn index_routes() -> Router<AppState> {
    Router::new()
        .route("/index/stats", get(index_stats))
        .route("/index/rebuild", post(rebuild_index))
}
