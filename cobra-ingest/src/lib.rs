//! cobra-ingest library interface
//!
//! Exposes the ingestion pipeline, the vector index and the retrieval API for
//! the binary and for integration testing.

pub mod api;
pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod index;
pub mod notifier;
pub mod pipeline;
pub mod retrieval;
pub mod utils;
pub mod watcher;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use cobra_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tower_http::trace::TraceLayer;

use crate::index::VectorIndex;
use crate::retrieval::Retrieval;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub index: Arc<VectorIndex>,
    pub retrieval: Arc<Retrieval>,
    /// Held while an operator-triggered rebuild runs
    pub rebuild_guard: Arc<Mutex<()>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        index: Arc<VectorIndex>,
        retrieval: Arc<Retrieval>,
    ) -> Self {
        Self {
            db,
            event_bus,
            index,
            retrieval,
            rebuild_guard: Arc::new(Mutex::new(())),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Remember an error for the health endpoint
    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::health_routes())
        .merge(api::search_routes())
        .merge(api::index_routes())
        .route("/events", get(api::event_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
