//! Retrieval endpoints
//!
//! - `GET /search?q=&limit=` lexical transcript search
//! - `GET /search/semantic?q=&k=` nearest neighbors of the embedded query
//! - `GET /search/hybrid?q=&k=` reciprocal-rank fusion of both
//! - `GET /videos/:id/similar?k=` neighbors of a stored video

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::index::Neighbor;
use crate::retrieval::{HybridHit, LexicalHit};
use crate::AppState;

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct LexicalParams {
    pub q: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct VectorParams {
    pub q: String,
    pub k: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SimilarParams {
    pub k: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse<T> {
    pub query: String,
    pub results: Vec<T>,
}

#[derive(Debug, Serialize)]
pub struct SimilarResponse {
    pub video_id: i64,
    pub results: Vec<Neighbor>,
}

fn required_query(q: &str) -> ApiResult<&str> {
    let q = q.trim();
    if q.is_empty() {
        return Err(ApiError::BadRequest("query parameter 'q' must not be empty".to_string()));
    }
    Ok(q)
}

fn clamp_limit(requested: Option<usize>) -> ApiResult<usize> {
    match requested.unwrap_or(DEFAULT_LIMIT) {
        0 => Err(ApiError::BadRequest("limit must be at least 1".to_string())),
        n => Ok(n.min(MAX_LIMIT)),
    }
}

/// GET /search
pub async fn lexical_search(
    State(state): State<AppState>,
    Query(params): Query<LexicalParams>,
) -> ApiResult<Json<SearchResponse<LexicalHit>>> {
    let q = required_query(&params.q)?;
    let limit = clamp_limit(params.limit)?;

    let results = state.retrieval.lexical(q, limit).await?;
    debug!(query = q, hits = results.len(), "Lexical search");

    Ok(Json(SearchResponse {
        query: q.to_string(),
        results,
    }))
}

/// GET /search/semantic
pub async fn semantic_search(
    State(state): State<AppState>,
    Query(params): Query<VectorParams>,
) -> ApiResult<Json<SearchResponse<Neighbor>>> {
    let q = required_query(&params.q)?;
    let k = clamp_limit(params.k)?;

    let results = state.retrieval.semantic(q, k).await?;
    Ok(Json(SearchResponse {
        query: q.to_string(),
        results,
    }))
}

/// GET /search/hybrid
pub async fn hybrid_search(
    State(state): State<AppState>,
    Query(params): Query<VectorParams>,
) -> ApiResult<Json<SearchResponse<HybridHit>>> {
    let q = required_query(&params.q)?;
    let k = clamp_limit(params.k)?;

    let results = state.retrieval.hybrid(q, k).await?;
    Ok(Json(SearchResponse {
        query: q.to_string(),
        results,
    }))
}

/// GET /videos/:id/similar
pub async fn similar_videos(
    State(state): State<AppState>,
    Path(video_id): Path<i64>,
    Query(params): Query<SimilarParams>,
) -> ApiResult<Json<SimilarResponse>> {
    let k = clamp_limit(params.k)?;
    let results = state.retrieval.similar_to_video(video_id, k).await?;
    Ok(Json(SimilarResponse { video_id, results }))
}

/// Build retrieval routes
pub fn search_routes() -> Router<AppState> {
    Router::new()
        .route("/search", get(lexical_search))
        .route("/search/semantic", get(semantic_search))
        .route("/search/hybrid", get(hybrid_search))
        .route("/videos/:id/similar", get(similar_videos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_clamping() {
        assert_eq!(clamp_limit(None).unwrap(), DEFAULT_LIMIT);
        assert_eq!(clamp_limit(Some(5000)).unwrap(), MAX_LIMIT);
        assert!(clamp_limit(Some(0)).is_err());
    }

    #[test]
    fn test_blank_query_rejected() {
        assert!(required_query("   ").is_err());
        assert_eq!(required_query(" rust ").unwrap(), "rust");
    }
}
