//! Retrieval Service
//!
//! Read-only lexical, semantic and hybrid search over the corpus. Nothing here
//! writes to the store or the index, so every call is safe alongside the
//! pipeline.

use crate::clients::{LanguageModel, SourceError};
use crate::db::{embeddings, search, videos};
use crate::index::{IndexError, Neighbor, VectorIndex};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub use crate::db::search::LexicalHit;

/// Rank constant of reciprocal-rank fusion
pub const RRF_K: f64 = 60.0;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("embedding the query failed: {0}")]
    Embed(#[from] SourceError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Store(#[from] cobra_common::Error),

    #[error("video {0} not found")]
    VideoNotFound(i64),

    #[error("video {0} has no embedding yet")]
    NotEmbedded(i64),
}

/// One fused result; ranks are 1-based positions in each input list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HybridHit {
    pub video_id: i64,
    pub score: f64,
    pub lexical_rank: Option<usize>,
    pub semantic_rank: Option<usize>,
}

pub struct Retrieval {
    db: SqlitePool,
    index: Arc<VectorIndex>,
    model: Arc<dyn LanguageModel>,
    embed_timeout: Duration,
}

impl Retrieval {
    pub fn new(
        db: SqlitePool,
        index: Arc<VectorIndex>,
        model: Arc<dyn LanguageModel>,
        embed_timeout: Duration,
    ) -> Self {
        Self {
            db,
            index,
            model,
            embed_timeout,
        }
    }

    /// Full-text search over transcripts
    pub async fn lexical(&self, query: &str, limit: usize) -> Result<Vec<LexicalHit>, RetrievalError> {
        Ok(search::search_transcripts(&self.db, query, limit).await?)
    }

    /// Nearest neighbors of the embedded query text
    pub async fn semantic(&self, text: &str, k: usize) -> Result<Vec<Neighbor>, RetrievalError> {
        if text.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embed_query(text).await?;
        Ok(self.index.query(&vector, k).await?)
    }

    /// Videos closest to a stored video's embedding, excluding the video itself
    pub async fn similar_to_video(&self, video_id: i64, k: usize) -> Result<Vec<Neighbor>, RetrievalError> {
        if videos::get_video(&self.db, video_id).await?.is_none() {
            return Err(RetrievalError::VideoNotFound(video_id));
        }
        let vector = embeddings::load_embedding(&self.db, video_id)
            .await?
            .ok_or(RetrievalError::NotEmbedded(video_id))?;
        Ok(self.index.query_excluding(&vector, k, video_id).await?)
    }

    /// Lexical and semantic results merged by reciprocal-rank fusion
    pub async fn hybrid(&self, text: &str, k: usize) -> Result<Vec<HybridHit>, RetrievalError> {
        if text.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let depth = candidate_depth(k);

        let lexical = self.lexical(text, depth).await?;
        let semantic = self.semantic(text, depth).await?;
        debug!(
            lexical = lexical.len(),
            semantic = semantic.len(),
            k,
            "Fusing hybrid search results"
        );

        let lexical_ids: Vec<i64> = lexical.iter().map(|hit| hit.video_id).collect();
        let semantic_ids: Vec<i64> = semantic.iter().map(|n| n.video_id).collect();
        Ok(reciprocal_rank_fusion(&lexical_ids, &semantic_ids, k))
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, SourceError> {
        match tokio::time::timeout(self.embed_timeout, self.model.embed(text)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::transient(format!(
                "query embedding timed out after {:?}",
                self.embed_timeout
            ))),
        }
    }
}

/// How many candidates each mode contributes before fusion
fn candidate_depth(k: usize) -> usize {
    k.saturating_mul(2).max(20)
}

/// Merge two ranked id lists; score is the sum of `1 / (RRF_K + rank)`
///
/// Ordered by score descending, ties by ascending video id.
pub fn reciprocal_rank_fusion(lexical: &[i64], semantic: &[i64], k: usize) -> Vec<HybridHit> {
    let mut fused: HashMap<i64, HybridHit> = HashMap::new();

    let mut add = |ids: &[i64], lexical_list: bool| {
        for (position, &video_id) in ids.iter().enumerate() {
            let rank = position + 1;
            let hit = fused.entry(video_id).or_insert(HybridHit {
                video_id,
                score: 0.0,
                lexical_rank: None,
                semantic_rank: None,
            });
            let slot = if lexical_list {
                &mut hit.lexical_rank
            } else {
                &mut hit.semantic_rank
            };
            // A repeated id within one list only counts at its best rank
            if slot.is_none() {
                *slot = Some(rank);
                hit.score += 1.0 / (RRF_K + rank as f64);
            }
        }
    };
    add(lexical, true);
    add(semantic, false);

    let mut hits: Vec<HybridHit> = fused.into_values().collect();
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.video_id.cmp(&b.video_id))
    });
    hits.truncate(k);
    hits
}
