//! In-memory nearest-neighbor index over video embeddings
//!
//! The index mirrors `video_embedding` and can be thrown away and rebuilt from
//! the store at any time. Readers take a point-in-time snapshot (`Arc` clone)
//! and score it without holding a lock; writers are serialized by a mutex and
//! publish a fresh snapshot, so a query never sees a half-applied insert and an
//! insert never interleaves with a rebuild's swap.
//!
//! Policies:
//! - A second insert for a video id replaces the earlier vector.
//! - A rebuild keeps the dimension most stored vectors share and skips the
//!   rest with a warning; an empty index takes the dimension of its first
//!   insert. Inserts and queries of another length are rejected.
//! - Metric is cosine similarity in `f32`; a zero-norm side scores 0.0.
//! - Results are ordered by score descending, ties by ascending video id.

use chrono::{DateTime, Utc};
use cobra_common::embedding::decode_embedding;
use serde::Serialize;
use sqlx::SqlitePool;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::db::embeddings::load_all_embeddings;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("dimension mismatch: index holds {expected}-dimensional vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector has no dimensions")]
    EmptyVector,

    #[error("loading embeddings from store failed: {0}")]
    Store(#[from] cobra_common::Error),
}

/// One query result
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Neighbor {
    pub video_id: i64,
    pub score: f32,
}

/// Dimension shared by most stored vectors
///
/// After an embedding model change the store can hold vectors of two sizes;
/// the larger group wins, and on a tie the group holding the highest video id
/// (the most recently discovered video).
pub fn dominant_dimension(vectors: impl IntoIterator<Item = (i64, usize)>) -> Option<usize> {
    let mut groups: HashMap<usize, (usize, i64)> = HashMap::new();
    for (video_id, dimension) in vectors {
        let group = groups.entry(dimension).or_insert((0, video_id));
        group.0 += 1;
        group.1 = group.1.max(video_id);
    }
    groups
        .into_iter()
        .max_by_key(|(_, (count, newest))| (*count, *newest))
        .map(|(dimension, _)| dimension)
}

/// Whether an insert added a new id or replaced an existing vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Replaced,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub vectors: usize,
    pub dimension: Option<usize>,
    pub last_rebuild: Option<DateTime<Utc>>,
    /// Incremented on every published snapshot
    pub generation: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RebuildReport {
    pub vectors: usize,
    pub skipped: usize,
    pub dimension: Option<usize>,
    pub elapsed_ms: u64,
}

#[derive(Clone)]
struct Entry {
    video_id: i64,
    vector: Arc<[f32]>,
    norm: f32,
}

#[derive(Default)]
struct IndexSnapshot {
    dimension: Option<usize>,
    /// Sorted by video id, ids unique
    entries: Vec<Entry>,
    last_rebuild: Option<DateTime<Utc>>,
    generation: u64,
}

pub struct VectorIndex {
    snapshot: RwLock<Arc<IndexSnapshot>>,
    writer: Mutex<()>,
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorIndex {
    /// Empty index; the first insert fixes the dimension
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(IndexSnapshot::default())),
            writer: Mutex::new(()),
        }
    }

    /// Build an index from every stored embedding (zero rows is valid)
    pub async fn load(pool: &SqlitePool) -> Result<Self, IndexError> {
        let index = Self::new();
        index.rebuild(pool).await?;
        Ok(index)
    }

    /// Replace the live index with one freshly built from the store
    ///
    /// Inserts wait for the rebuild to finish; queries keep reading the old
    /// snapshot until the new one is published.
    pub async fn rebuild(&self, pool: &SqlitePool) -> Result<RebuildReport, IndexError> {
        let _writer = self.writer.lock().await;
        let started = Instant::now();

        let rows = load_all_embeddings(pool).await?;
        let mut skipped = 0usize;
        let mut decoded = Vec::with_capacity(rows.len());
        for row in rows {
            match decode_embedding(&row.embedding) {
                Ok(vector) => decoded.push((row.video_id, vector)),
                Err(e) => {
                    warn!(video_id = row.video_id, "Skipping unreadable embedding: {}", e);
                    skipped += 1;
                }
            }
        }

        let dimension = dominant_dimension(decoded.iter().map(|(id, v)| (*id, v.len())));
        let mut entries = Vec::with_capacity(decoded.len());
        for (video_id, vector) in decoded {
            if Some(vector.len()) != dimension {
                warn!(
                    video_id,
                    expected = ?dimension,
                    actual = vector.len(),
                    "Skipping embedding with minority dimension"
                );
                skipped += 1;
                continue;
            }
            entries.push(Entry::new(video_id, vector.into()));
        }

        // Rows arrive ordered by video_id (primary key)
        entries.sort_by_key(|entry| entry.video_id);

        let previous_generation = self.snapshot.read().await.generation;
        let report = RebuildReport {
            vectors: entries.len(),
            skipped,
            dimension,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        let fresh = IndexSnapshot {
            dimension,
            entries,
            last_rebuild: Some(Utc::now()),
            generation: previous_generation + 1,
        };
        *self.snapshot.write().await = Arc::new(fresh);

        info!(
            vectors = report.vectors,
            skipped = report.skipped,
            elapsed_ms = report.elapsed_ms,
            "Vector index rebuilt from store"
        );
        Ok(report)
    }

    /// Add or replace the vector of one video
    pub async fn insert(
        &self,
        video_id: i64,
        vector: Vec<f32>,
    ) -> Result<InsertOutcome, IndexError> {
        if vector.is_empty() {
            return Err(IndexError::EmptyVector);
        }

        let _writer = self.writer.lock().await;
        let current = self.snapshot.read().await.clone();

        if let Some(expected) = current.dimension {
            if vector.len() != expected {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }

        let entry = Entry::new(video_id, vector.into());
        let mut entries = current.entries.clone();
        let outcome = match entries.binary_search_by_key(&video_id, |e| e.video_id) {
            Ok(position) => {
                entries[position] = entry;
                InsertOutcome::Replaced
            }
            Err(position) => {
                entries.insert(position, entry);
                InsertOutcome::Inserted
            }
        };

        let dimension = current.dimension.or(Some(entries[0].vector.len()));
        *self.snapshot.write().await = Arc::new(IndexSnapshot {
            dimension,
            entries,
            last_rebuild: current.last_rebuild,
            generation: current.generation + 1,
        });

        debug!(video_id, ?outcome, "Vector index insert");
        Ok(outcome)
    }

    /// The `k` most similar videos to `vector`
    ///
    /// Returns fewer than `k` results when the index is smaller, and an empty
    /// list for an empty index.
    pub async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        let snapshot = self.snapshot.read().await.clone();
        snapshot.query(vector, k, None)
    }

    /// Like [`query`](Self::query) but never returns `exclude`
    pub async fn query_excluding(
        &self,
        vector: &[f32],
        k: usize,
        exclude: i64,
    ) -> Result<Vec<Neighbor>, IndexError> {
        let snapshot = self.snapshot.read().await.clone();
        snapshot.query(vector, k, Some(exclude))
    }

    pub async fn contains(&self, video_id: i64) -> bool {
        let snapshot = self.snapshot.read().await.clone();
        snapshot
            .entries
            .binary_search_by_key(&video_id, |e| e.video_id)
            .is_ok()
    }

    pub async fn len(&self) -> usize {
        self.snapshot.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> IndexStats {
        let snapshot = self.snapshot.read().await.clone();
        IndexStats {
            vectors: snapshot.entries.len(),
            dimension: snapshot.dimension,
            last_rebuild: snapshot.last_rebuild,
            generation: snapshot.generation,
        }
    }
}

impl Entry {
    fn new(video_id: i64, vector: Arc<[f32]>) -> Self {
        let norm = l2_norm(&vector);
        Self {
            video_id,
            vector,
            norm,
        }
    }
}

impl IndexSnapshot {
    fn query(
        &self,
        vector: &[f32],
        k: usize,
        exclude: Option<i64>,
    ) -> Result<Vec<Neighbor>, IndexError> {
        let Some(expected) = self.dimension else {
            return Ok(Vec::new());
        };
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if vector.len() != expected {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }

        let query_norm = l2_norm(vector);
        let mut scored: Vec<Neighbor> = self
            .entries
            .iter()
            .filter(|entry| Some(entry.video_id) != exclude)
            .map(|entry| Neighbor {
                video_id: entry.video_id,
                score: cosine_from_parts(dot(vector, &entry.vector), query_norm, entry.norm),
            })
            .collect();

        Ok(top_k(&mut scored, k))
    }
}

/// Ranking order: score descending, then video id ascending
pub fn rank_order(a: &Neighbor, b: &Neighbor) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.video_id.cmp(&b.video_id))
}

fn top_k(scored: &mut Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    if k < scored.len() {
        scored.select_nth_unstable_by(k - 1, rank_order);
        scored.truncate(k);
    }
    scored.sort_unstable_by(rank_order);
    std::mem::take(scored)
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).fold(0.0f32, |acc, (x, y)| acc + x * y)
}

fn l2_norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

fn cosine_from_parts(dot: f32, norm_a: f32, norm_b: f32) -> f32 {
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let score = dot / (norm_a * norm_b);
    if score.is_finite() {
        score
    } else {
        0.0
    }
}

/// Cosine similarity exactly as the index computes it
///
/// Vectors of different length are compared over their common prefix.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    cosine_from_parts(dot(a, b), l2_norm(a), l2_norm(b))
}
