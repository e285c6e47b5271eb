//! Full-text search over `transcript_fts`

use cobra_common::Result;
use sqlx::SqlitePool;

/// One lexical match; `score` is the negated bm25 rank (higher is better)
#[derive(Debug, Clone, PartialEq, serde::Serialize, sqlx::FromRow)]
pub struct LexicalHit {
    pub video_id: i64,
    pub score: f64,
    pub snippet: String,
}

/// Build an FTS5 MATCH expression: every whitespace-separated term quoted
///
/// Quoting neutralizes FTS operators and column filters in user input; the
/// terms are combined with FTS5's implicit AND. Returns `None` for blank input.
pub fn match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect();
    (!terms.is_empty()).then(|| terms.join(" "))
}

/// Rank videos by transcript relevance, best first, ties by video id
pub async fn search_transcripts(
    pool: &SqlitePool,
    query: &str,
    limit: usize,
) -> Result<Vec<LexicalHit>> {
    let Some(expression) = match_expression(query) else {
        return Ok(Vec::new());
    };
    if limit == 0 {
        return Ok(Vec::new());
    }

    let hits = sqlx::query_as::<_, LexicalHit>(
        r#"
        SELECT t.video_id AS video_id,
               -bm25(transcript_fts) AS score,
               snippet(transcript_fts, 0, '[', ']', '…', 12) AS snippet
        FROM transcript_fts
        JOIN transcript t ON t.id = transcript_fts.rowid
        WHERE transcript_fts MATCH ?
        ORDER BY bm25(transcript_fts) ASC, t.video_id ASC
        LIMIT ?
        "#,
    )
    .bind(expression)
    .bind(i64::try_from(limit).unwrap_or(i64::MAX))
    .fetch_all(pool)
    .await?;

    Ok(hits)
}
