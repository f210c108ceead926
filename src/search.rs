//! Hybrid search: fusion of semantic and lexical signals.
//!
//! Given a textual query and a set of library scopes, returns the top-k
//! embedding records fused from two ranked candidate sets:
//!
//! 1. Top `2k` records by cosine distance (pgvector) within the scope.
//! 2. Top `2k` records by lexical rank among full-text matches of the
//!    web-style query.
//! 3. Reciprocal-rank scores: `score(id) = 1 / (k + rank(id))`, with an
//!    absent contribution scoring 0.
//! 4. `final(id) = w_sem · score_sem(id) + w_txt · score_txt(id)`.
//! 5. Top `k` by `final` descending, both partial scores included.
//!
//! Weights come from an explicit caller override (must sum to 1.0) or,
//! per record, from the owning library's configuration. Semantic-only and
//! textual-only modes force the other weight to 0 and skip the unused
//! candidate fetch.
//!
//! # Query validation
//!
//! Queries are trimmed, must be 2–500 characters, and must not contain the
//! standalone uppercase tokens `AND`/`OR`/`NOT`: lexical matching is
//! web-style (`"phrase"`, `-exclude`, bare tokens OR'd), not boolean SQL.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::EmbeddingKind;
use crate::store::{validate_weights, Candidate, Store};
use crate::strategies::{ModelOverrides, Strategies};

pub const DEFAULT_LIMIT: i64 = 10;
pub const MAX_LIMIT: i64 = 100;
const MIN_QUERY_CHARS: usize = 2;
const MAX_QUERY_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Hybrid,
    Semantic,
    Textual,
}

#[derive(Debug, Clone)]
pub struct SearchParams {
    pub query: String,
    pub library_uuids: Vec<Uuid>,
    pub limit: Option<i64>,
    /// Caller override; both weights or neither, summing to 1.0.
    pub semantic_weight: Option<f64>,
    pub textual_weight: Option<f64>,
    pub active_only: bool,
    pub embedding_model: Option<String>,
}

/// One fused result record with both partial scores.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub embedding_id: i64,
    pub library_uuid: Uuid,
    pub document_id: i64,
    pub chapter_id: Option<i64>,
    pub kind: EmbeddingKind,
    pub text: String,
    pub metadata: serde_json::Value,
    pub score: f64,
    pub score_semantic: f64,
    pub score_textual: f64,
}

/// Validate and normalize the raw query string.
pub fn validate_query(query: &str) -> Result<String> {
    let trimmed = query.trim();
    let chars = trimmed.chars().count();

    if chars < MIN_QUERY_CHARS || chars > MAX_QUERY_CHARS {
        return Err(Error::Validation(format!(
            "query must be between {} and {} characters, got {}",
            MIN_QUERY_CHARS, MAX_QUERY_CHARS, chars
        )));
    }

    if let Some(token) = trimmed
        .split_whitespace()
        .find(|t| matches!(*t, "AND" | "OR" | "NOT"))
    {
        return Err(Error::Validation(format!(
            "boolean operator '{}' is not supported; use web syntax instead: \
             \"a phrase\" for exact phrases, -word to exclude, and spaces between \
             terms for OR",
            token
        )));
    }

    Ok(trimmed.to_string())
}

pub struct SearchEngine {
    store: Arc<Store>,
    strategies: Arc<Strategies>,
}

impl SearchEngine {
    pub fn new(store: Arc<Store>, strategies: Arc<Strategies>) -> Self {
        Self { store, strategies }
    }

    pub async fn search(&self, params: &SearchParams, mode: SearchMode) -> Result<Vec<SearchHit>> {
        let query = validate_query(&params.query)?;

        if params.library_uuids.is_empty() {
            return Err(Error::Validation("at least one library is required".into()));
        }

        let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
        if limit < 1 || limit > MAX_LIMIT {
            return Err(Error::Validation(format!(
                "limit must be between 1 and {}",
                MAX_LIMIT
            )));
        }

        let override_weights = match (params.semantic_weight, params.textual_weight) {
            (Some(s), Some(t)) => {
                validate_weights(s, t)?;
                Some((s, t))
            }
            (None, None) => None,
            _ => {
                return Err(Error::Validation(
                    "semantic_weight and textual_weight must be provided together".into(),
                ))
            }
        };

        // Resolve external identifiers and build the per-library weight map.
        let mut library_ids = Vec::with_capacity(params.library_uuids.len());
        let mut uuid_by_id = HashMap::new();
        let mut weights_by_library = HashMap::new();
        let mut first_library = None;

        for uuid in &params.library_uuids {
            let library = self.store.get_library(*uuid).await?;
            library_ids.push(library.id);
            uuid_by_id.insert(library.id, library.uuid);
            weights_by_library.insert(
                library.id,
                (library.semantic_weight, library.textual_weight),
            );
            first_library.get_or_insert(library);
        }
        let first_library = first_library.expect("non-empty library scope");

        let candidate_k = limit * 2;

        let semantic = if mode != SearchMode::Textual {
            let overrides = ModelOverrides {
                embedding_model: params.embedding_model.clone(),
                completion_model: None,
            };
            let vector = self
                .strategies
                .query_embedding(&first_library, &overrides, &query)
                .await?;
            self.store
                .semantic_candidates(&library_ids, &vector, candidate_k, params.active_only)
                .await?
        } else {
            Vec::new()
        };

        let lexical = if mode != SearchMode::Semantic {
            self.store
                .lexical_candidates(&library_ids, &query, candidate_k, params.active_only)
                .await?
        } else {
            Vec::new()
        };

        debug!(
            semantic = semantic.len(),
            lexical = lexical.len(),
            mode = ?mode,
            "candidate sets fetched"
        );

        let weights_for = |library_id: i64| -> (f64, f64) {
            let base = override_weights
                .or_else(|| weights_by_library.get(&library_id).copied())
                .unwrap_or((0.5, 0.5));
            match mode {
                SearchMode::Hybrid => base,
                SearchMode::Semantic => (1.0, 0.0),
                SearchMode::Textual => (0.0, 1.0),
            }
        };

        let fused = fuse_candidates(&semantic, &lexical, limit, weights_for);

        Ok(fused
            .into_iter()
            .map(|f| SearchHit {
                embedding_id: f.candidate.embedding_id,
                library_uuid: uuid_by_id
                    .get(&f.candidate.library_id)
                    .copied()
                    .unwrap_or_default(),
                document_id: f.candidate.document_id,
                chapter_id: f.candidate.chapter_id,
                kind: f.candidate.kind,
                text: f.candidate.text.clone(),
                metadata: f.candidate.metadata.clone(),
                score: f.score,
                score_semantic: f.score_semantic,
                score_textual: f.score_textual,
            })
            .collect())
    }
}

// ============ Fusion ============

struct Fused<'a> {
    candidate: &'a Candidate,
    score: f64,
    score_semantic: f64,
    score_textual: f64,
}

/// Reciprocal-rank fusion over the two candidate sets. Ranks are 1-based
/// fetch positions; a record missing from a set contributes 0 from it.
fn fuse_candidates<'a>(
    semantic: &'a [Candidate],
    lexical: &'a [Candidate],
    k: i64,
    weights_for: impl Fn(i64) -> (f64, f64),
) -> Vec<Fused<'a>> {
    let k_f = k as f64;

    let sem_rank: HashMap<i64, usize> = semantic
        .iter()
        .enumerate()
        .map(|(i, c)| (c.embedding_id, i + 1))
        .collect();
    let lex_rank: HashMap<i64, usize> = lexical
        .iter()
        .enumerate()
        .map(|(i, c)| (c.embedding_id, i + 1))
        .collect();

    let mut by_id: HashMap<i64, &Candidate> = HashMap::new();
    for c in semantic.iter().chain(lexical.iter()) {
        by_id.entry(c.embedding_id).or_insert(c);
    }

    let mut fused: Vec<Fused<'a>> = by_id
        .into_values()
        .map(|candidate| {
            let score_semantic = sem_rank
                .get(&candidate.embedding_id)
                .map(|r| 1.0 / (k_f + *r as f64))
                .unwrap_or(0.0);
            let score_textual = lex_rank
                .get(&candidate.embedding_id)
                .map(|r| 1.0 / (k_f + *r as f64))
                .unwrap_or(0.0);

            let (w_sem, w_txt) = weights_for(candidate.library_id);
            Fused {
                candidate,
                score: w_sem * score_semantic + w_txt * score_textual,
                score_semantic,
                score_textual,
            }
        })
        .collect();

    // A record whose only contribution comes from a zero-weighted signal
    // carries no evidence; with weights forced to (1, 0) this makes hybrid
    // results identical to the semantic-only mode.
    fused.retain(|f| f.score > 0.0);

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.candidate.embedding_id.cmp(&b.candidate.embedding_id))
    });
    fused.truncate(k as usize);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: i64, library_id: i64) -> Candidate {
        Candidate {
            embedding_id: id,
            library_id,
            document_id: 1,
            chapter_id: None,
            kind: EmbeddingKind::Chunk,
            text: format!("text {}", id),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn test_query_too_short() {
        let err = validate_query("a").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_query_too_long() {
        assert!(validate_query(&"x".repeat(501)).is_err());
        assert!(validate_query(&"x".repeat(500)).is_ok());
    }

    #[test]
    fn test_query_trims_whitespace() {
        assert_eq!(validate_query("  café leite  ").unwrap(), "café leite");
    }

    #[test]
    fn test_boolean_tokens_rejected_with_web_syntax_hint() {
        let err = validate_query("café AND leite").unwrap_err().to_string();
        assert!(err.contains("AND"));
        assert!(err.contains("\"a phrase\""));
        assert!(err.contains("-word"));

        assert!(validate_query("tea OR coffee").is_err());
        assert!(validate_query("milk NOT sugar").is_err());
    }

    #[test]
    fn test_lowercase_boolean_words_allowed() {
        assert!(validate_query("ham and eggs").is_ok());
        assert!(validate_query("to be or not to be").is_ok());
        // Substrings are not standalone tokens.
        assert!(validate_query("ANDROID HANDBOOK").is_ok());
    }

    #[test]
    fn test_fusion_combines_both_signals() {
        // E1 leads lexically, E2 leads semantically; textual-heavy weights
        // must put E1 first with its textual score dominating.
        let semantic = vec![candidate(2, 1), candidate(1, 1)];
        let lexical = vec![candidate(1, 1), candidate(2, 1)];

        let fused = fuse_candidates(&semantic, &lexical, 10, |_| (0.4, 0.6));
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].candidate.embedding_id, 1);
        assert!(fused[0].score_textual > fused[0].score_semantic);

        // score = w_sem / (k + rank_sem) + w_txt / (k + rank_txt)
        let expected_e1 = 0.4 / 12.0 + 0.6 / 11.0;
        assert!((fused[0].score - expected_e1).abs() < 1e-12);
    }

    #[test]
    fn test_fusion_absent_contribution_is_zero() {
        let semantic = vec![candidate(1, 1)];
        let lexical = vec![candidate(2, 1)];

        let fused = fuse_candidates(&semantic, &lexical, 10, |_| (0.7, 0.3));
        let e1 = fused.iter().find(|f| f.candidate.embedding_id == 1).unwrap();
        let e2 = fused.iter().find(|f| f.candidate.embedding_id == 2).unwrap();
        assert_eq!(e1.score_textual, 0.0);
        assert_eq!(e2.score_semantic, 0.0);
    }

    #[test]
    fn test_fusion_semantic_only_weights() {
        let semantic = vec![candidate(1, 1), candidate(2, 1)];
        let lexical = vec![candidate(2, 1), candidate(3, 1)];

        let fused = fuse_candidates(&semantic, &lexical, 10, |_| (1.0, 0.0));
        // Records found only lexically carry no evidence under semantic-only
        // weights and are dropped entirely.
        assert!(fused.iter().all(|f| f.candidate.embedding_id != 3));
        assert_eq!(fused[0].candidate.embedding_id, 1);
    }

    #[test]
    fn test_fusion_truncates_to_k() {
        let semantic: Vec<Candidate> = (1..=8).map(|i| candidate(i, 1)).collect();
        let fused = fuse_candidates(&semantic, &[], 3, |_| (1.0, 0.0));
        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].candidate.embedding_id, 1);
    }

    #[test]
    fn test_fusion_per_library_weights() {
        // Same ranks, different owning libraries with opposite weights.
        let semantic = vec![candidate(1, 1)];
        let lexical = vec![candidate(2, 2)];

        let fused = fuse_candidates(&semantic, &lexical, 10, |lib| match lib {
            1 => (1.0, 0.0),
            _ => (0.0, 1.0),
        });
        let e1 = fused.iter().find(|f| f.candidate.embedding_id == 1).unwrap();
        let e2 = fused.iter().find(|f| f.candidate.embedding_id == 2).unwrap();
        assert!(e1.score > 0.0);
        assert!(e2.score > 0.0);
    }
}
