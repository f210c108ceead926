//! Embedding generation strategies.
//!
//! A strategy turns a chapter (or a free-text query) into one or more
//! embedding records, dispatched by request kind:
//!
//! | Strategy | Input | Output |
//! |----------|-------|--------|
//! | Query | query string | one vector, never persisted |
//! | Chapter | chapter + mode | chapter-kind and/or chunk-kind records |
//! | Q&A | chapter + pair count | one `qa_pair` record per valid pair |
//! | Summary | chapter + length bound | one `summary` record, degradable |
//!
//! Model resolution is uniform: explicit request override → library default
//! → global default from configuration. Strategies obtain services by model
//! name from the pool behind the [`LlmRouter`] capability.
//!
//! # Failure semantics
//!
//! An embedding call failure aborts the surrounding chapter with a retryable
//! error. A Q&A parse failure discards only that pair. A summary failure
//! degrades to "no summary" and is logged.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{ChunkingConfig, LlmConfig, RagConfig};
use crate::error::{Error, Result};
use crate::llm::{retry_call, EmbedOp, LlmRouter};
use crate::models::{Chapter, Document, EmbeddingKind, Library, NewEmbedding};
use crate::splitter::chunk_chapter;
use crate::tokenize::count_tokens;

/// How a chapter is rendered into embedding records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterMode {
    /// Embed metadata‖body as one chapter-kind record.
    FullTextMetadata,
    /// Embed only the compact metadata serialization.
    OnlyMetadata,
    /// Embed only the chapter body.
    OnlyText,
    /// One chapter-kind record (metadata) plus one chunk-kind record per
    /// split chunk.
    SplitTextMetadata,
    /// `split_text_metadata` when the chapter exceeds the division
    /// threshold, `full_text_metadata` otherwise (threshold inclusive).
    Auto,
}

/// Everything a chapter-level strategy needs to know about its position in
/// the hierarchy.
pub struct ChapterContext<'a> {
    pub library: &'a Library,
    pub document: &'a Document,
    pub chapter: &'a Chapter,
}

/// Resolved model names for one request.
#[derive(Debug, Clone, Default)]
pub struct ModelOverrides {
    pub embedding_model: Option<String>,
    pub completion_model: Option<String>,
}

/// Strategy engine: owns the router handle, budgets, and model defaults.
pub struct Strategies {
    router: Arc<dyn LlmRouter>,
    chunking: ChunkingConfig,
    rag: RagConfig,
    max_attempts: u32,
    retry_delay: Duration,
}

impl Strategies {
    pub fn new(
        router: Arc<dyn LlmRouter>,
        chunking: ChunkingConfig,
        rag: RagConfig,
        llm: &LlmConfig,
    ) -> Self {
        Self {
            router,
            chunking,
            rag,
            max_attempts: llm.max_retries,
            retry_delay: Duration::from_secs(llm.retry_delay_secs),
        }
    }

    pub fn chunking(&self) -> &ChunkingConfig {
        &self.chunking
    }

    /// Embedding model precedence: request override → library default →
    /// global default. `None` leaves the choice to the pool strategy.
    pub fn resolve_embedding_model(
        &self,
        overrides: &ModelOverrides,
        library: &Library,
    ) -> Option<String> {
        overrides
            .embedding_model
            .clone()
            .or_else(|| library.default_embedding_model().map(|s| s.to_string()))
            .or_else(|| self.rag.embedding_default_model.clone())
    }

    /// Completion model precedence, same shape as embedding resolution.
    pub fn resolve_completion_model(
        &self,
        overrides: &ModelOverrides,
        library: &Library,
    ) -> Option<String> {
        overrides
            .completion_model
            .clone()
            .or_else(|| library.default_completion_model().map(|s| s.to_string()))
            .or_else(|| self.rag.completion_default_model.clone())
    }

    async fn embed_one(&self, model: Option<&str>, op: EmbedOp, text: &str) -> Result<Vec<f32>> {
        let texts = vec![text.to_string()];
        let vectors = retry_call(self.max_attempts, self.retry_delay, "embedding", || {
            self.router.embed(model, op, &texts)
        })
        .await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::Internal("empty embedding response".into()))
    }

    // ============ Query strategy ============

    /// Embed a search query. The vector is used for ranking and discarded.
    pub async fn query_embedding(
        &self,
        library: &Library,
        overrides: &ModelOverrides,
        query: &str,
    ) -> Result<Vec<f32>> {
        let model = self.resolve_embedding_model(overrides, library);
        self.embed_one(model.as_deref(), EmbedOp::Query, query).await
    }

    // ============ Chapter strategy ============

    /// Generate the chapter's embedding records per `mode`.
    pub async fn chapter_embeddings(
        &self,
        ctx: &ChapterContext<'_>,
        overrides: &ModelOverrides,
        mode: ChapterMode,
    ) -> Result<Vec<NewEmbedding>> {
        let mode = match mode {
            ChapterMode::Auto => {
                if ctx.chapter.token_count as usize > self.chunking.chapter_split_threshold_tokens {
                    ChapterMode::SplitTextMetadata
                } else {
                    ChapterMode::FullTextMetadata
                }
            }
            explicit => explicit,
        };

        let model = self.resolve_embedding_model(overrides, ctx.library);
        let metadata_text = compact_metadata(ctx);

        match mode {
            ChapterMode::OnlyText => {
                let vector = self
                    .embed_one(model.as_deref(), EmbedOp::Document, &ctx.chapter.content)
                    .await?;
                Ok(vec![self.chapter_record(ctx, ctx.chapter.content.clone(), vector)])
            }
            ChapterMode::OnlyMetadata => {
                let vector = self
                    .embed_one(model.as_deref(), EmbedOp::Document, &metadata_text)
                    .await?;
                Ok(vec![self.chapter_record(ctx, metadata_text, vector)])
            }
            ChapterMode::FullTextMetadata => {
                let text = format!("{}\n\n{}", metadata_text, ctx.chapter.content);
                let vector = self.embed_one(model.as_deref(), EmbedOp::Document, &text).await?;
                Ok(vec![self.chapter_record(ctx, text, vector)])
            }
            ChapterMode::SplitTextMetadata => {
                let mut records = Vec::new();

                let vector = self
                    .embed_one(model.as_deref(), EmbedOp::Document, &metadata_text)
                    .await?;
                records.push(self.chapter_record(ctx, metadata_text, vector));

                let chunks = chunk_chapter(&ctx.chapter.content, &self.chunking);
                for (i, chunk) in chunks.into_iter().enumerate() {
                    let vector = self.embed_one(model.as_deref(), EmbedOp::Document, &chunk).await?;
                    records.push(NewEmbedding {
                        chapter_id: Some(ctx.chapter.id),
                        text: chunk,
                        order_in_chapter: (i + 1) as i32,
                        kind: EmbeddingKind::Chunk,
                        vector,
                        metadata: base_metadata(ctx),
                    });
                }

                Ok(records)
            }
            ChapterMode::Auto => unreachable!("auto resolved above"),
        }
    }

    fn chapter_record(
        &self,
        ctx: &ChapterContext<'_>,
        text: String,
        vector: Vec<f32>,
    ) -> NewEmbedding {
        NewEmbedding {
            chapter_id: Some(ctx.chapter.id),
            text,
            order_in_chapter: 0,
            kind: EmbeddingKind::Chapter,
            vector,
            metadata: base_metadata(ctx),
        }
    }

    // ============ Q&A strategy ============

    /// Generate up to `pair_count` question/answer pairs grounded in the
    /// chapter and embed each valid pair. An empty parse is a success with
    /// zero records.
    pub async fn qa_embeddings(
        &self,
        ctx: &ChapterContext<'_>,
        overrides: &ModelOverrides,
        pair_count: usize,
    ) -> Result<Vec<NewEmbedding>> {
        let completion_model = self.resolve_completion_model(overrides, ctx.library);
        let embedding_model = self.resolve_embedding_model(overrides, ctx.library);

        let system = "You generate question/answer pairs for retrieval indexing. \
                      Answer strictly from the provided text. \
                      Respond with a JSON array of objects with \"question\" and \"answer\" fields.";
        let user = format!(
            "Produce {} question/answer pairs grounded in this text:\n\n{}",
            pair_count, ctx.chapter.content
        );

        let raw = retry_call(self.max_attempts, self.retry_delay, "qa_completion", || {
            self.router.complete(completion_model.as_deref(), system, &user)
        })
        .await?;

        let pairs = parse_qa_pairs(&raw);
        debug!(
            chapter = ctx.chapter.id,
            parsed = pairs.len(),
            requested = pair_count,
            "qa pairs parsed"
        );

        let mut records = Vec::new();
        for (i, pair) in pairs.into_iter().take(pair_count).enumerate() {
            let text = format!("{}\n{}", pair.question, pair.answer);
            let vector = self
                .embed_one(embedding_model.as_deref(), EmbedOp::Document, &text)
                .await?;

            let mut metadata = base_metadata(ctx);
            metadata["question"] = serde_json::Value::String(pair.question.clone());
            metadata["answer_snippet"] =
                serde_json::Value::String(truncate_chars(&pair.answer, 200));

            records.push(NewEmbedding {
                chapter_id: Some(ctx.chapter.id),
                text,
                order_in_chapter: i as i32,
                kind: EmbeddingKind::QaPair,
                vector,
                metadata,
            });
        }

        Ok(records)
    }

    // ============ Summary strategy ============

    /// Generate and embed a chapter summary. Any failure on this path
    /// degrades to `None` and is logged; the chapter itself still succeeds.
    pub async fn summary_embedding(
        &self,
        ctx: &ChapterContext<'_>,
        overrides: &ModelOverrides,
        max_summary_chars: usize,
        focus: Option<&str>,
    ) -> Option<(String, NewEmbedding)> {
        match self
            .try_summary(ctx, overrides, max_summary_chars, focus)
            .await
        {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(chapter = ctx.chapter.id, error = %e, "summary generation failed, continuing without");
                None
            }
        }
    }

    async fn try_summary(
        &self,
        ctx: &ChapterContext<'_>,
        overrides: &ModelOverrides,
        max_summary_chars: usize,
        focus: Option<&str>,
    ) -> Result<(String, NewEmbedding)> {
        let completion_model = self.resolve_completion_model(overrides, ctx.library);
        let embedding_model = self.resolve_embedding_model(overrides, ctx.library);

        let system = "You write dense, factual summaries for retrieval indexing.";
        let user = match focus {
            Some(f) => format!(
                "Summarize the following text in at most {} characters, focusing on {}:\n\n{}",
                max_summary_chars, f, ctx.chapter.content
            ),
            None => format!(
                "Summarize the following text in at most {} characters:\n\n{}",
                max_summary_chars, ctx.chapter.content
            ),
        };

        let raw = retry_call(self.max_attempts, self.retry_delay, "summary_completion", || {
            self.router.complete(completion_model.as_deref(), system, &user)
        })
        .await?;

        let summary = truncate_chars(raw.trim(), max_summary_chars);
        if summary.is_empty() {
            return Err(Error::Internal("empty summary".into()));
        }

        let vector = self
            .embed_one(embedding_model.as_deref(), EmbedOp::Document, &summary)
            .await?;

        let mut metadata = base_metadata(ctx);
        metadata["summary"] = serde_json::Value::String(summary.clone());

        let record = NewEmbedding {
            chapter_id: Some(ctx.chapter.id),
            text: summary.clone(),
            order_in_chapter: 0,
            kind: EmbeddingKind::Summary,
            vector,
            metadata,
        };

        Ok((summary, record))
    }
}

// ============ Metadata rendering ============

/// Back-linking and full-text metadata shared by every record of a chapter.
/// Keys feed the store's weighted full-text vector.
fn base_metadata(ctx: &ChapterContext<'_>) -> serde_json::Value {
    let mut metadata = serde_json::json!({
        "name": ctx.document.title,
        "chapter_title": ctx.chapter.title,
        "chapter_id": ctx.chapter.id,
    });
    if let Some(area) = &ctx.library.area {
        metadata["area"] = serde_json::Value::String(area.clone());
    }
    if let Some(keywords) = ctx.document.metadata.get("keywords") {
        metadata["keywords"] = keywords.clone();
    }
    if let Some(author) = ctx.document.metadata.get("author") {
        metadata["author"] = author.clone();
    }
    metadata
}

/// Compact serialization of chapter metadata for metadata-bearing modes.
fn compact_metadata(ctx: &ChapterContext<'_>) -> String {
    let mut parts = vec![
        format!("{} — {}", ctx.document.title, ctx.chapter.title),
    ];
    if let Some(area) = &ctx.library.area {
        parts.push(format!("area: {}", area));
    }
    if let Some(keywords) = ctx.document.metadata.get("keywords").and_then(|k| k.as_str()) {
        parts.push(format!("keywords: {}", keywords));
    }
    parts.join("\n")
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

// ============ Q&A parsing ============

#[derive(Debug, Clone, PartialEq)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
}

/// Maximum question length in tokens; longer questions are discarded.
const MAX_QUESTION_TOKENS: usize = 300;

/// Parse completion output into Q&A pairs.
///
/// Formats are tried in a fixed order and the first that yields any pair
/// wins: JSON array → numbered markdown → `Q:`/`A:` lines. Pairs with an
/// empty answer or an oversized question are dropped. An unparseable
/// response yields an empty list, never an error.
pub fn parse_qa_pairs(raw: &str) -> Vec<QaPair> {
    for parser in [parse_json_pairs, parse_numbered_pairs, parse_qa_lines] {
        let pairs = validate_pairs(parser(raw));
        if !pairs.is_empty() {
            return pairs;
        }
    }
    Vec::new()
}

fn validate_pairs(pairs: Vec<QaPair>) -> Vec<QaPair> {
    pairs
        .into_iter()
        .filter(|p| {
            !p.question.trim().is_empty()
                && !p.answer.trim().is_empty()
                && count_tokens(&p.question) <= MAX_QUESTION_TOKENS
        })
        .collect()
}

/// JSON array of `{"question": ..., "answer": ...}` objects, tolerating
/// surrounding prose and code fences.
fn parse_json_pairs(raw: &str) -> Vec<QaPair> {
    let start = match raw.find('[') {
        Some(i) => i,
        None => return Vec::new(),
    };
    let end = match raw.rfind(']') {
        Some(i) if i > start => i,
        _ => return Vec::new(),
    };

    let parsed: Vec<serde_json::Value> = match serde_json::from_str(&raw[start..=end]) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };

    parsed
        .into_iter()
        .filter_map(|item| {
            let question = item
                .get("question")
                .or_else(|| item.get("q"))?
                .as_str()?
                .trim()
                .to_string();
            let answer = item
                .get("answer")
                .or_else(|| item.get("a"))?
                .as_str()?
                .trim()
                .to_string();
            Some(QaPair { question, answer })
        })
        .collect()
}

/// Numbered markdown: each `N.`/`N)` block holds one pair; the question is
/// the text through the first `?`, the remainder is the answer.
fn parse_numbered_pairs(raw: &str) -> Vec<QaPair> {
    let mut blocks: Vec<String> = Vec::new();
    let mut current = String::new();

    for line in raw.lines() {
        if starts_numbered(line.trim_start()) {
            if !current.trim().is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            current = strip_number(line.trim_start()).to_string();
        } else if !current.is_empty() {
            current.push('\n');
            current.push_str(line);
        }
    }
    if !current.trim().is_empty() {
        blocks.push(current);
    }

    blocks
        .into_iter()
        .filter_map(|block| {
            let q_end = block.find('?')?;
            let question = block[..=q_end].trim().to_string();
            let answer = block[q_end + 1..]
                .trim()
                .trim_start_matches("A:")
                .trim_start_matches("Answer:")
                .trim()
                .to_string();
            Some(QaPair { question, answer })
        })
        .collect()
}

fn starts_numbered(line: &str) -> bool {
    let digits: String = line.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return false;
    }
    matches!(
        line[digits.len()..].chars().next(),
        Some('.') | Some(')')
    )
}

fn strip_number(line: &str) -> &str {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    line[digits..].trim_start_matches(['.', ')']).trim_start()
}

/// `Q:`-prefixed question lines followed by `A:`-prefixed answer lines.
fn parse_qa_lines(raw: &str) -> Vec<QaPair> {
    let mut pairs = Vec::new();
    let mut question: Option<String> = None;
    let mut answer: Option<String> = None;

    let mut flush = |question: &mut Option<String>, answer: &mut Option<String>| {
        if let (Some(q), Some(a)) = (question.take(), answer.take()) {
            pairs.push(QaPair {
                question: q.trim().to_string(),
                answer: a.trim().to_string(),
            });
        }
    };

    for line in raw.lines() {
        let trimmed = line.trim();
        if let Some(q) = trimmed.strip_prefix("Q:") {
            flush(&mut question, &mut answer);
            question = Some(q.trim().to_string());
        } else if let Some(a) = trimmed.strip_prefix("A:") {
            answer = Some(a.trim().to_string());
        } else if !trimmed.is_empty() {
            if let Some(a) = answer.as_mut() {
                a.push(' ');
                a.push_str(trimmed);
            } else if let Some(q) = question.as_mut() {
                q.push(' ');
                q.push_str(trimmed);
            }
        }
    }
    flush(&mut question, &mut answer);

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_parse_json_pairs() {
        let raw = r#"Here you go:
[
  {"question": "What is Art. 5?", "answer": "A fundamental rights article."},
  {"question": "When was it enacted?", "answer": "In 1988."}
]"#;
        let pairs = parse_qa_pairs(raw);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].question, "What is Art. 5?");
        assert_eq!(pairs[1].answer, "In 1988.");
    }

    #[test]
    fn test_parse_numbered_pairs() {
        let raw = "1. What is the capital of Brazil? Brasília is the capital.\n\
                   2. What year was it founded? It was founded in 1960.";
        let pairs = parse_qa_pairs(raw);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].question, "What is the capital of Brazil?");
        assert_eq!(pairs[0].answer, "Brasília is the capital.");
    }

    #[test]
    fn test_parse_qa_lines() {
        let raw = "Q: What does the pool do?\nA: It routes calls to providers.\n\
                   Q: What about retries?\nA: Transient failures are retried.";
        let pairs = parse_qa_pairs(raw);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].question, "What about retries?");
    }

    #[test]
    fn test_json_takes_priority_over_lines() {
        let raw = "Q: decoy?\nA: decoy.\n[{\"question\": \"real?\", \"answer\": \"yes\"}]";
        let pairs = parse_qa_pairs(raw);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].question, "real?");
    }

    #[test]
    fn test_empty_answer_discarded() {
        let raw = r#"[{"question": "Valid?", "answer": ""}, {"question": "Also valid?", "answer": "yes"}]"#;
        let pairs = parse_qa_pairs(raw);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].question, "Also valid?");
    }

    #[test]
    fn test_oversized_question_discarded() {
        let long_question = format!("{}?", "why ".repeat(400));
        let raw = format!(
            r#"[{{"question": "{}", "answer": "too long"}}]"#,
            long_question.trim()
        );
        assert!(parse_qa_pairs(&raw).is_empty());
    }

    #[test]
    fn test_garbage_yields_empty() {
        assert!(parse_qa_pairs("no structure here at all").is_empty());
        assert!(parse_qa_pairs("").is_empty());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("constituição", 9), "constitui");
        assert_eq!(truncate_chars("short", 100), "short");
    }

    fn library() -> Library {
        Library {
            id: 1,
            uuid: Uuid::new_v4(),
            name: "lib".into(),
            area: Some("legal".into()),
            semantic_weight: 0.7,
            textual_weight: 0.3,
            metadata: serde_json::json!({"default_embedding_model": "lib-embed"}),
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn strategies(rag: RagConfig) -> Strategies {
        struct NoopRouter;

        #[async_trait::async_trait]
        impl LlmRouter for NoopRouter {
            async fn embed(
                &self,
                _model: Option<&str>,
                _op: EmbedOp,
                texts: &[String],
            ) -> crate::error::Result<Vec<Vec<f32>>> {
                Ok(texts.iter().map(|_| vec![0.0; 4]).collect())
            }

            async fn complete(
                &self,
                _model: Option<&str>,
                _system: &str,
                _user: &str,
            ) -> crate::error::Result<String> {
                Ok(String::new())
            }
        }

        let llm = LlmConfig {
            strategy: "failover".into(),
            max_retries: 3,
            retry_delay_secs: 0,
            embedding_timeout_secs: 60,
            completion_timeout_secs: 120,
            providers: Vec::new(),
        };
        Strategies::new(Arc::new(NoopRouter), ChunkingConfig::default(), rag, &llm)
    }

    fn chapter(token_count: i64) -> Chapter {
        Chapter {
            id: 7,
            document_id: 3,
            title: "Ch".into(),
            content: "Some chapter body text.".into(),
            order_index: 0,
            token_count,
            summary: None,
        }
    }

    fn document() -> Document {
        Document {
            id: 3,
            library_id: 1,
            title: "Doc".into(),
            content: String::new(),
            content_type: crate::models::ContentType::Generic,
            metadata: serde_json::json!({}),
            active: false,
            status: crate::models::ProcessingStatus::Processing,
            progress: 0,
            status_message: None,
            total_tokens: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_auto_mode_threshold_inclusive() {
        let s = strategies(RagConfig::default());
        let lib = library();
        let doc = document();

        // At the threshold: a single chapter-kind record.
        let ch = chapter(2000);
        let ctx = ChapterContext {
            library: &lib,
            document: &doc,
            chapter: &ch,
        };
        let records = s
            .chapter_embeddings(&ctx, &ModelOverrides::default(), ChapterMode::Auto)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, EmbeddingKind::Chapter);

        // One past the threshold: metadata record plus chunk records.
        let ch = chapter(2001);
        let ctx = ChapterContext {
            library: &lib,
            document: &doc,
            chapter: &ch,
        };
        let records = s
            .chapter_embeddings(&ctx, &ModelOverrides::default(), ChapterMode::Auto)
            .await
            .unwrap();
        assert!(records.len() >= 2);
        assert_eq!(records[0].kind, EmbeddingKind::Chapter);
        assert!(records[1..].iter().all(|r| r.kind == EmbeddingKind::Chunk));
    }

    #[tokio::test]
    async fn test_qa_empty_completion_is_success_with_zero_records() {
        let s = strategies(RagConfig::default());
        let lib = library();
        let doc = document();
        let ch = chapter(800);
        let ctx = ChapterContext {
            library: &lib,
            document: &doc,
            chapter: &ch,
        };
        let records = s
            .qa_embeddings(&ctx, &ModelOverrides::default(), 5)
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_model_resolution_precedence() {
        let s = strategies(RagConfig {
            embedding_default_model: Some("global-embed".into()),
            completion_default_model: Some("global-complete".into()),
        });
        let lib = library();

        // Request override wins.
        let overrides = ModelOverrides {
            embedding_model: Some("request-embed".into()),
            completion_model: None,
        };
        assert_eq!(
            s.resolve_embedding_model(&overrides, &lib).as_deref(),
            Some("request-embed")
        );

        // Library default beats global default.
        let overrides = ModelOverrides::default();
        assert_eq!(
            s.resolve_embedding_model(&overrides, &lib).as_deref(),
            Some("lib-embed")
        );

        // Global default is the last resort.
        assert_eq!(
            s.resolve_completion_model(&overrides, &lib).as_deref(),
            Some("global-complete")
        );
    }
}
