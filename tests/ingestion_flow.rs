//! End-to-end flow over the pure kernels: splitting, strategy dispatch, and
//! pool routing, with a deterministic mock router in place of live
//! providers.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use corpusd::config::{ChunkingConfig, LlmConfig, ProviderConfig, RagConfig};
use corpusd::error::Result;
use corpusd::llm::{EmbedOp, LlmRouter, ServicePool};
use corpusd::models::{
    Chapter, ContentType, Document, EmbeddingKind, Library, ProcessingStatus,
};
use corpusd::splitter::split_document;
use corpusd::strategies::{ChapterContext, ChapterMode, ModelOverrides, Strategies};

/// Deterministic router: embeddings derive from text length, completions
/// return a fixed Q&A payload.
struct MockRouter {
    qa_payload: String,
}

#[async_trait::async_trait]
impl LlmRouter for MockRouter {
    async fn embed(
        &self,
        _model: Option<&str>,
        _op: EmbedOp,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let len = t.len() as f32;
                vec![len, len / 2.0, 1.0, 0.5]
            })
            .collect())
    }

    async fn complete(&self, _model: Option<&str>, _system: &str, _user: &str) -> Result<String> {
        Ok(self.qa_payload.clone())
    }
}

fn library() -> Library {
    Library {
        id: 1,
        uuid: Uuid::new_v4(),
        name: "docs".into(),
        area: Some("engineering".into()),
        semantic_weight: 0.7,
        textual_weight: 0.3,
        metadata: serde_json::json!({}),
        active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn document(content: &str) -> Document {
    Document {
        id: 10,
        library_id: 1,
        title: "API Docs".into(),
        content: content.to_string(),
        content_type: ContentType::Generic,
        metadata: serde_json::json!({"author": "team", "keywords": "api, docs"}),
        active: false,
        status: ProcessingStatus::Processing,
        progress: 0,
        status_message: None,
        total_tokens: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn strategies(qa_payload: &str) -> Strategies {
    let llm = LlmConfig {
        strategy: "failover".into(),
        max_retries: 3,
        retry_delay_secs: 0,
        embedding_timeout_secs: 60,
        completion_timeout_secs: 120,
        providers: Vec::new(),
    };
    Strategies::new(
        Arc::new(MockRouter {
            qa_payload: qa_payload.to_string(),
        }),
        ChunkingConfig::default(),
        RagConfig::default(),
        &llm,
    )
}

fn chapters_for(doc: &Document) -> Vec<Chapter> {
    split_document(&doc.content, doc.content_type, &ChunkingConfig::default())
        .into_iter()
        .map(|draft| Chapter {
            id: 100 + draft.order_index as i64,
            document_id: doc.id,
            title: draft.title,
            content: draft.content,
            order_index: draft.order_index,
            token_count: draft.token_count as i64,
            summary: None,
        })
        .collect()
}

#[tokio::test]
async fn small_document_yields_one_chapter_record_per_chapter() {
    let doc = document("# A\npara1.\n\n## B\nshort.");
    let chapters = chapters_for(&doc);
    assert_eq!(chapters.len(), 2);
    assert_eq!(chapters[0].title, "A");
    assert_eq!(chapters[1].title, "B");

    let lib = library();
    let s = strategies("[]");

    for chapter in &chapters {
        let ctx = ChapterContext {
            library: &lib,
            document: &doc,
            chapter,
        };
        let records = s
            .chapter_embeddings(&ctx, &ModelOverrides::default(), ChapterMode::Auto)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, EmbeddingKind::Chapter);
        assert_eq!(records[0].chapter_id, Some(chapter.id));
        assert_eq!(
            records[0].metadata.get("chapter_title").and_then(|v| v.as_str()),
            Some(chapter.title.as_str())
        );
    }
}

#[tokio::test]
async fn oversized_chapter_splits_into_chunk_records() {
    let body = (0..600)
        .map(|i| format!("Sentence {} about the deployment workflow and its retries.", i))
        .collect::<Vec<_>>()
        .join("\n\n");
    let doc = document(&format!("## Operations\n{}", body));
    let chapters = chapters_for(&doc);

    let lib = library();
    let s = strategies("[]");

    let big = chapters
        .iter()
        .find(|c| c.token_count > 2000)
        .expect("expected a chapter past the division threshold");
    let ctx = ChapterContext {
        library: &lib,
        document: &doc,
        chapter: big,
    };
    let records = s
        .chapter_embeddings(&ctx, &ModelOverrides::default(), ChapterMode::Auto)
        .await
        .unwrap();

    assert!(records.len() >= 2);
    assert_eq!(records[0].kind, EmbeddingKind::Chapter);
    assert!(records[1..].iter().all(|r| r.kind == EmbeddingKind::Chunk));

    // Records carry their within-chapter generation order.
    for (i, record) in records[1..].iter().enumerate() {
        assert_eq!(record.order_in_chapter, (i + 1) as i32);
    }
}

#[tokio::test]
async fn qa_records_carry_question_metadata() {
    let payload = r#"[
        {"question": "What triggers a retry?", "answer": "Transient failures such as timeouts."},
        {"question": "How many attempts are made?", "answer": "Three in total."}
    ]"#;
    let doc = document("## Retries\nRetries happen on transient failures only.");
    let chapters = chapters_for(&doc);
    let lib = library();
    let s = strategies(payload);

    let ctx = ChapterContext {
        library: &lib,
        document: &doc,
        chapter: &chapters[0],
    };
    let records = s
        .qa_embeddings(&ctx, &ModelOverrides::default(), 2)
        .await
        .unwrap();

    assert_eq!(records.len(), 2);
    for record in &records {
        assert_eq!(record.kind, EmbeddingKind::QaPair);
        assert!(record.metadata.get("question").is_some());
        assert!(record.metadata.get("answer_snippet").is_some());
        assert!(!record.vector.is_empty());
    }
}

#[tokio::test]
async fn unparseable_qa_output_yields_zero_records() {
    let doc = document("## Retries\nRetries happen on transient failures only.");
    let chapters = chapters_for(&doc);
    let lib = library();
    let s = strategies("I could not think of any questions.");

    let ctx = ChapterContext {
        library: &lib,
        document: &doc,
        chapter: &chapters[0],
    };
    let records = s
        .qa_embeddings(&ctx, &ModelOverrides::default(), 3)
        .await
        .unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
async fn summary_failure_degrades_to_none() {
    // Empty completion output is a summary failure; the strategy degrades
    // instead of erroring.
    let doc = document("## Long\ncontent.");
    let chapters = chapters_for(&doc);
    let lib = library();
    let s = strategies("");

    let ctx = ChapterContext {
        library: &lib,
        document: &doc,
        chapter: &chapters[0],
    };
    let result = s
        .summary_embedding(&ctx, &ModelOverrides::default(), 500, None)
        .await;
    assert!(result.is_none());
}

#[test]
fn model_based_routing_across_providers() {
    let llm = LlmConfig {
        strategy: "model-based".into(),
        max_retries: 3,
        retry_delay_secs: 120,
        embedding_timeout_secs: 60,
        completion_timeout_secs: 120,
        providers: vec![
            ProviderConfig {
                name: "p1".into(),
                api_url: "http://p1.invalid/v1".into(),
                api_key: None,
                models: vec!["qwen3-1.7b".into()],
                embedding_model: Some("qwen3-embedding".into()),
                embedding_dimension: Some(1024),
                embedding_context_length: 8192,
                enabled: true,
            },
            ProviderConfig {
                name: "p2".into(),
                api_url: "http://p2.invalid/v1".into(),
                api_key: Some("sk-test".into()),
                models: vec!["gpt-4".into()],
                embedding_model: None,
                embedding_dimension: None,
                embedding_context_length: 8192,
                enabled: true,
            },
        ],
    };
    let pool = ServicePool::from_config(&llm).unwrap();

    assert_eq!(pool.resolve("qwen3-1.7b").unwrap().name(), "p1");
    assert_eq!(pool.resolve("gpt-4").unwrap().name(), "p2");

    let err = pool.resolve("mistral-7b").unwrap_err();
    assert_eq!(err.code(), "MODEL_NOT_REGISTERED");
}
