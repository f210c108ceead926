//! Ingestion orchestration: turning an unprocessed document into a fully
//! embedded, searchable artifact.
//!
//! A bounded worker pool (default 4) consumes document tasks from an mpsc
//! channel. Each task walks the stages in order:
//!
//! 1. Route to a splitter by content type and split into chapters.
//! 2. Persist chapters in source order.
//! 3. Per chapter: chapter strategy in auto mode, then Q&A and summary
//!    strategies when requested and the chapter meets their thresholds.
//!    Generation fans out at bounded width; persistence stays in source
//!    order, one transaction per chapter.
//! 4. Finalize: activate the document, deactivate the prior active version
//!    with the same (library, title), record totals, `COMPLETED`.
//!
//! Status is published through the store only — a restart resumes cleanly
//! from persisted state, never from in-memory handles. Store operations are
//! retried with the same bounded fixed-delay policy as LLM calls; anything
//! non-transient fails the document to `FAILED` with a recorded reason.
//!
//! Cancellation is a per-document flag polled between stages and between
//! chapters: in-flight work is abandoned and persisted chapters are left in
//! place for idempotent re-entry.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::llm::retry_call;
use crate::models::{Chapter, Document, Library, NewEmbedding, ProcessingStatus};
use crate::splitter::split_document;
use crate::store::Store;
use crate::strategies::{ChapterContext, ChapterMode, ModelOverrides, Strategies};

/// How many chapters of one document generate embeddings concurrently.
const CHAPTER_FANOUT: usize = 4;

/// Per-request processing options.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessOptions {
    #[serde(default)]
    pub include_qa: bool,
    #[serde(default)]
    pub include_summary: bool,
    #[serde(default = "default_qa_pairs")]
    pub qa_pairs: usize,
    #[serde(default = "default_summary_chars")]
    pub max_summary_chars: usize,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default)]
    pub completion_model: Option<String>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            include_qa: false,
            include_summary: false,
            qa_pairs: default_qa_pairs(),
            max_summary_chars: default_summary_chars(),
            embedding_model: None,
            completion_model: None,
        }
    }
}

fn default_qa_pairs() -> usize {
    3
}
fn default_summary_chars() -> usize {
    1000
}

struct Task {
    document_id: i64,
    options: ProcessOptions,
}

/// Handle for enqueuing and cancelling document processing.
#[derive(Clone)]
pub struct IngestionHandle {
    sender: mpsc::Sender<Task>,
    store: Arc<Store>,
    cancelled: Arc<Mutex<HashSet<i64>>>,
}

impl IngestionHandle {
    /// Enqueue a document for processing.
    ///
    /// Idempotent against terminal states: a `COMPLETED` document is a
    /// no-op (returns `false`); `PENDING` and `FAILED` documents re-enter
    /// the pipeline; a document already `PROCESSING` is a conflict.
    pub async fn enqueue(&self, document_id: i64, options: ProcessOptions) -> Result<bool> {
        let document = self.store.get_document(document_id).await?;

        match document.status {
            ProcessingStatus::Completed => {
                info!(document = document_id, "already completed, process is a no-op");
                return Ok(false);
            }
            ProcessingStatus::Processing => {
                return Err(Error::Conflict(format!(
                    "document {} is already processing",
                    document_id
                )));
            }
            ProcessingStatus::Pending | ProcessingStatus::Failed => {}
        }

        self.cancelled.lock().unwrap().remove(&document_id);
        self.store
            .set_document_status(document_id, ProcessingStatus::Pending, 0, Some("Queued"))
            .await?;

        self.sender
            .send(Task {
                document_id,
                options,
            })
            .await
            .map_err(|_| Error::Internal("ingestion workers are shut down".into()))?;

        Ok(true)
    }

    /// Flip the per-document cancel flag; the orchestrator polls it between
    /// stages.
    pub fn cancel(&self, document_id: i64) {
        self.cancelled.lock().unwrap().insert(document_id);
    }
}

/// Spawn the worker pool and return the enqueue handle.
pub fn spawn_workers(
    config: &Config,
    store: Arc<Store>,
    strategies: Arc<Strategies>,
) -> IngestionHandle {
    let workers = config.ingestion.workers;
    let (sender, receiver) = mpsc::channel::<Task>(workers * 64);
    let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
    let cancelled = Arc::new(Mutex::new(HashSet::new()));

    let ctx = Arc::new(WorkerCtx {
        store: store.clone(),
        strategies,
        max_attempts: config.llm.max_retries,
        retry_delay: Duration::from_secs(config.llm.retry_delay_secs),
        cancelled: cancelled.clone(),
    });

    for worker in 0..workers {
        let receiver = receiver.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            loop {
                let task = { receiver.lock().await.recv().await };
                let Some(task) = task else {
                    break;
                };
                run_task(worker, &ctx, task).await;
            }
        });
    }

    info!(workers, "ingestion worker pool started");

    IngestionHandle {
        sender,
        store,
        cancelled,
    }
}

struct WorkerCtx {
    store: Arc<Store>,
    strategies: Arc<Strategies>,
    max_attempts: u32,
    retry_delay: Duration,
    cancelled: Arc<Mutex<HashSet<i64>>>,
}

impl WorkerCtx {
    fn check_cancel(&self, document_id: i64) -> Result<()> {
        if self.cancelled.lock().unwrap().contains(&document_id) {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

async fn run_task(worker: usize, ctx: &WorkerCtx, task: Task) {
    let document_id = task.document_id;
    info!(worker, document = document_id, "processing document");

    match process_document(ctx, document_id, &task.options).await {
        Ok(()) => {
            info!(worker, document = document_id, "document completed");
        }
        Err(Error::Cancelled) => {
            // Persisted chapters stay in place for idempotent re-entry.
            warn!(worker, document = document_id, "processing cancelled");
            ctx.cancelled.lock().unwrap().remove(&document_id);
        }
        Err(e) => {
            error!(worker, document = document_id, error = %e, "document failed");
            let reason = format!("{}", e);
            if let Err(status_err) = ctx
                .store
                .set_document_status(
                    document_id,
                    ProcessingStatus::Failed,
                    0,
                    Some(&reason),
                )
                .await
            {
                error!(document = document_id, error = %status_err, "failed to record failure status");
            }
        }
    }
}

async fn process_document(ctx: &WorkerCtx, document_id: i64, options: &ProcessOptions) -> Result<()> {
    ctx.check_cancel(document_id)?;

    let document = ctx.store.get_document(document_id).await?;
    let library = ctx.store.get_library_by_id(document.library_id).await?;

    ctx.store
        .set_document_status(
            document_id,
            ProcessingStatus::Processing,
            5,
            Some("Splitting document"),
        )
        .await?;

    // Route and split. A splitter always yields at least one chapter; an
    // empty result here means empty content, which cannot be made searchable.
    let drafts = split_document(
        &document.content,
        document.content_type,
        ctx.strategies.chunking(),
    );
    if drafts.iter().all(|d| d.content.trim().is_empty()) {
        return Err(Error::PipelineFatal("document has no splittable content".into()));
    }

    ctx.check_cancel(document_id)?;

    let chapters = retry_call(ctx.max_attempts, ctx.retry_delay, "persist_chapters", || {
        ctx.store.replace_chapters(document_id, &drafts)
    })
    .await?;

    let total = chapters.len();
    ctx.store
        .set_document_status(
            document_id,
            ProcessingStatus::Processing,
            10,
            Some(&format!("Generating chapter embeddings: 0/{}", total)),
        )
        .await?;

    let overrides = ModelOverrides {
        embedding_model: options.embedding_model.clone(),
        completion_model: options.completion_model.clone(),
    };

    // Generation fans out; results arrive and persist in source order.
    let mut chapter_futures = Vec::with_capacity(chapters.len());
    for chapter in chapters.iter() {
        let ctx = &*ctx;
        let library = &library;
        let document = &document;
        let overrides = &overrides;
        chapter_futures.push(
            async move {
                generate_chapter_records(ctx, library, document, chapter, options, overrides).await
            }
            .boxed(),
        );
    }
    let mut generated = futures::stream::iter(chapter_futures).buffered(CHAPTER_FANOUT);

    let mut completed = 0usize;
    let mut chapter_index = 0usize;
    while let Some(result) = generated.next().await {
        ctx.check_cancel(document_id)?;
        let output = result?;
        let chapter = &chapters[chapter_index];
        chapter_index += 1;

        retry_call(ctx.max_attempts, ctx.retry_delay, "persist_embeddings", || {
            ctx.store
                .insert_chapter_embeddings(document.library_id, document_id, &output.records)
        })
        .await?;

        if let Some(summary) = &output.summary {
            retry_call(ctx.max_attempts, ctx.retry_delay, "persist_summary", || {
                ctx.store.update_chapter_summary(chapter.id, summary)
            })
            .await?;
        }

        completed += 1;
        ctx.store
            .set_document_status(
                document_id,
                ProcessingStatus::Processing,
                progress_for(completed, total),
                Some(&format!(
                    "Generating chapter embeddings: {}/{}",
                    completed, total
                )),
            )
            .await?;
    }

    ctx.check_cancel(document_id)?;

    let total_tokens: i64 = chapters.iter().map(|c| c.token_count).sum();
    retry_call(ctx.max_attempts, ctx.retry_delay, "finalize_document", || {
        ctx.store.finalize_document(document_id, total_tokens)
    })
    .await?;

    Ok(())
}

struct ChapterOutput {
    records: Vec<NewEmbedding>,
    summary: Option<String>,
}

async fn generate_chapter_records(
    ctx: &WorkerCtx,
    library: &Library,
    document: &Document,
    chapter: &Chapter,
    options: &ProcessOptions,
    overrides: &ModelOverrides,
) -> Result<ChapterOutput> {
    let chapter_ctx = ChapterContext {
        library,
        document,
        chapter,
    };
    let chunking = ctx.strategies.chunking();

    let mut records = ctx
        .strategies
        .chapter_embeddings(&chapter_ctx, overrides, ChapterMode::Auto)
        .await?;

    if options.include_qa && chapter.token_count as usize >= chunking.qa_threshold_tokens {
        let qa_records = ctx
            .strategies
            .qa_embeddings(&chapter_ctx, overrides, options.qa_pairs)
            .await?;
        records.extend(qa_records);
    }

    let mut summary = None;
    if options.include_summary
        && chapter.token_count as usize >= chunking.summary_threshold_tokens
    {
        if let Some((text, record)) = ctx
            .strategies
            .summary_embedding(&chapter_ctx, overrides, options.max_summary_chars, None)
            .await
        {
            summary = Some(text);
            records.push(record);
        }
    }

    Ok(ChapterOutput { records, summary })
}

/// Progress is 10% after splitting and climbs to 95% across chapters;
/// finalization takes it to 100.
fn progress_for(completed: usize, total: usize) -> i32 {
    if total == 0 {
        return 95;
    }
    10 + (85 * completed / total) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_monotone_and_bounded() {
        let total = 7;
        let mut last = 0;
        for completed in 0..=total {
            let p = progress_for(completed, total);
            assert!(p >= last, "progress regressed: {} -> {}", last, p);
            assert!((10..=95).contains(&p));
            last = p;
        }
        assert_eq!(progress_for(total, total), 95);
    }

    #[test]
    fn test_process_options_defaults() {
        let options: ProcessOptions = serde_json::from_str("{}").unwrap();
        assert!(!options.include_qa);
        assert!(!options.include_summary);
        assert_eq!(options.qa_pairs, 3);
        assert_eq!(options.max_summary_chars, 1000);
    }
}
