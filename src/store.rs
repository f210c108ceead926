//! Persistence adapter over the relational + vector store.
//!
//! Encapsulates every read and write against Postgres so the rest of the
//! system never sees wire formats. Vectors are bound natively via
//! `pgvector::Vector`; the generated `full_text_vec` column is never
//! written by the application.
//!
//! # Transactions
//!
//! Chapters and embeddings for one document are committed in per-chapter
//! transactions; a failure rolls back only that chapter's embeddings. No
//! transaction is ever held across an LLM call.
//!
//! # Library runtime cache
//!
//! Weights and the learned vector dimension per library live in a
//! read-mostly map with write-through on library update. Dimensionality is
//! uniform within a library: it is cached on first write and enforced on
//! every subsequent write.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::RwLock;

use pgvector::Vector;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    Chapter, ContentType, Document, EmbeddingKind, Library, LibraryRole, NewEmbedding,
    ProcessingStatus, UserLibraryAssociation,
};
use crate::splitter::ChapterDraft;

/// Cached per-library runtime configuration.
#[derive(Debug, Clone, Copy)]
pub struct LibraryRuntime {
    pub semantic_weight: f64,
    pub textual_weight: f64,
    pub dimension: Option<usize>,
}

/// A ranked candidate row from one of the two search signals.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub embedding_id: i64,
    pub library_id: i64,
    pub document_id: i64,
    pub chapter_id: Option<i64>,
    pub kind: EmbeddingKind,
    pub text: String,
    pub metadata: serde_json::Value,
}

pub struct Store {
    pool: PgPool,
    runtime: RwLock<HashMap<i64, LibraryRuntime>>,
}

/// Weight pairs must sum to exactly 1.0 within a single-precision ulp.
pub fn validate_weights(semantic: f64, textual: f64) -> Result<()> {
    if semantic < 0.0 || textual < 0.0 {
        return Err(Error::Validation("weights must be non-negative".into()));
    }
    if ((semantic + textual) - 1.0).abs() > f32::EPSILON as f64 {
        return Err(Error::Validation(format!(
            "weights must sum to 1.0, got {} + {} = {}",
            semantic,
            textual,
            semantic + textual
        )));
    }
    Ok(())
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            runtime: RwLock::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ============ Libraries ============

    pub async fn create_library(
        &self,
        name: &str,
        area: Option<&str>,
        semantic_weight: f64,
        textual_weight: f64,
        metadata: serde_json::Value,
    ) -> Result<Library> {
        if name.trim().is_empty() {
            return Err(Error::Validation("library name must not be empty".into()));
        }
        validate_weights(semantic_weight, textual_weight)?;

        let uuid = Uuid::new_v4();
        let row = sqlx::query(
            r#"
            INSERT INTO libraries (uuid, name, area, semantic_weight, textual_weight, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, uuid, name, area, semantic_weight, textual_weight,
                      metadata, active, created_at, updated_at
            "#,
        )
        .bind(uuid)
        .bind(name)
        .bind(area)
        .bind(semantic_weight)
        .bind(textual_weight)
        .bind(&metadata)
        .fetch_one(&self.pool)
        .await?;

        let library = library_from_row(&row)?;
        self.cache_runtime(&library, None);
        Ok(library)
    }

    pub async fn get_library(&self, uuid: Uuid) -> Result<Library> {
        let row = sqlx::query(
            r#"
            SELECT id, uuid, name, area, semantic_weight, textual_weight,
                   metadata, active, created_at, updated_at
            FROM libraries WHERE uuid = $1
            "#,
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("library {}", uuid)))?;

        library_from_row(&row)
    }

    pub async fn get_library_by_id(&self, id: i64) -> Result<Library> {
        let row = sqlx::query(
            r#"
            SELECT id, uuid, name, area, semantic_weight, textual_weight,
                   metadata, active, created_at, updated_at
            FROM libraries WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("library id {}", id)))?;

        library_from_row(&row)
    }

    /// Soft delete flips the active flag; hard delete cascades to documents,
    /// chapters, and embeddings.
    pub async fn delete_library(&self, uuid: Uuid, hard: bool) -> Result<()> {
        let library = self.get_library(uuid).await?;

        if hard {
            sqlx::query("DELETE FROM libraries WHERE id = $1")
                .bind(library.id)
                .execute(&self.pool)
                .await?;
        } else {
            sqlx::query("UPDATE libraries SET active = FALSE, updated_at = now() WHERE id = $1")
                .bind(library.id)
                .execute(&self.pool)
                .await?;
        }

        self.runtime.write().unwrap().remove(&library.id);
        Ok(())
    }

    /// Cached weights + dimension for one library, loading on miss.
    pub async fn library_runtime(&self, library_id: i64) -> Result<LibraryRuntime> {
        if let Some(rt) = self.runtime.read().unwrap().get(&library_id) {
            return Ok(*rt);
        }

        let library = self.get_library_by_id(library_id).await?;
        let dimension: Option<i32> =
            sqlx::query_scalar("SELECT vector_dims(vector) FROM doc_embeddings WHERE library_id = $1 LIMIT 1")
                .bind(library_id)
                .fetch_optional(&self.pool)
                .await?;

        let runtime = LibraryRuntime {
            semantic_weight: library.semantic_weight,
            textual_weight: library.textual_weight,
            dimension: dimension.map(|d| d as usize),
        };
        self.runtime.write().unwrap().insert(library_id, runtime);
        Ok(runtime)
    }

    fn cache_runtime(&self, library: &Library, dimension: Option<usize>) {
        self.runtime.write().unwrap().insert(
            library.id,
            LibraryRuntime {
                semantic_weight: library.semantic_weight,
                textual_weight: library.textual_weight,
                dimension,
            },
        );
    }

    // ============ Documents ============

    pub async fn create_document(
        &self,
        library_id: i64,
        title: &str,
        content: &str,
        content_type: ContentType,
        metadata: serde_json::Value,
    ) -> Result<Document> {
        if title.trim().is_empty() {
            return Err(Error::Validation("document title must not be empty".into()));
        }

        let row = sqlx::query(
            r#"
            INSERT INTO documents (library_id, title, content, content_type, metadata)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, library_id, title, content, content_type, metadata, active,
                      status, progress, status_message, total_tokens, created_at, updated_at
            "#,
        )
        .bind(library_id)
        .bind(title)
        .bind(content)
        .bind(content_type.as_str())
        .bind(&metadata)
        .fetch_one(&self.pool)
        .await?;

        document_from_row(&row)
    }

    pub async fn get_document(&self, id: i64) -> Result<Document> {
        let row = sqlx::query(
            r#"
            SELECT id, library_id, title, content, content_type, metadata, active,
                   status, progress, status_message, total_tokens, created_at, updated_at
            FROM documents WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("document {}", id)))?;

        document_from_row(&row)
    }

    /// Publish a status transition. The orchestrator is the only writer and
    /// publishes non-decreasing progress within one processing run, so
    /// readers only ever observe monotone values.
    pub async fn set_document_status(
        &self,
        id: i64,
        status: ProcessingStatus,
        progress: i32,
        message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE documents
            SET status = $2,
                progress = $3,
                status_message = $4,
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(progress)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Reset a document for (re)processing: back to PENDING with zero
    /// progress and no prior chapters or embeddings.
    pub async fn reset_document(&self, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM doc_embeddings WHERE document_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chapters WHERE document_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            UPDATE documents
            SET status = 'PENDING', progress = 0, status_message = NULL,
                total_tokens = NULL, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Completion: activate this document, deactivate any prior active
    /// version with the same (library, title), and record totals — one
    /// transaction so the single-active invariant never lapses.
    pub async fn finalize_document(&self, id: i64, total_tokens: i64) -> Result<()> {
        let document = self.get_document(id).await?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE documents SET active = FALSE, updated_at = now()
            WHERE library_id = $1 AND title = $2 AND active AND id <> $3
            "#,
        )
        .bind(document.library_id)
        .bind(&document.title)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE documents
            SET active = TRUE, status = 'COMPLETED', progress = 100,
                status_message = NULL, total_tokens = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(total_tokens)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn set_document_active(&self, id: i64, active: bool) -> Result<Document> {
        let document = self.get_document(id).await?;

        if active {
            let mut tx = self.pool.begin().await?;
            sqlx::query(
                r#"
                UPDATE documents SET active = FALSE, updated_at = now()
                WHERE library_id = $1 AND title = $2 AND active AND id <> $3
                "#,
            )
            .bind(document.library_id)
            .bind(&document.title)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            sqlx::query("UPDATE documents SET active = TRUE, updated_at = now() WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        } else {
            sqlx::query("UPDATE documents SET active = FALSE, updated_at = now() WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
        }

        self.get_document(id).await
    }

    /// Soft delete: the document drops out of active search scopes but its
    /// embeddings stay reachable with `active_only = false`.
    pub async fn soft_delete_document(&self, id: i64) -> Result<()> {
        let result =
            sqlx::query("UPDATE documents SET active = FALSE, updated_at = now() WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("document {}", id)));
        }
        Ok(())
    }

    // ============ Chapters ============

    /// Persist split chapters in source order, replacing any prior set.
    pub async fn replace_chapters(
        &self,
        document_id: i64,
        drafts: &[ChapterDraft],
    ) -> Result<Vec<Chapter>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM doc_embeddings WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chapters WHERE document_id = $1")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        let mut chapters = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let row = sqlx::query(
                r#"
                INSERT INTO chapters (document_id, title, content, order_index, token_count)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id, document_id, title, content, order_index, token_count, summary
                "#,
            )
            .bind(document_id)
            .bind(&draft.title)
            .bind(&draft.content)
            .bind(draft.order_index)
            .bind(draft.token_count as i64)
            .fetch_one(&mut *tx)
            .await?;
            chapters.push(chapter_from_row(&row)?);
        }

        tx.commit().await?;
        Ok(chapters)
    }

    pub async fn update_chapter_summary(&self, chapter_id: i64, summary: &str) -> Result<()> {
        sqlx::query("UPDATE chapters SET summary = $2 WHERE id = $1")
            .bind(chapter_id)
            .bind(summary)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn fetch_chapters(&self, document_id: i64) -> Result<Vec<Chapter>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, title, content, order_index, token_count, summary
            FROM chapters WHERE document_id = $1 ORDER BY order_index
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(chapter_from_row).collect()
    }

    // ============ Embeddings ============

    /// Insert one chapter's records in a single transaction, in generated
    /// order. Learns the library's vector dimension on first write and
    /// rejects mismatched vectors afterwards.
    pub async fn insert_chapter_embeddings(
        &self,
        library_id: i64,
        document_id: i64,
        records: &[NewEmbedding],
    ) -> Result<()> {
        let Some(first) = records.first() else {
            return Ok(());
        };

        let dimension = first.vector.len();
        if dimension == 0 {
            return Err(Error::PipelineFatal("zero-dimensional embedding".into()));
        }
        if let Some(bad) = records.iter().find(|r| r.vector.len() != dimension) {
            return Err(Error::PipelineFatal(format!(
                "mixed vector dimensions within one chapter: {} vs {}",
                dimension,
                bad.vector.len()
            )));
        }

        let runtime = self.library_runtime(library_id).await?;
        match runtime.dimension {
            Some(expected) if expected != dimension => {
                return Err(Error::PipelineFatal(format!(
                    "library {} stores {}-dimensional vectors, got {}",
                    library_id, expected, dimension
                )));
            }
            Some(_) => {}
            None => {
                self.ensure_vector_index(dimension).await?;
                if let Some(rt) = self.runtime.write().unwrap().get_mut(&library_id) {
                    rt.dimension = Some(dimension);
                }
            }
        }

        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO doc_embeddings
                    (library_id, document_id, chapter_id, text, order_in_chapter,
                     embedding_kind, vector, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(library_id)
            .bind(document_id)
            .bind(record.chapter_id)
            .bind(&record.text)
            .bind(record.order_in_chapter)
            .bind(record.kind.as_str())
            .bind(Vector::from(record.vector.clone()))
            .bind(&record.metadata)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    /// Per-dimension partial HNSW index, created when a library first
    /// writes vectors of that dimension.
    async fn ensure_vector_index(&self, dimension: usize) -> Result<()> {
        let ddl = format!(
            "CREATE INDEX IF NOT EXISTS idx_embeddings_vector_{dim} \
             ON doc_embeddings USING hnsw ((vector::vector({dim})) vector_cosine_ops) \
             WHERE vector_dims(vector) = {dim}",
            dim = dimension
        );
        sqlx::query(&ddl).execute(&self.pool).await?;
        info!(dimension, "vector index ready");
        Ok(())
    }

    pub async fn count_embeddings(&self, document_id: i64) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM doc_embeddings WHERE document_id = $1")
                .bind(document_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    // ============ Search candidates ============

    /// Top candidates by cosine distance within the library scope,
    /// best first.
    pub async fn semantic_candidates(
        &self,
        library_ids: &[i64],
        query_vector: &[f32],
        limit: i64,
        active_only: bool,
    ) -> Result<Vec<Candidate>> {
        let rows = sqlx::query(
            r#"
            SELECT e.id, e.library_id, e.document_id, e.chapter_id,
                   e.embedding_kind, e.text, e.metadata
            FROM doc_embeddings e
            JOIN documents d ON d.id = e.document_id
            WHERE e.library_id = ANY($1)
              AND (NOT $2 OR d.active)
            ORDER BY e.vector <=> $3
            LIMIT $4
            "#,
        )
        .bind(library_ids)
        .bind(active_only)
        .bind(Vector::from(query_vector.to_vec()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(candidate_from_row).collect()
    }

    /// Top candidates by lexical rank among records whose full-text vector
    /// matches the web-style query, best first. `websearch_to_tsquery` over
    /// the accent-folding simple configuration gives implicit OR between
    /// bare tokens, quoted phrases, and `-exclusions`.
    pub async fn lexical_candidates(
        &self,
        library_ids: &[i64],
        query: &str,
        limit: i64,
        active_only: bool,
    ) -> Result<Vec<Candidate>> {
        let rows = sqlx::query(
            r#"
            SELECT e.id, e.library_id, e.document_id, e.chapter_id,
                   e.embedding_kind, e.text, e.metadata
            FROM doc_embeddings e
            JOIN documents d ON d.id = e.document_id,
                 websearch_to_tsquery('simple_unaccent', $3) q
            WHERE e.library_id = ANY($1)
              AND (NOT $2 OR d.active)
              AND e.full_text_vec @@ q
            ORDER BY ts_rank(e.full_text_vec, q) DESC
            LIMIT $4
            "#,
        )
        .bind(library_ids)
        .bind(active_only)
        .bind(query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(candidate_from_row).collect()
    }

    // ============ Associations ============

    pub async fn create_association(
        &self,
        user_id: i64,
        library_uuid: Uuid,
        role: LibraryRole,
    ) -> Result<UserLibraryAssociation> {
        let library = self.get_library(library_uuid).await?;

        sqlx::query(
            r#"
            INSERT INTO user_library_associations (user_id, library_id, role)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(user_id)
        .bind(library.id)
        .bind(role.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| match Error::from(e) {
            Error::Conflict(_) => Error::Conflict(format!(
                "user {} is already associated with library {}",
                user_id, library_uuid
            )),
            other => other,
        })?;

        Ok(UserLibraryAssociation {
            user_id,
            library_id: library.id,
            role,
        })
    }
}

// ============ Row mapping ============

fn library_from_row(row: &sqlx::postgres::PgRow) -> Result<Library> {
    Ok(Library {
        id: row.get("id"),
        uuid: row.get("uuid"),
        name: row.get("name"),
        area: row.get("area"),
        semantic_weight: row.get("semantic_weight"),
        textual_weight: row.get("textual_weight"),
        metadata: row.get("metadata"),
        active: row.get("active"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn document_from_row(row: &sqlx::postgres::PgRow) -> Result<Document> {
    let content_type: String = row.get("content_type");
    let status: String = row.get("status");
    Ok(Document {
        id: row.get("id"),
        library_id: row.get("library_id"),
        title: row.get("title"),
        content: row.get("content"),
        content_type: ContentType::from_str(&content_type).map_err(Error::Internal)?,
        metadata: row.get("metadata"),
        active: row.get("active"),
        status: ProcessingStatus::from_str(&status).map_err(Error::Internal)?,
        progress: row.get("progress"),
        status_message: row.get("status_message"),
        total_tokens: row.get("total_tokens"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn chapter_from_row(row: &sqlx::postgres::PgRow) -> Result<Chapter> {
    Ok(Chapter {
        id: row.get("id"),
        document_id: row.get("document_id"),
        title: row.get("title"),
        content: row.get("content"),
        order_index: row.get("order_index"),
        token_count: row.get("token_count"),
        summary: row.get("summary"),
    })
}

fn candidate_from_row(row: &sqlx::postgres::PgRow) -> Result<Candidate> {
    let kind: String = row.get("embedding_kind");
    Ok(Candidate {
        embedding_id: row.get("id"),
        library_id: row.get("library_id"),
        document_id: row.get("document_id"),
        chapter_id: row.get("chapter_id"),
        kind: EmbeddingKind::from_str(&kind).map_err(Error::Internal)?,
        text: row.get("text"),
        metadata: row.get("metadata"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_must_sum_to_one() {
        assert!(validate_weights(0.7, 0.3).is_ok());
        assert!(validate_weights(0.0, 1.0).is_ok());
        assert!(validate_weights(1.0, 0.0).is_ok());
        assert!(validate_weights(0.5, 0.6).is_err());
        assert!(validate_weights(-0.1, 1.1).is_err());
    }

    #[test]
    fn test_weights_tolerate_float_representation() {
        // 0.1 + 0.9 is not exactly 1.0 in binary; a single-precision ulp
        // of slack covers representation noise.
        assert!(validate_weights(0.1, 0.9).is_ok());
        assert!(validate_weights(1.0 / 3.0, 2.0 / 3.0).is_ok());
    }
}
