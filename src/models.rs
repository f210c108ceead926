//! Core data models used throughout corpusd.
//!
//! These types represent the libraries, documents, chapters, and embedding
//! records that flow through the ingestion and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Tenant-scoped corpus owning documents, embeddings, and configuration.
#[derive(Debug, Clone, Serialize)]
pub struct Library {
    pub id: i64,
    /// Stable external identifier.
    pub uuid: Uuid,
    pub name: String,
    /// Knowledge-area tag.
    pub area: Option<String>,
    /// Semantic signal weight; `semantic_weight + textual_weight = 1.0`.
    pub semantic_weight: f64,
    pub textual_weight: f64,
    /// Open metadata bag; may carry `default_embedding_model` and
    /// `default_completion_model`.
    pub metadata: serde_json::Value,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Library {
    pub fn default_embedding_model(&self) -> Option<&str> {
        self.metadata.get("default_embedding_model").and_then(|v| v.as_str())
    }

    pub fn default_completion_model(&self) -> Option<&str> {
        self.metadata.get("default_completion_model").and_then(|v| v.as_str())
    }
}

/// Structural family of a document, selecting the splitter variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentType {
    Generic,
    LegalNorm,
    Wiki,
    ScientificArticle,
    TechnicalDocumentation,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Generic => "generic",
            ContentType::LegalNorm => "legal-norm",
            ContentType::Wiki => "wiki",
            ContentType::ScientificArticle => "scientific-article",
            ContentType::TechnicalDocumentation => "technical-documentation",
        }
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generic" => Ok(ContentType::Generic),
            "legal-norm" => Ok(ContentType::LegalNorm),
            "wiki" => Ok(ContentType::Wiki),
            "scientific-article" => Ok(ContentType::ScientificArticle),
            "technical-documentation" => Ok(ContentType::TechnicalDocumentation),
            other => Err(format!("unknown content type: {}", other)),
        }
    }
}

/// Document processing lifecycle. Transitions are monotonic:
/// `Pending → Processing → Completed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "PENDING",
            ProcessingStatus::Processing => "PROCESSING",
            ProcessingStatus::Completed => "COMPLETED",
            ProcessingStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ProcessingStatus::Pending),
            "PROCESSING" => Ok(ProcessingStatus::Processing),
            "COMPLETED" => Ok(ProcessingStatus::Completed),
            "FAILED" => Ok(ProcessingStatus::Failed),
            other => Err(format!("unknown processing status: {}", other)),
        }
    }
}

/// A document owned by exactly one library. Content is Markdown after
/// conversion. At most one document per (library, title) is active.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: i64,
    pub library_id: i64,
    pub title: String,
    pub content: String,
    pub content_type: ContentType,
    /// Author, source URL, keywords, version.
    pub metadata: serde_json::Value,
    pub active: bool,
    pub status: ProcessingStatus,
    /// Progress percent, 0..=100, monotone while PROCESSING.
    pub progress: i32,
    pub status_message: Option<String>,
    pub total_tokens: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Second-level decomposition: a contiguous titled section of a document.
#[derive(Debug, Clone, Serialize)]
pub struct Chapter {
    pub id: i64,
    pub document_id: i64,
    pub title: String,
    pub content: String,
    /// Ordering index within the document, starting at 0.
    pub order_index: i32,
    pub token_count: i64,
    pub summary: Option<String>,
}

/// What an embedding record's text payload represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingKind {
    /// A whole chapter embedded as one record.
    Chapter,
    /// A bounded-token subdivision of a chapter.
    Chunk,
    /// A generated question/answer pair.
    QaPair,
    /// A generated chapter summary.
    Summary,
}

impl EmbeddingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingKind::Chapter => "chapter",
            EmbeddingKind::Chunk => "chunk",
            EmbeddingKind::QaPair => "qa_pair",
            EmbeddingKind::Summary => "summary",
        }
    }
}

impl FromStr for EmbeddingKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chapter" => Ok(EmbeddingKind::Chapter),
            "chunk" => Ok(EmbeddingKind::Chunk),
            "qa_pair" => Ok(EmbeddingKind::QaPair),
            "summary" => Ok(EmbeddingKind::Summary),
            other => Err(format!("unknown embedding kind: {}", other)),
        }
    }
}

/// A generated chunk-level record carrying its own dense vector, not yet
/// persisted. Belongs to (library, document) and optionally to a chapter.
/// The weighted full-text vector is derived by the database and never set
/// by the application.
#[derive(Debug, Clone)]
pub struct NewEmbedding {
    pub chapter_id: Option<i64>,
    pub text: String,
    pub order_in_chapter: i32,
    pub kind: EmbeddingKind,
    pub vector: Vec<f32>,
    /// Carries the originating chapter title/id for back-linking, plus
    /// kind-specific fields (question, answer_snippet, raw summary).
    pub metadata: serde_json::Value,
}

/// Role of a user within a library. Scopes search and administration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryRole {
    Owner,
    Collaborator,
    Reader,
}

impl LibraryRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            LibraryRole::Owner => "owner",
            LibraryRole::Collaborator => "collaborator",
            LibraryRole::Reader => "reader",
        }
    }
}

impl FromStr for LibraryRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(LibraryRole::Owner),
            "collaborator" => Ok(LibraryRole::Collaborator),
            "reader" => Ok(LibraryRole::Reader),
            other => Err(format!("unknown library role: {}", other)),
        }
    }
}

/// Many-to-many user↔library relation; never ownership.
#[derive(Debug, Clone, Serialize)]
pub struct UserLibraryAssociation {
    pub user_id: i64,
    pub library_id: i64,
    pub role: LibraryRole,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_roundtrip() {
        for ct in [
            ContentType::Generic,
            ContentType::LegalNorm,
            ContentType::Wiki,
            ContentType::ScientificArticle,
            ContentType::TechnicalDocumentation,
        ] {
            assert_eq!(ContentType::from_str(ct.as_str()).unwrap(), ct);
        }
        assert!(ContentType::from_str("spreadsheet").is_err());
    }

    #[test]
    fn test_embedding_kind_roundtrip() {
        for kind in [
            EmbeddingKind::Chapter,
            EmbeddingKind::Chunk,
            EmbeddingKind::QaPair,
            EmbeddingKind::Summary,
        ] {
            assert_eq!(EmbeddingKind::from_str(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn test_library_model_defaults_from_metadata() {
        let lib = Library {
            id: 1,
            uuid: Uuid::new_v4(),
            name: "norms".into(),
            area: Some("legal".into()),
            semantic_weight: 0.4,
            textual_weight: 0.6,
            metadata: serde_json::json!({
                "default_embedding_model": "nomic-embed-text",
            }),
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(lib.default_embedding_model(), Some("nomic-embed-text"));
        assert_eq!(lib.default_completion_model(), None);
    }
}
