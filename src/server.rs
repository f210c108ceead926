//! HTTP API server.
//!
//! Exposes the ingestion and search surface as JSON over HTTP.
//!
//! # Endpoints
//!
//! | Method | Path | Purpose | Success |
//! |--------|------|---------|---------|
//! | `POST` | `/api/v1/libraries` | Create library | 201 |
//! | `GET` | `/api/v1/libraries/{uuid}` | Fetch library | 200 |
//! | `DELETE` | `/api/v1/libraries/{uuid}?hard=bool` | Delete library | 204 |
//! | `POST` | `/api/v1/documents/upload/text` | Upload Markdown | 201 |
//! | `POST` | `/api/v1/documents/upload/url` | Upload by URL | 201 |
//! | `POST` | `/api/v1/documents/upload/file` | Multipart file | 201 |
//! | `POST` | `/api/v1/documents/{id}/process` | Start ingestion | 202 |
//! | `GET` | `/api/v1/documents/{id}/status` | Poll progress | 200 |
//! | `POST` | `/api/v1/documents/{id}/status?flagVigente=bool` | Toggle active | 200 |
//! | `DELETE` | `/api/v1/documents/{id}` | Soft-delete | 204 |
//! | `POST` | `/api/v1/search/hybrid` | Fused search | 200 |
//! | `POST` | `/api/v1/search/semantic` | Vector only | 200 |
//! | `POST` | `/api/v1/search/textual` | Lexical only | 200 |
//! | `POST` | `/api/v1/user-libraries` | Grant role | 201 |
//! | `GET` | `/health` | Health check | 200 |
//!
//! # Error Contract
//!
//! All error responses share one shape:
//!
//! ```json
//! { "code": "VALIDATION_ERROR", "message": "...", "timestamp": "...", "details": null }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::convert::{fetch_url, Converter};
use crate::error::Error;
use crate::models::{ContentType, LibraryRole};
use crate::pipeline::{IngestionHandle, ProcessOptions};
use crate::search::{SearchEngine, SearchMode, SearchParams};
use crate::splitter::detect_content_type;
use crate::store::Store;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub search: Arc<SearchEngine>,
    pub ingestion: IngestionHandle,
    pub converter: Arc<dyn Converter>,
}

/// Starts the HTTP server on the configured bind address. Runs until the
/// process is terminated.
pub async fn run_server(config: &Config, state: AppState) -> anyhow::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/v1/libraries", post(handle_create_library))
        .route(
            "/api/v1/libraries/{uuid}",
            get(handle_get_library).delete(handle_delete_library),
        )
        .route("/api/v1/documents/upload/text", post(handle_upload_text))
        .route("/api/v1/documents/upload/url", post(handle_upload_url))
        .route("/api/v1/documents/upload/file", post(handle_upload_file))
        .route("/api/v1/documents/{id}/process", post(handle_process))
        .route(
            "/api/v1/documents/{id}/status",
            get(handle_get_status).post(handle_toggle_active),
        )
        .route("/api/v1/documents/{id}", delete(handle_delete_document))
        .route("/api/v1/search/hybrid", post(handle_search_hybrid))
        .route("/api/v1/search/semantic", post(handle_search_semantic))
        .route("/api/v1/search/textual", post(handle_search_textual))
        .route("/api/v1/user-libraries", post(handle_create_association))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    info!(bind = %config.server.bind, "server listening");

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// Uniform JSON error body.
#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code,
            message: self.message,
            timestamp: Utc::now().to_rfc3339(),
            details: None,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Transient(_)
            | Error::ModelNotRegistered(_)
            | Error::PipelineFatal(_)
            | Error::Cancelled
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "VALIDATION_ERROR".to_string(),
        message: message.into(),
    }
}

// ============ Libraries ============

#[derive(Deserialize)]
struct CreateLibraryRequest {
    name: String,
    #[serde(default)]
    area: Option<String>,
    semantic_weight: f64,
    textual_weight: f64,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

async fn handle_create_library(
    State(state): State<AppState>,
    Json(req): Json<CreateLibraryRequest>,
) -> Result<impl IntoResponse, AppError> {
    let library = state
        .store
        .create_library(
            &req.name,
            req.area.as_deref(),
            req.semantic_weight,
            req.textual_weight,
            req.metadata.unwrap_or_else(|| serde_json::json!({})),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(library)))
}

async fn handle_get_library(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let library = state.store.get_library(uuid).await?;
    Ok(Json(library))
}

#[derive(Deserialize)]
struct DeleteLibraryQuery {
    #[serde(default)]
    hard: bool,
}

async fn handle_delete_library(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
    Query(query): Query<DeleteLibraryQuery>,
) -> Result<impl IntoResponse, AppError> {
    state.store.delete_library(uuid, query.hard).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ Document upload ============

#[derive(Deserialize)]
struct UploadTextRequest {
    library_id: Uuid,
    #[serde(default)]
    title: Option<String>,
    content: String,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct UploadResponse {
    id: i64,
    library_id: Uuid,
    title: String,
    content_type: ContentType,
    status: String,
}

async fn create_document_from_markdown(
    state: &AppState,
    library_uuid: Uuid,
    title: Option<String>,
    markdown: String,
    extracted_title: Option<String>,
    content_type: Option<String>,
    metadata: Option<serde_json::Value>,
) -> Result<UploadResponse, AppError> {
    if markdown.trim().is_empty() {
        return Err(bad_request("document content must not be empty"));
    }

    let library = state.store.get_library(library_uuid).await?;

    let title = title
        .or(extracted_title)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| bad_request("document title is required and could not be extracted"))?;

    let content_type = match content_type {
        Some(tag) => ContentType::from_str(&tag).map_err(|e| bad_request(e))?,
        None => detect_content_type(&markdown),
    };

    let document = state
        .store
        .create_document(
            library.id,
            &title,
            &markdown,
            content_type,
            metadata.unwrap_or_else(|| serde_json::json!({})),
        )
        .await?;

    Ok(UploadResponse {
        id: document.id,
        library_id: library.uuid,
        title: document.title,
        content_type: document.content_type,
        status: document.status.as_str().to_string(),
    })
}

async fn handle_upload_text(
    State(state): State<AppState>,
    Json(req): Json<UploadTextRequest>,
) -> Result<impl IntoResponse, AppError> {
    let converted = state
        .converter
        .convert(req.content.as_bytes(), "text/markdown")
        .await?;

    let response = create_document_from_markdown(
        &state,
        req.library_id,
        req.title,
        converted.markdown,
        converted.title,
        req.content_type,
        req.metadata,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Deserialize)]
struct UploadUrlRequest {
    library_id: Uuid,
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

async fn handle_upload_url(
    State(state): State<AppState>,
    Json(req): Json<UploadUrlRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (bytes, mime) = fetch_url(&req.url, Duration::from_secs(60)).await?;
    let converted = state.converter.convert(&bytes, &mime).await?;

    let response = create_document_from_markdown(
        &state,
        req.library_id,
        req.title,
        converted.markdown,
        converted.title,
        req.content_type,
        req.metadata,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(response)))
}

async fn handle_upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut library_id: Option<Uuid> = None;
    let mut title: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut file_mime: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        match field.name().unwrap_or_default() {
            "library_id" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(e.to_string()))?;
                library_id =
                    Some(Uuid::parse_str(&text).map_err(|_| bad_request("invalid library_id"))?);
            }
            "title" => {
                title = Some(field.text().await.map_err(|e| bad_request(e.to_string()))?);
            }
            "content_type" => {
                content_type =
                    Some(field.text().await.map_err(|e| bad_request(e.to_string()))?);
            }
            "file" => {
                file_mime = field.content_type().map(|ct| ct.to_string());
                file_bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| bad_request(e.to_string()))?
                        .to_vec(),
                );
            }
            _ => {}
        }
    }

    let library_id = library_id.ok_or_else(|| bad_request("library_id field is required"))?;
    let file_bytes = file_bytes.ok_or_else(|| bad_request("file field is required"))?;
    let mime = file_mime.unwrap_or_else(|| "text/plain".to_string());

    let converted = state.converter.convert(&file_bytes, &mime).await?;

    let response = create_document_from_markdown(
        &state,
        library_id,
        title,
        converted.markdown,
        converted.title,
        content_type,
        None,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(response)))
}

// ============ Document processing & status ============

#[derive(Deserialize)]
struct ProcessQuery {
    #[serde(default, rename = "includeQA")]
    include_qa: bool,
    #[serde(default, rename = "includeSummary")]
    include_summary: bool,
}

async fn handle_process(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<ProcessQuery>,
) -> Result<impl IntoResponse, AppError> {
    let options = ProcessOptions {
        include_qa: query.include_qa,
        include_summary: query.include_summary,
        ..ProcessOptions::default()
    };

    let started = state.ingestion.enqueue(id, options).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "document_id": id,
            "started": started,
        })),
    ))
}

#[derive(Serialize)]
struct StatusResponse {
    id: i64,
    status: String,
    progress: i32,
    message: Option<String>,
    active: bool,
    total_tokens: Option<i64>,
}

async fn handle_get_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let document = state.store.get_document(id).await?;
    Ok(Json(StatusResponse {
        id: document.id,
        status: document.status.as_str().to_string(),
        progress: document.progress,
        message: document.status_message,
        active: document.active,
        total_tokens: document.total_tokens,
    }))
}

#[derive(Deserialize)]
struct ToggleActiveQuery {
    #[serde(rename = "flagVigente")]
    flag_vigente: bool,
}

async fn handle_toggle_active(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<ToggleActiveQuery>,
) -> Result<impl IntoResponse, AppError> {
    let document = state.store.set_document_active(id, query.flag_vigente).await?;
    Ok(Json(serde_json::json!({
        "id": document.id,
        "active": document.active,
    })))
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    state.ingestion.cancel(id);
    state.store.soft_delete_document(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ Search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    library_ids: Vec<Uuid>,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    semantic_weight: Option<f64>,
    #[serde(default)]
    textual_weight: Option<f64>,
    #[serde(default = "default_active_only")]
    active_only: bool,
    #[serde(default)]
    embedding_model: Option<String>,
}

fn default_active_only() -> bool {
    true
}

impl SearchRequest {
    fn into_params(self) -> SearchParams {
        SearchParams {
            query: self.query,
            library_uuids: self.library_ids,
            limit: self.limit,
            semantic_weight: self.semantic_weight,
            textual_weight: self.textual_weight,
            active_only: self.active_only,
            embedding_model: self.embedding_model,
        }
    }
}

async fn run_search(
    state: AppState,
    req: SearchRequest,
    mode: SearchMode,
) -> Result<Response, AppError> {
    let hits = state.search.search(&req.into_params(), mode).await?;
    Ok(Json(serde_json::json!({
        "count": hits.len(),
        "results": hits,
    }))
    .into_response())
}

async fn handle_search_hybrid(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Response, AppError> {
    run_search(state, req, SearchMode::Hybrid).await
}

async fn handle_search_semantic(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Response, AppError> {
    run_search(state, req, SearchMode::Semantic).await
}

async fn handle_search_textual(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Response, AppError> {
    run_search(state, req, SearchMode::Textual).await
}

// ============ User-library associations ============

#[derive(Deserialize)]
struct CreateAssociationRequest {
    user_id: i64,
    library_id: Uuid,
    role: String,
}

async fn handle_create_association(
    State(state): State<AppState>,
    Json(req): Json<CreateAssociationRequest>,
) -> Result<impl IntoResponse, AppError> {
    let role = LibraryRole::from_str(&req.role).map_err(bad_request)?;
    let association = state
        .store
        .create_association(req.user_id, req.library_id, role)
        .await?;
    Ok((StatusCode::CREATED, Json(association)))
}

// ============ Health ============

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
