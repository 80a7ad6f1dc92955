//! HTTP server for ingestion and policy questions.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ingest/pdf` | Multipart upload: `company_id`, `doc_name`, `file` |
//! | `POST` | `/chat` | Ask a question: `{ company_id, question, top_k?, retrieve_n? }` |
//! | `GET`  | `/documents?company_id=` | Documents ingested for a company |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "empty_document", "message": "...", "stage": "ingest.chunk" } }
//! ```
//!
//! Codes: `bad_request` (400), `payload_too_large` (413), `unsupported_content_type` (415),
//! `empty_document` (422), `extraction_failed` (422), `index_write_failed` (500),
//! `ingestion_failed` (500), `query_failed` (500), `retrieval_failed` (503),
//! `generation_timeout` (504), `internal` (500). Messages never carry file
//! paths or provider payloads; the full error goes to the log.
//!
//! A refused answer is a normal `200` response with `refused: true`.

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::PipelineError;
use crate::extract::{content_type_for_path, normalize_content_type, MIME_PDF};
use crate::ingest::IngestRequest;
use crate::models::{Document, Source};
use crate::pipeline::{Overrides, QuestionRequest};
use crate::services::{build_services, Services};

/// Room for multipart framing and the text fields on top of the document.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Starts the HTTP server with adapters built from `config`.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = build_services(config).await?;
    run_server_with_services(config, services).await
}

/// Starts the HTTP server with caller-supplied [`Services`].
pub async fn run_server_with_services(config: &Config, services: Services) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(services, config.ingest.max_document_bytes);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(bind = %bind_addr, "server listening");
    println!("Policy server listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(services: Services, max_document_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ingest/pdf", post(handle_ingest))
        .route("/chat", post(handle_chat))
        .route("/documents", get(handle_documents))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(
            max_document_bytes.saturating_add(MULTIPART_OVERHEAD),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(services)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<String>,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    stage: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                stage: self.stage,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
        stage: None,
    }
}

/// Oversized bodies surface as multipart read errors; keep them apart from
/// malformed uploads.
fn multipart_error(what: &str, err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        tracing::warn!(error = %err, "upload rejected: body too large");
        return AppError {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            code: "payload_too_large".to_string(),
            message: "the upload exceeds the maximum document size".to_string(),
            stage: None,
        };
    }
    bad_request(format!("{}: {}", what, err.body_text()))
}

fn internal(err: impl std::fmt::Display) -> AppError {
    tracing::error!(error = %err, "internal error");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: "internal error".to_string(),
        stage: None,
    }
}

fn status_for(err: &PipelineError) -> StatusCode {
    match err {
        PipelineError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
        PipelineError::EmptyDocument | PipelineError::Extraction(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        PipelineError::UnsupportedContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        PipelineError::Retrieval(_) => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::GenerationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        PipelineError::IndexWrite { .. } | PipelineError::Stage { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let status = status_for(&err);
        if status.is_server_error() {
            tracing::error!(stage = %err.stage(), error = %err, "request failed");
        } else {
            tracing::warn!(stage = %err.stage(), error = %err, "request rejected");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.public_message(),
            stage: Some(err.stage().to_string()),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /ingest/pdf ============

#[derive(Serialize)]
struct IngestResponse {
    status: String,
    document_id: String,
    chunk_count: usize,
    message: String,
}

struct UploadedFile {
    filename: String,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

/// Multipart ingestion. The content type comes from the file part when it
/// names a supported type, else from the file name, else PDF.
async fn handle_ingest(
    State(services): State<Services>,
    mut multipart: Multipart,
) -> Result<Json<IngestResponse>, AppError> {
    let mut company_id = None;
    let mut doc_name = None;
    let mut file = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error("invalid multipart body", e))?
    {
        match field.name().unwrap_or_default() {
            "company_id" => {
                company_id = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| multipart_error("invalid company_id", e))?,
                )
            }
            "doc_name" => {
                doc_name = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| multipart_error("invalid doc_name", e))?,
                )
            }
            "file" => {
                let filename = field.file_name().unwrap_or("upload.pdf").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| multipart_error("failed to read file", e))?;
                file = Some(UploadedFile {
                    filename,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {}
        }
    }

    let company_id = company_id.ok_or_else(|| bad_request("company_id is required"))?;
    let doc_name = doc_name.ok_or_else(|| bad_request("doc_name is required"))?;
    let file = file.ok_or_else(|| bad_request("file is required"))?;

    let content_type = resolve_content_type(file.content_type.as_deref(), &file.filename);
    let report = services
        .ingestor
        .ingest(IngestRequest {
            company_id,
            doc_name,
            original_filename: file.filename,
            content_type,
            bytes: file.bytes,
            chunking: None,
        })
        .await?;

    Ok(Json(IngestResponse {
        status: "ok".to_string(),
        message: format!("Document ingested into {} chunks.", report.chunk_count),
        document_id: report.document_id,
        chunk_count: report.chunk_count,
    }))
}

fn resolve_content_type(declared: Option<&str>, filename: &str) -> String {
    let declared = declared.map(normalize_content_type);
    match declared.as_deref() {
        Some("application/octet-stream") | Some("") | None => {
            content_type_for_path(Path::new(filename))
                .unwrap_or(MIME_PDF)
                .to_string()
        }
        Some(ct) => ct.to_string(),
    }
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    company_id: String,
    question: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    retrieve_n: Option<usize>,
}

#[derive(Serialize)]
struct ChatResponse {
    answer: String,
    refused: bool,
    sources: Vec<Source>,
    confidence: Option<f32>,
}

async fn handle_chat(
    State(services): State<Services>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let request = QuestionRequest {
        company_id: req.company_id,
        question: req.question,
        overrides: Overrides {
            retrieve_n: req.retrieve_n,
            top_k: req.top_k,
            min_relevance: None,
        },
    };
    let answer = services.pipeline.answer(&request).await?;

    Ok(Json(ChatResponse {
        answer: answer.answer_text,
        refused: answer.refused,
        sources: answer.sources,
        confidence: answer.confidence,
    }))
}

// ============ GET /documents ============

#[derive(Deserialize)]
struct DocumentsQuery {
    company_id: Option<String>,
}

#[derive(Serialize)]
struct DocumentSummary {
    id: String,
    doc_name: String,
    original_filename: String,
    content_type: String,
    chunk_count: usize,
    byte_len: u64,
    ingested_at: String,
}

impl From<Document> for DocumentSummary {
    fn from(d: Document) -> Self {
        Self {
            id: d.id,
            doc_name: d.doc_name,
            original_filename: d.original_filename,
            content_type: d.content_type,
            chunk_count: d.chunk_count,
            byte_len: d.byte_len,
            ingested_at: d.ingested_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
struct DocumentsResponse {
    documents: Vec<DocumentSummary>,
}

async fn handle_documents(
    State(services): State<Services>,
    Query(query): Query<DocumentsQuery>,
) -> Result<Json<DocumentsResponse>, AppError> {
    let company_id = query
        .company_id
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| bad_request("company_id query parameter is required"))?;

    let documents = services
        .catalog
        .list_documents(company_id.trim())
        .await
        .map_err(internal)?;

    Ok(Json(DocumentsResponse {
        documents: documents.into_iter().map(DocumentSummary::from).collect(),
    }))
}
