//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow for one uploaded document:
//! validation → raw persistence → extraction → chunking → embedding →
//! index commit → catalog record.
//!
//! Either every chunk of a document becomes searchable or none does. A
//! failure before the commit removes the raw file; a failure during the
//! commit additionally deletes whatever reached the index. The commit runs
//! on its own task so that dropping the caller's future (for example on a
//! client disconnect) cannot leave a half-written document behind.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::chunk::{chunk_text, normalize_text};
use crate::config::{validate_chunking, ChunkingConfig, IngestConfig};
use crate::embedding::{embed_batched, Embedder};
use crate::error::{PipelineError, Stage};
use crate::extract::{extension_for, extract_text, normalize_content_type};
use crate::models::{ChunkMetadata, Document, IndexRecord};
use crate::storage::RawStore;
use crate::store::{DocumentCatalog, VectorIndex};

/// One document to ingest.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub company_id: String,
    pub doc_name: String,
    pub original_filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    /// Overrides the ingestor's chunking settings for this document.
    pub chunking: Option<ChunkingConfig>,
}

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub document_id: String,
    pub chunk_count: usize,
    pub raw_path: PathBuf,
}

/// Runs documents through the ingestion stages and commits them.
pub struct Ingestor {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    catalog: Arc<dyn DocumentCatalog>,
    raw_store: RawStore,
    chunking: ChunkingConfig,
    batch_size: usize,
    max_document_bytes: usize,
}

impl Ingestor {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        catalog: Arc<dyn DocumentCatalog>,
        raw_store: RawStore,
    ) -> Self {
        Self {
            embedder,
            index,
            catalog,
            raw_store,
            chunking: ChunkingConfig::default(),
            batch_size: 32,
            max_document_bytes: IngestConfig::default().max_document_bytes,
        }
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_document_bytes(mut self, max: usize) -> Self {
        self.max_document_bytes = max;
        self
    }

    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestReport, PipelineError> {
        let chunking = request
            .chunking
            .clone()
            .unwrap_or_else(|| self.chunking.clone());
        let content_type = self.validate(&request, &chunking)?;

        let document_id = Uuid::new_v4().to_string();
        let sha256 = format!("{:x}", Sha256::digest(&request.bytes));
        let byte_len = request.bytes.len() as u64;

        let raw_path = self
            .raw_store
            .put(&document_id, &content_type, &request.bytes)
            .await
            .map_err(|e| PipelineError::at(Stage::IngestPersist, format!("{:#}", e)))?;

        tracing::debug!(
            document_id = %document_id,
            company_id = %request.company_id,
            bytes = byte_len,
            "raw document persisted"
        );

        let records = match self
            .prepare(&document_id, &content_type, &chunking, &request)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                self.discard_raw(&raw_path).await;
                return Err(e);
            }
        };

        let document = Document {
            id: document_id.clone(),
            company_id: request.company_id.trim().to_string(),
            doc_name: request.doc_name.trim().to_string(),
            original_filename: request.original_filename.clone(),
            content_type,
            sha256,
            byte_len,
            raw_path: raw_path.display().to_string(),
            chunk_count: records.len(),
            ingested_at: Utc::now(),
        };
        let chunk_count = records.len();

        let index = self.index.clone();
        let catalog = self.catalog.clone();
        let committed = tokio::spawn(commit(index, catalog, records, document))
            .await
            .map_err(|e| PipelineError::IndexWrite {
                document_id: document_id.clone(),
                stage: Stage::IngestIndex,
                reason: format!("commit task failed: {}", e),
            })
            .and_then(|r| r);

        if let Err(e) = committed {
            self.discard_raw(&raw_path).await;
            return Err(e);
        }

        tracing::info!(
            document_id = %document_id,
            company_id = %request.company_id,
            doc_name = %request.doc_name,
            chunks = chunk_count,
            "document ingested"
        );

        Ok(IngestReport {
            document_id,
            chunk_count,
            raw_path,
        })
    }

    fn validate(
        &self,
        request: &IngestRequest,
        chunking: &ChunkingConfig,
    ) -> Result<String, PipelineError> {
        if request.company_id.trim().is_empty() {
            return Err(PipelineError::invalid(
                Stage::IngestValidate,
                "company_id must not be empty",
            ));
        }
        if request.doc_name.trim().is_empty() {
            return Err(PipelineError::invalid(
                Stage::IngestValidate,
                "doc_name must not be empty",
            ));
        }
        if request.bytes.is_empty() {
            return Err(PipelineError::invalid(
                Stage::IngestValidate,
                "uploaded file is empty",
            ));
        }
        if request.bytes.len() > self.max_document_bytes {
            return Err(PipelineError::invalid(
                Stage::IngestValidate,
                format!(
                    "document is {} bytes, limit is {}",
                    request.bytes.len(),
                    self.max_document_bytes
                ),
            ));
        }
        validate_chunking(chunking)
            .map_err(|e| PipelineError::invalid(Stage::IngestValidate, e.to_string()))?;

        let content_type = normalize_content_type(&request.content_type);
        if extension_for(&content_type) == "bin" {
            return Err(PipelineError::UnsupportedContentType(content_type));
        }
        Ok(content_type)
    }

    /// Extract, chunk and embed. Nothing is written to the index here.
    async fn prepare(
        &self,
        document_id: &str,
        content_type: &str,
        chunking: &ChunkingConfig,
        request: &IngestRequest,
    ) -> Result<Vec<IndexRecord>, PipelineError> {
        let ct = content_type.to_string();
        let bytes = request.bytes.clone();
        let text = tokio::task::spawn_blocking(move || extract_text(&bytes, &ct))
            .await
            .map_err(|e| PipelineError::at(Stage::IngestExtract, e))??;

        let company_id = request.company_id.trim();
        let normalized = normalize_text(&text);
        let chunks = chunk_text(document_id, company_id, &normalized, chunking)?;
        tracing::debug!(document_id, chunks = chunks.len(), "document chunked");

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_batched(self.embedder.as_ref(), &texts, self.batch_size)
            .await
            .map_err(|e| PipelineError::at(Stage::IngestEmbed, format!("{:#}", e)))?;
        tracing::debug!(
            document_id,
            model = self.embedder.model_name(),
            vectors = vectors.len(),
            "chunks embedded"
        );

        let doc_name = request.doc_name.trim();
        Ok(chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexRecord {
                metadata: ChunkMetadata {
                    company_id: chunk.company_id.clone(),
                    document_id: chunk.document_id.clone(),
                    doc_name: doc_name.to_string(),
                    sequence_index: chunk.sequence_index,
                    char_start: chunk.char_start,
                    char_end: chunk.char_end,
                    source_file: request.original_filename.clone(),
                },
                chunk_id: chunk.id,
                vector,
                text: chunk.text,
            })
            .collect())
    }

    async fn discard_raw(&self, path: &std::path::Path) {
        if let Err(e) = self.raw_store.remove(path).await {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove raw document");
        }
    }
}

/// Write all records, then the catalog entry. Any failure deletes the
/// document's chunks from the index again.
async fn commit(
    index: Arc<dyn VectorIndex>,
    catalog: Arc<dyn DocumentCatalog>,
    records: Vec<IndexRecord>,
    document: Document,
) -> Result<(), PipelineError> {
    let failure = match index.upsert_batch(&records).await {
        Err(e) => Some((Stage::IngestIndex, format!("{:#}", e))),
        Ok(()) => match catalog.record_document(&document).await {
            Err(e) => Some((Stage::IngestCatalog, format!("{:#}", e))),
            Ok(()) => None,
        },
    };

    let Some((stage, reason)) = failure else {
        return Ok(());
    };

    tracing::error!(document_id = %document.id, %stage, %reason, "commit failed, rolling back");
    match index.delete_document(&document.id).await {
        Ok(removed) => {
            tracing::warn!(document_id = %document.id, removed, "partial chunks removed")
        }
        Err(e) => {
            tracing::error!(document_id = %document.id, error = %e, "cleanup after failed commit failed")
        }
    }
    Err(PipelineError::IndexWrite {
        document_id: document.id,
        stage,
        reason,
    })
}
