//! Error taxonomy for the ingestion and question pipelines.
//!
//! Every [`PipelineError`] knows the [`Stage`] it came from, a stable
//! machine-readable [`code`](PipelineError::code) and a
//! [`public_message`](PipelineError::public_message) that is safe to return
//! to API callers. The full `Display` output may carry file paths or provider
//! responses and is only written to the log.
//!
//! Insufficient evidence is not an error: it is an [`Answer`](crate::models::Answer)
//! with `refused = true`.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Pipeline stage an error originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    IngestValidate,
    IngestPersist,
    IngestExtract,
    IngestChunk,
    IngestEmbed,
    IngestIndex,
    IngestCatalog,
    QueryValidate,
    QueryEmbed,
    QueryRetrieve,
    QueryRerank,
    QueryGenerate,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::IngestValidate => "ingest.validate",
            Stage::IngestPersist => "ingest.persist",
            Stage::IngestExtract => "ingest.extract",
            Stage::IngestChunk => "ingest.chunk",
            Stage::IngestEmbed => "ingest.embed",
            Stage::IngestIndex => "ingest.index",
            Stage::IngestCatalog => "ingest.catalog",
            Stage::QueryValidate => "query.validate",
            Stage::QueryEmbed => "query.embed",
            Stage::QueryRetrieve => "query.retrieve",
            Stage::QueryRerank => "query.rerank",
            Stage::QueryGenerate => "query.generate",
        }
    }

    pub fn is_ingest(&self) -> bool {
        self.as_str().starts_with("ingest.")
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid request ({stage}): {reason}")]
    InvalidInput { stage: Stage, reason: String },

    #[error("document contains no extractable text")]
    EmptyDocument,

    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),

    #[error("text extraction failed: {0}")]
    Extraction(String),

    /// The index or catalog write failed; the document's chunks were removed.
    #[error("{stage} failed for document {document_id}: {reason}")]
    IndexWrite {
        document_id: String,
        stage: Stage,
        reason: String,
    },

    #[error("retrieval failed: {0}")]
    Retrieval(String),

    #[error("generation timed out after {after:?}")]
    GenerationTimeout { after: Duration },

    #[error("{stage} failed: {reason}")]
    Stage { stage: Stage, reason: String },
}

impl PipelineError {
    pub fn invalid(stage: Stage, reason: impl Into<String>) -> Self {
        PipelineError::InvalidInput {
            stage,
            reason: reason.into(),
        }
    }

    /// Wrap any displayable failure as an error of the given stage.
    pub fn at(stage: Stage, err: impl fmt::Display) -> Self {
        PipelineError::Stage {
            stage,
            reason: err.to_string(),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::InvalidInput { stage, .. } => *stage,
            PipelineError::EmptyDocument => Stage::IngestChunk,
            PipelineError::UnsupportedContentType(_) | PipelineError::Extraction(_) => {
                Stage::IngestExtract
            }
            PipelineError::IndexWrite { stage, .. } => *stage,
            PipelineError::Retrieval(_) => Stage::QueryRetrieve,
            PipelineError::GenerationTimeout { .. } => Stage::QueryGenerate,
            PipelineError::Stage { stage, .. } => *stage,
        }
    }

    /// Stable error code used in API responses.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::InvalidInput { .. } => "bad_request",
            PipelineError::EmptyDocument => "empty_document",
            PipelineError::UnsupportedContentType(_) => "unsupported_content_type",
            PipelineError::Extraction(_) => "extraction_failed",
            PipelineError::IndexWrite { .. } => "index_write_failed",
            PipelineError::Retrieval(_) => "retrieval_failed",
            PipelineError::GenerationTimeout { .. } => "generation_timeout",
            PipelineError::Stage { stage, .. } if stage.is_ingest() => "ingestion_failed",
            PipelineError::Stage { .. } => "query_failed",
        }
    }

    /// Message safe to show to API callers: no paths, no provider payloads.
    pub fn public_message(&self) -> String {
        match self {
            PipelineError::InvalidInput { reason, .. } => reason.clone(),
            PipelineError::EmptyDocument => {
                "no text could be extracted from the document (scanned PDFs need OCR)".to_string()
            }
            PipelineError::UnsupportedContentType(ct) => {
                format!("unsupported content-type: {}", ct)
            }
            PipelineError::Extraction(_) => "the document could not be parsed".to_string(),
            PipelineError::IndexWrite { .. } => {
                "the document could not be indexed; no chunks were kept".to_string()
            }
            PipelineError::Retrieval(_) => "the policy index is unavailable".to_string(),
            PipelineError::GenerationTimeout { after } => {
                format!("answer generation timed out after {}s", after.as_secs())
            }
            PipelineError::Stage { stage, .. } => format!("{} stage failed", stage),
        }
    }
}
