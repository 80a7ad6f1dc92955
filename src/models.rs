//! Core data models used throughout Policy Harness.
//!
//! These types represent the documents, chunks, retrieval candidates and
//! answers that flow through the ingestion and question pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An ingested policy document as recorded in the document catalog.
///
/// Immutable once stored. Re-ingesting the same `doc_name` produces a new
/// `Document` with a fresh `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    pub company_id: String,
    pub doc_name: String,
    pub original_filename: String,
    pub content_type: String,
    /// Hex SHA-256 of the raw bytes, kept for audit.
    pub sha256: String,
    pub byte_len: u64,
    /// Storage reference for the raw bytes.
    pub raw_path: String,
    pub chunk_count: usize,
    pub ingested_at: DateTime<Utc>,
}

/// A bounded, overlapping slice of a document's normalized text.
///
/// `char_start` and `char_end` are character offsets (end exclusive) into the
/// normalized text the chunker was given.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub company_id: String,
    pub sequence_index: usize,
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
}

/// Metadata stored alongside every vector in the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub company_id: String,
    pub document_id: String,
    pub doc_name: String,
    pub sequence_index: usize,
    pub char_start: usize,
    pub char_end: usize,
    pub source_file: String,
}

/// A single index entry: the unit written by ingestion.
#[derive(Debug, Clone)]
pub struct IndexRecord {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// A chunk returned by nearest-neighbour search for one query.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub chunk_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Cosine similarity between the query vector and the chunk vector.
    pub similarity_score: f32,
}

/// A candidate after cross-encoder reranking.
#[derive(Debug, Clone, Serialize)]
pub struct RankedEvidence {
    pub chunk_id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub relevance_score: f32,
    /// Position of this passage in the retrieval order (0-based).
    pub retrieval_rank: usize,
}

/// A citation attached to a non-refused answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub document_id: String,
    pub chunk_id: String,
    pub doc_name: String,
    pub sequence_index: usize,
    pub excerpt: String,
    pub relevance_score: f32,
}

/// The terminal result of one question.
///
/// A refused answer always carries no sources and no confidence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub question: String,
    pub answer_text: String,
    pub sources: Vec<Source>,
    pub refused: bool,
    /// Highest relevance score among the cited evidence.
    pub confidence: Option<f32>,
}
