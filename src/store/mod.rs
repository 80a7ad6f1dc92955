//! Vector index and document catalog abstractions.
//!
//! [`VectorIndex`] stores `(chunk_id, vector, text, metadata)` tuples and
//! answers filtered nearest-neighbour queries. [`DocumentCatalog`] records
//! the documents those chunks came from. Both are implemented by the SQLite
//! backend ([`sqlite::SqliteStore`]) and the in-memory backend
//! ([`memory::InMemoryStore`]).
//!
//! Every query carries an [`IndexFilter`], and an `IndexFilter` cannot be
//! built without a `company_id`: there is no unscoped search.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Candidate, ChunkMetadata, Document, IndexRecord};

/// Exact-match metadata filter applied to index queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFilter {
    company_id: String,
    document_id: Option<String>,
}

impl IndexFilter {
    /// Restrict to one company's chunks.
    pub fn company(company_id: impl Into<String>) -> Self {
        Self {
            company_id: company_id.into(),
            document_id: None,
        }
    }

    /// Further restrict to a single document.
    pub fn with_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn company_id(&self) -> &str {
        &self.company_id
    }

    pub fn document_id(&self) -> Option<&str> {
        self.document_id.as_deref()
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        metadata.company_id == self.company_id
            && self
                .document_id
                .as_deref()
                .map_or(true, |d| metadata.document_id == d)
    }
}

/// Vector store adapter.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorIndex::upsert) | Store one chunk with its vector and metadata |
/// | [`upsert_batch`](VectorIndex::upsert_batch) | Store all chunks of a document |
/// | [`query`](VectorIndex::query) | Filtered nearest-neighbour search |
/// | [`delete_document`](VectorIndex::delete_document) | Remove every chunk of a document |
/// | [`count`](VectorIndex::count) | Number of chunks matching a filter |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(
        &self,
        chunk_id: &str,
        vector: &[f32],
        text: &str,
        metadata: &ChunkMetadata,
    ) -> Result<()>;

    /// Store a batch of records. Backends that support transactions should
    /// make the batch all-or-nothing; the default writes one by one.
    async fn upsert_batch(&self, records: &[IndexRecord]) -> Result<()> {
        for r in records {
            self.upsert(&r.chunk_id, &r.vector, &r.text, &r.metadata)
                .await?;
        }
        Ok(())
    }

    /// Up to `n` chunks matching `filter`, most similar first.
    async fn query(&self, vector: &[f32], n: usize, filter: &IndexFilter)
        -> Result<Vec<Candidate>>;

    /// Remove all chunks of a document; returns how many were removed.
    async fn delete_document(&self, document_id: &str) -> Result<usize>;

    async fn count(&self, filter: &IndexFilter) -> Result<usize>;
}

/// Catalog of ingested documents.
#[async_trait]
pub trait DocumentCatalog: Send + Sync {
    async fn record_document(&self, doc: &Document) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// Documents of one company, most recently ingested first.
    async fn list_documents(&self, company_id: &str) -> Result<Vec<Document>>;
}

/// Sort candidates by similarity (desc), then chunk id (asc), and keep `n`.
pub(crate) fn rank_candidates(mut candidates: Vec<Candidate>, n: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.similarity_score
            .partial_cmp(&a.similarity_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    candidates.truncate(n);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(company: &str, doc: &str) -> ChunkMetadata {
        ChunkMetadata {
            company_id: company.to_string(),
            document_id: doc.to_string(),
            doc_name: "handbook".to_string(),
            sequence_index: 0,
            char_start: 0,
            char_end: 1,
            source_file: "handbook.pdf".to_string(),
        }
    }

    #[test]
    fn filter_requires_company_match() {
        let f = IndexFilter::company("acme");
        assert!(f.matches(&meta("acme", "d1")));
        assert!(!f.matches(&meta("other", "d1")));
    }

    #[test]
    fn filter_by_document() {
        let f = IndexFilter::company("acme").with_document("d2");
        assert!(!f.matches(&meta("acme", "d1")));
        assert!(f.matches(&meta("acme", "d2")));
        assert!(!f.matches(&meta("other", "d2")));
    }

    #[test]
    fn ranking_is_descending_with_id_tiebreak() {
        let c = |id: &str, s: f32| Candidate {
            chunk_id: id.to_string(),
            text: String::new(),
            metadata: meta("acme", "d1"),
            similarity_score: s,
        };
        let ranked = rank_candidates(vec![c("b", 0.5), c("a", 0.5), c("c", 0.9)], 2);
        let ids: Vec<&str> = ranked.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }
}
