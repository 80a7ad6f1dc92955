//! In-memory [`VectorIndex`] and [`DocumentCatalog`] for tests and
//! throwaway runs.
//!
//! Uses `Vec` and `HashMap` behind `std::sync::RwLock`. Search is brute-force
//! cosine similarity over the records that pass the filter.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{rank_candidates, DocumentCatalog, IndexFilter, VectorIndex};
use crate::embedding::cosine_similarity;
use crate::models::{Candidate, ChunkMetadata, Document, IndexRecord};

#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<Vec<IndexRecord>>,
    docs: RwLock<HashMap<String, Document>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl VectorIndex for InMemoryStore {
    async fn upsert(
        &self,
        chunk_id: &str,
        vector: &[f32],
        text: &str,
        metadata: &ChunkMetadata,
    ) -> Result<()> {
        let mut records = self.records.write().map_err(poisoned)?;
        records.retain(|r| r.chunk_id != chunk_id);
        records.push(IndexRecord {
            chunk_id: chunk_id.to_string(),
            vector: vector.to_vec(),
            text: text.to_string(),
            metadata: metadata.clone(),
        });
        Ok(())
    }

    async fn upsert_batch(&self, batch: &[IndexRecord]) -> Result<()> {
        // Single lock scope: readers see either none or all of the batch.
        let mut records = self.records.write().map_err(poisoned)?;
        records.retain(|r| !batch.iter().any(|b| b.chunk_id == r.chunk_id));
        records.extend(batch.iter().cloned());
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        n: usize,
        filter: &IndexFilter,
    ) -> Result<Vec<Candidate>> {
        let records = self.records.read().map_err(poisoned)?;
        let candidates = records
            .iter()
            .filter(|r| filter.matches(&r.metadata))
            .map(|r| Candidate {
                chunk_id: r.chunk_id.clone(),
                text: r.text.clone(),
                metadata: r.metadata.clone(),
                similarity_score: cosine_similarity(vector, &r.vector),
            })
            .collect();
        Ok(rank_candidates(candidates, n))
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let mut records = self.records.write().map_err(poisoned)?;
        let before = records.len();
        records.retain(|r| r.metadata.document_id != document_id);
        Ok(before - records.len())
    }

    async fn count(&self, filter: &IndexFilter) -> Result<usize> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.iter().filter(|r| filter.matches(&r.metadata)).count())
    }
}

#[async_trait]
impl DocumentCatalog for InMemoryStore {
    async fn record_document(&self, doc: &Document) -> Result<()> {
        self.docs
            .write()
            .map_err(poisoned)?
            .insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.docs.read().map_err(poisoned)?.get(id).cloned())
    }

    async fn list_documents(&self, company_id: &str) -> Result<Vec<Document>> {
        let docs = self.docs.read().map_err(poisoned)?;
        let mut out: Vec<Document> = docs
            .values()
            .filter(|d| d.company_id == company_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.ingested_at.cmp(&a.ingested_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, company: &str, doc: &str, vector: Vec<f32>) -> IndexRecord {
        IndexRecord {
            chunk_id: id.to_string(),
            vector,
            text: format!("text of {}", id),
            metadata: ChunkMetadata {
                company_id: company.to_string(),
                document_id: doc.to_string(),
                doc_name: "handbook".to_string(),
                sequence_index: 0,
                char_start: 0,
                char_end: 10,
                source_file: "handbook.pdf".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn query_respects_company_filter() {
        let store = InMemoryStore::new();
        store
            .upsert_batch(&[
                record("a1", "acme", "d1", vec![1.0, 0.0]),
                record("b1", "globex", "d2", vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let hits = store
            .query(&[1.0, 0.0], 10, &IndexFilter::company("acme"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "a1");

        let none = store
            .query(&[1.0, 0.0], 10, &IndexFilter::company("initech"))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn query_orders_and_truncates() {
        let store = InMemoryStore::new();
        store
            .upsert_batch(&[
                record("far", "acme", "d1", vec![0.0, 1.0]),
                record("near", "acme", "d1", vec![1.0, 0.1]),
                record("mid", "acme", "d1", vec![1.0, 1.0]),
            ])
            .await
            .unwrap();
        let hits = store
            .query(&[1.0, 0.0], 2, &IndexFilter::company("acme"))
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
    }

    #[tokio::test]
    async fn delete_document_removes_only_that_document() {
        let store = InMemoryStore::new();
        store.upsert("a", &[1.0], "x", &record("a", "acme", "d1", vec![]).metadata).await.unwrap();
        store.upsert("b", &[1.0], "y", &record("b", "acme", "d2", vec![]).metadata).await.unwrap();
        assert_eq!(store.delete_document("d1").await.unwrap(), 1);
        assert_eq!(store.count(&IndexFilter::company("acme")).await.unwrap(), 1);
    }
}
