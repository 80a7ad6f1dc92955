//! SQLite-backed [`VectorIndex`] and [`DocumentCatalog`].
//!
//! Vectors are stored as little-endian f32 BLOBs in the `chunks` table.
//! Queries narrow by `company_id` (and optionally `document_id`) in SQL,
//! then score the surviving rows by cosine similarity in Rust.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{rank_candidates, DocumentCatalog, IndexFilter, VectorIndex};
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{Candidate, ChunkMetadata, Document, IndexRecord};

const UPSERT_CHUNK: &str = r#"
    INSERT INTO chunks (id, company_id, document_id, doc_name, sequence_index,
                        char_start, char_end, source_file, text, dims, embedding)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET
        company_id = excluded.company_id,
        document_id = excluded.document_id,
        doc_name = excluded.doc_name,
        sequence_index = excluded.sequence_index,
        char_start = excluded.char_start,
        char_end = excluded.char_end,
        source_file = excluded.source_file,
        text = excluded.text,
        dims = excluded.dims,
        embedding = excluded.embedding
"#;

/// SQLite implementation of the index and catalog traits.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn bind_chunk<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    chunk_id: &'q str,
    vector: &[f32],
    text: &'q str,
    metadata: &'q ChunkMetadata,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(chunk_id)
        .bind(&metadata.company_id)
        .bind(&metadata.document_id)
        .bind(&metadata.doc_name)
        .bind(metadata.sequence_index as i64)
        .bind(metadata.char_start as i64)
        .bind(metadata.char_end as i64)
        .bind(&metadata.source_file)
        .bind(text)
        .bind(vector.len() as i64)
        .bind(vec_to_blob(vector))
}

fn row_to_document(row: &SqliteRow) -> Document {
    let byte_len: i64 = row.get("byte_len");
    let chunk_count: i64 = row.get("chunk_count");
    let ingested_at: i64 = row.get("ingested_at");
    Document {
        id: row.get("id"),
        company_id: row.get("company_id"),
        doc_name: row.get("doc_name"),
        original_filename: row.get("original_filename"),
        content_type: row.get("content_type"),
        sha256: row.get("sha256"),
        byte_len: byte_len.max(0) as u64,
        raw_path: row.get("raw_path"),
        chunk_count: chunk_count.max(0) as usize,
        ingested_at: DateTime::<Utc>::from_timestamp_millis(ingested_at).unwrap_or_default(),
    }
}

#[async_trait]
impl VectorIndex for SqliteStore {
    async fn upsert(
        &self,
        chunk_id: &str,
        vector: &[f32],
        text: &str,
        metadata: &ChunkMetadata,
    ) -> Result<()> {
        bind_chunk(sqlx::query(UPSERT_CHUNK), chunk_id, vector, text, metadata)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_batch(&self, records: &[IndexRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for r in records {
            bind_chunk(
                sqlx::query(UPSERT_CHUNK),
                &r.chunk_id,
                &r.vector,
                &r.text,
                &r.metadata,
            )
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        n: usize,
        filter: &IndexFilter,
    ) -> Result<Vec<Candidate>> {
        let rows = match filter.document_id() {
            Some(document_id) => {
                sqlx::query(
                    r#"
                    SELECT id, company_id, document_id, doc_name, sequence_index,
                           char_start, char_end, source_file, text, embedding
                    FROM chunks
                    WHERE company_id = ? AND document_id = ?
                    "#,
                )
                .bind(filter.company_id())
                .bind(document_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, company_id, document_id, doc_name, sequence_index,
                           char_start, char_end, source_file, text, embedding
                    FROM chunks
                    WHERE company_id = ?
                    "#,
                )
                .bind(filter.company_id())
                .fetch_all(&self.pool)
                .await?
            }
        };

        let candidates = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let sequence_index: i64 = row.get("sequence_index");
                let char_start: i64 = row.get("char_start");
                let char_end: i64 = row.get("char_end");
                Candidate {
                    chunk_id: row.get("id"),
                    text: row.get("text"),
                    metadata: ChunkMetadata {
                        company_id: row.get("company_id"),
                        document_id: row.get("document_id"),
                        doc_name: row.get("doc_name"),
                        sequence_index: sequence_index.max(0) as usize,
                        char_start: char_start.max(0) as usize,
                        char_end: char_end.max(0) as usize,
                        source_file: row.get("source_file"),
                    },
                    similarity_score: cosine_similarity(vector, &blob_to_vec(&blob)),
                }
            })
            .collect();

        Ok(rank_candidates(candidates, n))
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn count(&self, filter: &IndexFilter) -> Result<usize> {
        let count: i64 = match filter.document_id() {
            Some(document_id) => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM chunks WHERE company_id = ? AND document_id = ?",
                )
                .bind(filter.company_id())
                .bind(document_id)
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE company_id = ?")
                    .bind(filter.company_id())
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count as usize)
    }
}

#[async_trait]
impl DocumentCatalog for SqliteStore {
    async fn record_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, company_id, doc_name, original_filename, content_type,
                                   sha256, byte_len, raw_path, chunk_count, ingested_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.company_id)
        .bind(&doc.doc_name)
        .bind(&doc.original_filename)
        .bind(&doc.content_type)
        .bind(&doc.sha256)
        .bind(doc.byte_len as i64)
        .bind(&doc.raw_path)
        .bind(doc.chunk_count as i64)
        .bind(doc.ingested_at.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_document))
    }

    async fn list_documents(&self, company_id: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT * FROM documents WHERE company_id = ? ORDER BY ingested_at DESC, id ASC",
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_document).collect())
    }
}
