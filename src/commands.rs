//! CLI command implementations.
//!
//! Each `run_*` function builds the services it needs from config, runs one
//! operation and prints a human-readable report to stdout.

use anyhow::{anyhow, Context, Result};
use std::path::Path;

use crate::config::{ChunkingConfig, Config};
use crate::extract::content_type_for_path;
use crate::ingest::IngestRequest;
use crate::pipeline::{Overrides, QuestionRequest};
use crate::services::build_services;

/// Ingest one file from disk.
pub async fn run_ingest(
    config: &Config,
    path: &Path,
    company_id: &str,
    doc_name: &str,
    content_type: Option<String>,
    chunk_size: Option<usize>,
    overlap: Option<usize>,
) -> Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let content_type = match content_type {
        Some(ct) => ct,
        None => content_type_for_path(path)
            .ok_or_else(|| {
                anyhow!(
                    "Cannot infer content type of {}; pass --content-type",
                    path.display()
                )
            })?
            .to_string(),
    };

    let chunking = if chunk_size.is_some() || overlap.is_some() {
        Some(ChunkingConfig {
            chunk_size: chunk_size.unwrap_or(config.chunking.chunk_size),
            overlap: overlap.unwrap_or(config.chunking.overlap),
        })
    } else {
        None
    };

    let original_filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let services = build_services(config).await?;
    let report = services
        .ingestor
        .ingest(IngestRequest {
            company_id: company_id.to_string(),
            doc_name: doc_name.to_string(),
            original_filename,
            content_type,
            bytes,
            chunking,
        })
        .await?;

    println!("ingest {}", path.display());
    println!("  company: {}", company_id);
    println!("  document: {}", report.document_id);
    println!("  chunks written: {}", report.chunk_count);
    println!("  raw file: {}", report.raw_path.display());
    println!("ok");
    Ok(())
}

pub async fn run_ask(
    config: &Config,
    company_id: &str,
    question: &str,
    top_k: Option<usize>,
    retrieve_n: Option<usize>,
    json: bool,
) -> Result<()> {
    let services = build_services(config).await?;
    let request = QuestionRequest {
        company_id: company_id.to_string(),
        question: question.to_string(),
        overrides: Overrides {
            retrieve_n,
            top_k,
            min_relevance: None,
        },
    };
    let answer = services.pipeline.answer(&request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
        return Ok(());
    }

    println!("{}", answer.answer_text);
    println!();
    if answer.refused {
        println!("(refused: no supporting policy text)");
        return Ok(());
    }
    if let Some(confidence) = answer.confidence {
        println!("confidence: {:.2}", confidence);
    }
    println!("sources:");
    for (i, s) in answer.sources.iter().enumerate() {
        println!(
            "  [S{}] [{:.2}] {} | chunk {}",
            i + 1,
            s.relevance_score,
            s.doc_name,
            s.sequence_index
        );
        println!("      \"{}\"", s.excerpt.replace('\n', " ").trim());
    }
    Ok(())
}

/// Show the reranked evidence for a question without calling the LLM.
pub async fn run_evidence(config: &Config, company_id: &str, question: &str) -> Result<()> {
    let services = build_services(config).await?;
    let report = services
        .pipeline
        .evidence(&QuestionRequest::new(company_id, question))
        .await?;

    println!("evidence for \"{}\"", question.trim());
    println!("  retrieved: {}", report.retrieved);
    println!("  reranked: {}", report.evidence.len());
    println!("  above threshold: {}", report.accepted);

    if report.evidence.is_empty() {
        println!("No results.");
        return Ok(());
    }
    println!();
    for (i, e) in report.evidence.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} | chunk {} (retrieval #{})",
            i + 1,
            e.relevance_score,
            e.metadata.doc_name,
            e.metadata.sequence_index,
            e.retrieval_rank + 1
        );
        let excerpt: String = e.text.chars().take(160).collect();
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        println!("    chunk id: {}", e.chunk_id);
    }
    Ok(())
}

pub async fn run_documents(config: &Config, company_id: &str) -> Result<()> {
    let services = build_services(config).await?;
    let documents = services.catalog.list_documents(company_id).await?;

    if documents.is_empty() {
        println!("No documents.");
        return Ok(());
    }
    for d in documents {
        println!(
            "{}  {}  ({} chunks, {} bytes, {})",
            d.id,
            d.doc_name,
            d.chunk_count,
            d.byte_len,
            d.ingested_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}
