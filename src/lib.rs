//! # Policy Harness
//!
//! A local-first, grounded question-answering pipeline over company policy
//! documents.
//!
//! Documents are ingested per company, split into overlapping chunks,
//! embedded and indexed. A question is embedded, matched against that
//! company's chunks only, reranked, and answered by an LLM that is told to
//! use nothing but the retrieved excerpts. When no excerpt is relevant
//! enough, the answer is a fixed refusal and the LLM is never called.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────────────────┐   ┌──────────┐
//! │  Upload  │──▶│ Extract → Chunk → Embed │──▶│  SQLite  │
//! │ PDF/text │   └─────────────────────────┘   │ catalog  │
//! └──────────┘                                 │ + index  │
//!                                              └────┬─────┘
//! ┌──────────┐   ┌─────────────────────────┐        │
//! │ Question │──▶│ Retrieve → Rerank →     │◀───────┘
//! └──────────┘   │ Ground → Generate       │──▶ Answer + sources
//!                └─────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`error`] | Pipeline error taxonomy |
//! | [`extract`] | PDF / text extraction |
//! | [`chunk`] | Overlapping character-window chunking |
//! | [`tokenize`] | Term extraction for the offline embedder and scorer |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector index and document catalog (SQLite, in-memory) |
//! | [`storage`] | Raw document storage |
//! | [`ingest`] | Ingestion pipeline |
//! | [`retrieve`] | Company-scoped nearest-neighbour retrieval |
//! | [`rerank`] | Cross-encoder / lexical reranking |
//! | [`grounding`] | Prompt construction and refusal detection |
//! | [`llm`] | LLM providers |
//! | [`answer`] | Answer assembly |
//! | [`pipeline`] | The question state machine |
//! | [`services`] | Wiring from configuration |
//! | [`commands`] | CLI command implementations |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod answer;
pub mod chunk;
pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod grounding;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod rerank;
pub mod retrieve;
pub mod server;
pub mod services;
pub mod storage;
pub mod store;
pub mod tokenize;
