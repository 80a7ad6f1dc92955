use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::grounding::MIN_PARTIAL_BLOCK_CHARS;

/// Refusal sentence the model is told to use, and the default refusal text.
pub const DEFAULT_REFUSAL_MESSAGE: &str =
    "I can't find this explicitly in the provided policy documents.";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub grounding: GroundingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_raw_dir")]
    pub raw_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            raw_dir: default_raw_dir(),
        }
    }
}

fn default_raw_dir() -> PathBuf {
    PathBuf::from("./data/raw")
}

/// Character-window chunking parameters.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1200
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_document_bytes: default_max_document_bytes(),
        }
    }
}

fn default_max_document_bytes() -> usize {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankerConfig {
    #[serde(default = "default_reranker_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            provider: default_reranker_provider(),
            model: None,
        }
    }
}

fn default_reranker_provider() -> String {
    "local".to_string()
}

/// Retrieve-wide / rerank-narrow parameters.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RetrievalConfig {
    /// Candidates fetched from the vector index.
    #[serde(default = "default_retrieve_n")]
    pub retrieve_n: usize,
    /// Evidence kept after reranking.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Reranker scores below this are not accepted as evidence. Both scorers
    /// return scores in `[0, 1]`, so this must be positive for unrelated
    /// questions to be refused.
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            retrieve_n: default_retrieve_n(),
            top_k: default_top_k(),
            min_relevance: default_min_relevance(),
        }
    }
}

fn default_retrieve_n() -> usize {
    25
}
fn default_top_k() -> usize {
    5
}
fn default_min_relevance() -> f32 {
    0.1
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct GroundingConfig {
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_refusal_message")]
    pub refusal_message: String,
    /// Extra phrases that mark a generated answer as a refusal.
    #[serde(default)]
    pub refusal_markers: Vec<String>,
}

impl Default for GroundingConfig {
    fn default() -> Self {
        Self {
            max_context_chars: default_max_context_chars(),
            refusal_message: default_refusal_message(),
            refusal_markers: Vec::new(),
        }
    }
}

fn default_max_context_chars() -> usize {
    12000
}
fn default_refusal_message() -> String {
    DEFAULT_REFUSAL_MESSAGE.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            url: None,
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_provider() -> String {
    "ollama".to_string()
}
fn default_llm_model() -> String {
    "llama3:8b".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl EmbeddingConfig {
    /// Vector dimensionality: configured value or the known size of the model.
    pub fn resolved_dims(&self) -> Option<usize> {
        self.dims.or_else(|| match self.provider.as_str() {
            "hash" => Some(256),
            "local" => Some(match self.model.as_deref().unwrap_or("bge-small-en-v1.5") {
                "bge-base-en-v1.5" | "nomic-embed-text-v1.5" => 768,
                "bge-large-en-v1.5" => 1024,
                _ => 384,
            }),
            _ => None,
        })
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    validate_chunking(&config.chunking)?;

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.retrieve_n < config.retrieval.top_k {
        anyhow::bail!("retrieval.retrieve_n must be >= retrieval.top_k");
    }
    if !config.retrieval.min_relevance.is_finite() {
        anyhow::bail!("retrieval.min_relevance must be a finite number");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "local" | "hash" => {}
        "ollama" | "openai" => {
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be local, ollama, openai, or hash.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    match config.reranker.provider.as_str() {
        "local" | "lexical" => {}
        other => anyhow::bail!(
            "Unknown reranker provider: '{}'. Must be local or lexical.",
            other
        ),
    }

    match config.llm.provider.as_str() {
        "ollama" | "openai" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be ollama, openai, or disabled.",
            other
        ),
    }
    if config.llm.timeout_secs == 0 {
        anyhow::bail!("llm.timeout_secs must be > 0");
    }

    if config.grounding.max_context_chars <= MIN_PARTIAL_BLOCK_CHARS {
        anyhow::bail!(
            "grounding.max_context_chars must be > {}",
            MIN_PARTIAL_BLOCK_CHARS
        );
    }
    if config.grounding.refusal_message.trim().is_empty() {
        anyhow::bail!("grounding.refusal_message must not be empty");
    }

    Ok(())
}

pub fn validate_chunking(chunking: &ChunkingConfig) -> Result<()> {
    if chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if chunking.overlap >= chunking.chunk_size {
        anyhow::bail!("chunking.overlap must be smaller than chunking.chunk_size");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = parse("[db]\npath = \"./x.sqlite\"\n").unwrap();
        assert_eq!(cfg.chunking.chunk_size, 1200);
        assert_eq!(cfg.chunking.overlap, 200);
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.retrieval.retrieve_n, 25);
        assert!(cfg.retrieval.min_relevance > 0.0);
        assert_eq!(cfg.retrieval, RetrievalConfig::default());
        assert_eq!(cfg.grounding.refusal_message, DEFAULT_REFUSAL_MESSAGE);
        assert_eq!(cfg.llm.model, "llama3:8b");
        assert_eq!(cfg.embedding.resolved_dims(), Some(384));
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let err = parse("[db]\npath = \"x\"\n[chunking]\nchunk_size = 100\noverlap = 100\n")
            .unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn context_budget_must_fit_a_partial_block() {
        let err = parse("[db]\npath = \"x\"\n[grounding]\nmax_context_chars = 50\n").unwrap_err();
        assert!(err.to_string().contains("max_context_chars"));
        assert!(parse("[db]\npath = \"x\"\n[grounding]\nmax_context_chars = 201\n").is_ok());
    }

    #[test]
    fn retrieve_n_must_cover_top_k() {
        let err = parse("[db]\npath = \"x\"\n[retrieval]\nretrieve_n = 3\ntop_k = 5\n").unwrap_err();
        assert!(err.to_string().contains("retrieve_n"));
    }

    #[test]
    fn remote_embedding_requires_model_and_dims() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"ollama\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn unknown_providers_rejected() {
        assert!(parse("[db]\npath = \"x\"\n[llm]\nprovider = \"gpt5\"\n").is_err());
        assert!(parse("[db]\npath = \"x\"\n[reranker]\nprovider = \"magic\"\n").is_err());
    }

    #[test]
    fn example_config_is_valid() {
        let cfg = parse(include_str!("../config/policy.example.toml")).unwrap();
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.llm.provider, "ollama");
        assert_eq!(cfg.server.bind, "127.0.0.1:8000");
    }
}
