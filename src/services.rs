//! Wiring: builds the ingestion and question pipelines from [`Config`].
//!
//! [`build_services`] opens the SQLite store and creates the configured
//! embedder, scorer and generator. [`Services::assemble`] accepts any
//! adapters, which is how tests and embedders of this crate swap in their
//! own implementations.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, Embedder};
use crate::grounding::{MarkerRefusalPolicy, RefusalPolicy};
use crate::ingest::Ingestor;
use crate::llm::{create_generator, Generator};
use crate::pipeline::QaPipeline;
use crate::rerank::{create_scorer, RelevanceScorer};
use crate::storage::RawStore;
use crate::store::sqlite::SqliteStore;
use crate::store::{DocumentCatalog, VectorIndex};

/// Adapters for both pipelines.
pub struct Adapters {
    pub embedder: Arc<dyn Embedder>,
    pub index: Arc<dyn VectorIndex>,
    pub catalog: Arc<dyn DocumentCatalog>,
    pub scorer: Arc<dyn RelevanceScorer>,
    pub generator: Arc<dyn Generator>,
    pub refusal: Arc<dyn RefusalPolicy>,
}

/// Everything the CLI and HTTP server need, shareable across tasks.
#[derive(Clone)]
pub struct Services {
    pub ingestor: Arc<Ingestor>,
    pub pipeline: Arc<QaPipeline>,
    pub catalog: Arc<dyn DocumentCatalog>,
}

impl Services {
    pub fn assemble(config: &Config, adapters: Adapters) -> Self {
        let ingestor = Ingestor::new(
            adapters.embedder.clone(),
            adapters.index.clone(),
            adapters.catalog.clone(),
            RawStore::new(&config.storage.raw_dir),
        )
        .with_chunking(config.chunking.clone())
        .with_batch_size(config.embedding.batch_size)
        .with_max_document_bytes(config.ingest.max_document_bytes);

        let pipeline = QaPipeline::new(
            adapters.embedder,
            adapters.index,
            adapters.scorer,
            adapters.generator,
            adapters.refusal,
            config.retrieval.clone(),
            config.grounding.clone(),
            Duration::from_secs(config.llm.timeout_secs),
        );

        Self {
            ingestor: Arc::new(ingestor),
            pipeline: Arc::new(pipeline),
            catalog: adapters.catalog,
        }
    }
}

/// Open the configured database and create every adapter from config.
///
/// The schema must already exist (`policy init`).
pub async fn build_services(config: &Config) -> Result<Services> {
    let pool = db::connect(config)
        .await
        .with_context(|| format!("opening database {}", config.db.path.display()))?;
    let store = Arc::new(SqliteStore::new(pool));

    let embedder = create_embedder(&config.embedding).context("creating embedder")?;
    let scorer = create_scorer(&config.reranker).context("creating reranker")?;
    let generator = create_generator(&config.llm).context("creating generator")?;

    tracing::debug!(
        embedder = embedder.model_name(),
        dims = embedder.dims(),
        reranker = scorer.name(),
        llm = generator.model_name(),
        "services ready"
    );

    Ok(Services::assemble(
        config,
        Adapters {
            embedder,
            index: store.clone(),
            catalog: store,
            scorer,
            generator,
            refusal: Arc::new(MarkerRefusalPolicy::from_config(&config.grounding)),
        },
    ))
}
