//! Second-stage reranking of retrieval candidates.
//!
//! Retrieval casts a wide net by embedding similarity; a [`RelevanceScorer`]
//! then judges each `(question, passage)` pair directly and the best `k`
//! survive as [`RankedEvidence`].
//!
//! | Scorer | Backing |
//! |--------|---------|
//! | [`CrossEncoderScorer`] | fastembed `TextRerank` cross-encoder (feature `local-models`) |
//! | [`LexicalScorer`] | fraction of question terms present in the passage |

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::RerankerConfig;
use crate::error::{PipelineError, Stage};
use crate::models::{Candidate, RankedEvidence};
use crate::tokenize::terms;

/// Scores passages against a question; one score per passage, input order.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    fn name(&self) -> &str;
    async fn score(&self, question: &str, passages: &[String]) -> Result<Vec<f32>>;
}

/// Rerank `candidates` and keep the best `k`.
///
/// Sorting is stable, so equal scores keep retrieval order. The result is
/// identical for identical inputs as long as the scorer is deterministic.
pub async fn rerank(
    scorer: &dyn RelevanceScorer,
    question: &str,
    candidates: Vec<Candidate>,
    k: usize,
) -> Result<Vec<RankedEvidence>, PipelineError> {
    if candidates.is_empty() || k == 0 {
        return Ok(Vec::new());
    }

    let passages: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
    let scores = scorer
        .score(question, &passages)
        .await
        .map_err(|e| PipelineError::at(Stage::QueryRerank, format!("{:#}", e)))?;

    if scores.len() != candidates.len() {
        return Err(PipelineError::at(
            Stage::QueryRerank,
            format!(
                "scorer {} returned {} scores for {} passages",
                scorer.name(),
                scores.len(),
                candidates.len()
            ),
        ));
    }
    if scores.iter().any(|s| s.is_nan()) {
        return Err(PipelineError::at(
            Stage::QueryRerank,
            format!("scorer {} returned NaN", scorer.name()),
        ));
    }

    let mut ranked: Vec<RankedEvidence> = candidates
        .into_iter()
        .zip(scores)
        .enumerate()
        .map(|(retrieval_rank, (c, relevance_score))| RankedEvidence {
            chunk_id: c.chunk_id,
            text: c.text,
            metadata: c.metadata,
            relevance_score,
            retrieval_rank,
        })
        .collect();

    ranked.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
    ranked.truncate(k);
    Ok(ranked)
}

/// Create the [`RelevanceScorer`] selected by `[reranker].provider`.
pub fn create_scorer(config: &RerankerConfig) -> Result<Arc<dyn RelevanceScorer>> {
    match config.provider.as_str() {
        #[cfg(feature = "local-models")]
        "local" => Ok(Arc::new(CrossEncoderScorer::new(config.model.as_deref())?)),
        #[cfg(not(feature = "local-models"))]
        "local" => bail!("Local reranker requires --features local-models"),
        "lexical" => Ok(Arc::new(LexicalScorer)),
        other => bail!("Unknown reranker provider: {}", other),
    }
}

// ============ Lexical ============

/// Deterministic term-coverage scorer.
///
/// Score is the fraction of distinct question terms that occur in the
/// passage, in `[0, 1]`. A question made only of stopwords scores 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalScorer;

impl LexicalScorer {
    pub fn score_one(question_terms: &[String], passage: &str) -> f32 {
        if question_terms.is_empty() {
            return 0.0;
        }
        let passage_terms = terms(passage);
        let hits = question_terms
            .iter()
            .filter(|t| passage_terms.contains(t))
            .count();
        hits as f32 / question_terms.len() as f32
    }
}

#[async_trait]
impl RelevanceScorer for LexicalScorer {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn score(&self, question: &str, passages: &[String]) -> Result<Vec<f32>> {
        let mut q = terms(question);
        q.sort();
        q.dedup();
        Ok(passages
            .iter()
            .map(|p| LexicalScorer::score_one(&q, p))
            .collect())
    }
}

// ============ Cross-encoder ============

#[cfg(feature = "local-models")]
pub use cross_encoder::CrossEncoderScorer;

#[cfg(feature = "local-models")]
mod cross_encoder {
    use std::sync::{Arc, Mutex};

    use anyhow::{anyhow, bail, Result};
    use async_trait::async_trait;

    use super::RelevanceScorer;

    /// Cross-encoder reranker run in-process through fastembed.
    ///
    /// Raw logits are mapped through the logistic function so scores fall in
    /// `(0, 1)` and `retrieval.min_relevance` reads as a probability.
    pub struct CrossEncoderScorer {
        model_name: String,
        model: Arc<Mutex<Option<fastembed::TextRerank>>>,
    }

    impl CrossEncoderScorer {
        pub fn new(model: Option<&str>) -> Result<Self> {
            let model_name = model.unwrap_or("bge-reranker-base").to_string();
            to_fastembed_model(&model_name)?;
            Ok(Self {
                model_name,
                model: Arc::new(Mutex::new(None)),
            })
        }
    }

    fn to_fastembed_model(name: &str) -> Result<fastembed::RerankerModel> {
        match name {
            "bge-reranker-base" => Ok(fastembed::RerankerModel::BGERerankerBase),
            "bge-reranker-v2-m3" => Ok(fastembed::RerankerModel::BGERerankerV2M3),
            "jina-reranker-v1-turbo-en" => Ok(fastembed::RerankerModel::JINARerankerV1TurboEn),
            other => bail!(
                "Unknown local reranker model: '{}'. Supported models: \
                 bge-reranker-base, bge-reranker-v2-m3, jina-reranker-v1-turbo-en",
                other
            ),
        }
    }

    fn logistic(x: f32) -> f32 {
        1.0 / (1.0 + (-x).exp())
    }

    #[async_trait]
    impl RelevanceScorer for CrossEncoderScorer {
        fn name(&self) -> &str {
            &self.model_name
        }

        async fn score(&self, question: &str, passages: &[String]) -> Result<Vec<f32>> {
            let model = self.model.clone();
            let model_name = self.model_name.clone();
            let question = question.to_string();
            let passages = passages.to_vec();

            tokio::task::spawn_blocking(move || {
                let mut guard = model
                    .lock()
                    .map_err(|_| anyhow!("reranker model lock poisoned"))?;
                if guard.is_none() {
                    tracing::info!(model = %model_name, "loading local reranker model");
                    let loaded = fastembed::TextRerank::try_new(
                        fastembed::RerankInitOptions::new(to_fastembed_model(&model_name)?)
                            .with_show_download_progress(false),
                    )
                    .map_err(|e| anyhow!("Failed to initialize reranker: {}", e))?;
                    *guard = Some(loaded);
                }
                let reranker = guard
                    .as_mut()
                    .ok_or_else(|| anyhow!("reranker model not loaded"))?;

                let docs: Vec<&str> = passages.iter().map(String::as_str).collect();
                let results = reranker
                    .rerank(question.as_str(), docs, false, None)
                    .map_err(|e| anyhow!("Reranking failed: {}", e))?;

                let mut scores = vec![f32::NAN; passages.len()];
                for r in results {
                    if let Some(slot) = scores.get_mut(r.index) {
                        *slot = logistic(r.score);
                    }
                }
                Ok(scores)
            })
            .await?
        }
    }
}
