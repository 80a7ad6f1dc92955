//! The question pipeline.
//!
//! ```text
//! RECEIVED → RETRIEVED → RERANKED ─┬─ no accepted evidence ─→ GROUNDED_REFUSAL
//!                                   └─ PROMPTED → GENERATED ─┬─→ ANSWERED
//!                                                             └─ MODEL_REFUSAL → ANSWERED
//! ```
//!
//! The LLM is only called when at least one piece of evidence clears the
//! relevance threshold and fits the context budget. Nothing is retried; each
//! stage's failure surfaces as a [`PipelineError`] naming that stage.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::answer::{assemble, grounded_refusal};
use crate::config::{GroundingConfig, RetrievalConfig};
use crate::embedding::{embed_query, Embedder};
use crate::error::{PipelineError, Stage};
use crate::grounding::{accept_evidence, build_prompt, RefusalPolicy};
use crate::llm::Generator;
use crate::models::{Answer, RankedEvidence};
use crate::rerank::{rerank, RelevanceScorer};
use crate::retrieve::retrieve;
use crate::store::VectorIndex;

/// Lifecycle of one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionState {
    Received,
    Retrieved,
    Reranked,
    GroundedRefusal,
    Prompted,
    Generated,
    ModelRefusal,
    Answered,
}

impl fmt::Display for QuestionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QuestionState::Received => "RECEIVED",
            QuestionState::Retrieved => "RETRIEVED",
            QuestionState::Reranked => "RERANKED",
            QuestionState::GroundedRefusal => "GROUNDED_REFUSAL",
            QuestionState::Prompted => "PROMPTED",
            QuestionState::Generated => "GENERATED",
            QuestionState::ModelRefusal => "MODEL_REFUSAL",
            QuestionState::Answered => "ANSWERED",
        };
        f.write_str(s)
    }
}

/// Per-call tuning; unset fields fall back to configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub retrieve_n: Option<usize>,
    pub top_k: Option<usize>,
    pub min_relevance: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct QuestionRequest {
    pub company_id: String,
    pub question: String,
    pub overrides: Overrides,
}

impl QuestionRequest {
    pub fn new(company_id: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            company_id: company_id.into(),
            question: question.into(),
            overrides: Overrides::default(),
        }
    }
}

/// Evidence for a question without generation.
#[derive(Debug, Clone)]
pub struct EvidenceReport {
    pub retrieved: usize,
    pub evidence: Vec<RankedEvidence>,
    /// Evidence clearing the relevance threshold.
    pub accepted: usize,
}

pub struct QaPipeline {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    scorer: Arc<dyn RelevanceScorer>,
    generator: Arc<dyn Generator>,
    refusal: Arc<dyn RefusalPolicy>,
    retrieval: RetrievalConfig,
    grounding: GroundingConfig,
    generation_timeout: Duration,
}

struct Resolved {
    retrieve_n: usize,
    top_k: usize,
    min_relevance: f32,
}

impl QaPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        scorer: Arc<dyn RelevanceScorer>,
        generator: Arc<dyn Generator>,
        refusal: Arc<dyn RefusalPolicy>,
        retrieval: RetrievalConfig,
        grounding: GroundingConfig,
        generation_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            index,
            scorer,
            generator,
            refusal,
            retrieval,
            grounding,
            generation_timeout,
        }
    }

    pub fn grounding(&self) -> &GroundingConfig {
        &self.grounding
    }

    pub async fn answer(&self, request: &QuestionRequest) -> Result<Answer, PipelineError> {
        let (question, params) = self.validate(request)?;
        let company_id = request.company_id.trim();

        let (_, ranked) = self.gather(company_id, question, &params).await?;
        let accepted = accept_evidence(ranked, params.min_relevance);

        if accepted.is_empty() {
            transition(company_id, QuestionState::GroundedRefusal);
            tracing::info!(company_id, refused = true, "no evidence above threshold");
            return Ok(grounded_refusal(question, &self.grounding));
        }

        let grounded = build_prompt(question, &accepted, &self.grounding);
        if grounded.included.is_empty() {
            transition(company_id, QuestionState::GroundedRefusal);
            tracing::warn!(
                company_id,
                max_context_chars = self.grounding.max_context_chars,
                "no evidence fits the context budget"
            );
            return Ok(grounded_refusal(question, &self.grounding));
        }
        transition(company_id, QuestionState::Prompted);
        tracing::debug!(
            company_id,
            included = grounded.included.len(),
            model = self.generator.model_name(),
            "calling generator"
        );

        let generated = tokio::time::timeout(
            self.generation_timeout,
            self.generator.generate(&grounded.prompt),
        )
        .await
        .map_err(|_| PipelineError::GenerationTimeout {
            after: self.generation_timeout,
        })??;
        transition(company_id, QuestionState::Generated);

        let answer = assemble(question, &generated, &grounded.included, self.refusal.as_ref());
        if answer.refused {
            transition(company_id, QuestionState::ModelRefusal);
        }
        transition(company_id, QuestionState::Answered);

        tracing::info!(
            company_id,
            refused = answer.refused,
            sources = answer.sources.len(),
            confidence = answer.confidence.unwrap_or_default(),
            "question answered"
        );
        Ok(answer)
    }

    /// Retrieve and rerank only; no generation.
    pub async fn evidence(&self, request: &QuestionRequest) -> Result<EvidenceReport, PipelineError> {
        let (question, params) = self.validate(request)?;
        let company_id = request.company_id.trim();

        let (retrieved, evidence) = self.gather(company_id, question, &params).await?;
        let accepted = evidence
            .iter()
            .filter(|e| e.relevance_score >= params.min_relevance)
            .count();

        Ok(EvidenceReport {
            retrieved,
            evidence,
            accepted,
        })
    }

    async fn gather(
        &self,
        company_id: &str,
        question: &str,
        params: &Resolved,
    ) -> Result<(usize, Vec<RankedEvidence>), PipelineError> {
        transition(company_id, QuestionState::Received);

        let query_vector = embed_query(self.embedder.as_ref(), question)
            .await
            .map_err(|e| PipelineError::at(Stage::QueryEmbed, format!("{:#}", e)))?;
        let candidates =
            retrieve(self.index.as_ref(), company_id, &query_vector, params.retrieve_n).await?;
        let retrieved = candidates.len();
        transition(company_id, QuestionState::Retrieved);

        let ranked = rerank(self.scorer.as_ref(), question, candidates, params.top_k).await?;
        transition(company_id, QuestionState::Reranked);
        Ok((retrieved, ranked))
    }

    fn validate<'a>(
        &self,
        request: &'a QuestionRequest,
    ) -> Result<(&'a str, Resolved), PipelineError> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(PipelineError::invalid(
                Stage::QueryValidate,
                "question must not be empty",
            ));
        }
        if request.company_id.trim().is_empty() {
            return Err(PipelineError::invalid(
                Stage::QueryValidate,
                "company_id must not be empty",
            ));
        }

        let top_k = request.overrides.top_k.unwrap_or(self.retrieval.top_k);
        let retrieve_n = request
            .overrides
            .retrieve_n
            .unwrap_or(self.retrieval.retrieve_n);
        let min_relevance = request
            .overrides
            .min_relevance
            .unwrap_or(self.retrieval.min_relevance);

        if top_k == 0 {
            return Err(PipelineError::invalid(Stage::QueryValidate, "top_k must be >= 1"));
        }
        if retrieve_n < top_k {
            return Err(PipelineError::invalid(
                Stage::QueryValidate,
                "retrieve_n must be >= top_k",
            ));
        }
        if !min_relevance.is_finite() {
            return Err(PipelineError::invalid(
                Stage::QueryValidate,
                "min_relevance must be a finite number",
            ));
        }

        Ok((
            question,
            Resolved {
                retrieve_n,
                top_k,
                min_relevance,
            },
        ))
    }
}

fn transition(company_id: &str, state: QuestionState) {
    tracing::debug!(company_id, state = %state, "question state");
}
