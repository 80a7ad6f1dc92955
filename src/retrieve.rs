//! First-stage retrieval: nearest neighbours of the question vector within
//! one company's chunks.

use crate::error::{PipelineError, Stage};
use crate::models::Candidate;
use crate::store::{IndexFilter, VectorIndex};

/// Up to `n` candidates for `company_id`, most similar first.
///
/// A company with no indexed chunks yields an empty list, not an error.
pub async fn retrieve(
    index: &dyn VectorIndex,
    company_id: &str,
    query_vector: &[f32],
    n: usize,
) -> Result<Vec<Candidate>, PipelineError> {
    if company_id.trim().is_empty() {
        return Err(PipelineError::invalid(
            Stage::QueryValidate,
            "company_id must not be empty",
        ));
    }
    if n == 0 {
        return Ok(Vec::new());
    }

    let filter = IndexFilter::company(company_id);
    let mut candidates = index
        .query(query_vector, n, &filter)
        .await
        .map_err(|e| PipelineError::Retrieval(format!("{:#}", e)))?;

    // Backends are trusted to filter, but a foreign chunk must never leave
    // this function.
    let before = candidates.len();
    candidates.retain(|c| filter.matches(&c.metadata));
    if candidates.len() != before {
        tracing::error!(
            company_id,
            dropped = before - candidates.len(),
            "index returned chunks outside the requested company"
        );
    }
    candidates.truncate(n);

    tracing::debug!(company_id, candidates = candidates.len(), "retrieved");
    Ok(candidates)
}
