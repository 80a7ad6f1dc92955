//! Turns generated text and the evidence behind it into an [`Answer`].

use crate::config::GroundingConfig;
use crate::grounding::RefusalPolicy;
use crate::models::{Answer, RankedEvidence, Source};

/// Longest excerpt attached to a source, in characters.
const EXCERPT_CHARS: usize = 300;

/// Build the final answer for generated text.
///
/// A refusal (or empty output) carries no sources, even when evidence was
/// supplied to the model: nothing it said can be attributed.
pub fn assemble(
    question: &str,
    generated_text: &str,
    included: &[RankedEvidence],
    refusal: &dyn RefusalPolicy,
) -> Answer {
    let text = generated_text.trim();
    if text.is_empty() || refusal.is_refusal(text) {
        return Answer {
            question: question.to_string(),
            answer_text: text.to_string(),
            sources: Vec::new(),
            refused: true,
            confidence: None,
        };
    }

    let sources: Vec<Source> = included.iter().map(to_source).collect();
    let confidence = sources
        .iter()
        .map(|s| s.relevance_score)
        .fold(None, |best: Option<f32>, s| Some(best.map_or(s, |b| b.max(s))));

    Answer {
        question: question.to_string(),
        answer_text: text.to_string(),
        sources,
        refused: false,
        confidence,
    }
}

/// The deterministic refusal returned when no evidence survives.
pub fn grounded_refusal(question: &str, config: &GroundingConfig) -> Answer {
    Answer {
        question: question.to_string(),
        answer_text: config.refusal_message.clone(),
        sources: Vec::new(),
        refused: true,
        confidence: None,
    }
}

fn to_source(e: &RankedEvidence) -> Source {
    let trimmed = e.text.trim();
    let mut excerpt: String = trimmed.chars().take(EXCERPT_CHARS).collect();
    if trimmed.chars().count() > EXCERPT_CHARS {
        excerpt.push('…');
    }
    Source {
        document_id: e.metadata.document_id.clone(),
        chunk_id: e.chunk_id.clone(),
        doc_name: e.metadata.doc_name.clone(),
        sequence_index: e.metadata.sequence_index,
        excerpt,
        relevance_score: e.relevance_score,
    }
}
