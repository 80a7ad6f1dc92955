//! Grounded prompt construction and refusal detection.
//!
//! The prompt confines the model to the supplied policy excerpts, tags each
//! excerpt with an `[S<n>]` label the model can cite, and tells the model
//! exactly which sentence to reply with when the excerpts do not answer the
//! question. [`RefusalPolicy`] later recognises that sentence in the output.

use crate::config::GroundingConfig;
use crate::models::RankedEvidence;

/// A partial final excerpt is only worth including above this many chars.
pub const MIN_PARTIAL_BLOCK_CHARS: usize = 200;

const BLOCK_SEPARATOR: &str = "\n---\n";

/// System and user messages for a chat-style model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// A prompt plus the evidence that actually made it into the context.
#[derive(Debug, Clone)]
pub struct GroundedPrompt {
    pub prompt: Prompt,
    /// Evidence present in the prompt, in prompt order.
    pub included: Vec<RankedEvidence>,
}

/// Keep only evidence at or above `min_relevance`, preserving order.
pub fn accept_evidence(evidence: Vec<RankedEvidence>, min_relevance: f32) -> Vec<RankedEvidence> {
    evidence
        .into_iter()
        .filter(|e| e.relevance_score >= min_relevance)
        .collect()
}

pub fn build_prompt(
    question: &str,
    evidence: &[RankedEvidence],
    config: &GroundingConfig,
) -> GroundedPrompt {
    let mut blocks: Vec<String> = Vec::new();
    let mut included = Vec::new();
    let mut used = 0usize;

    for (i, e) in evidence.iter().enumerate() {
        let block = format_block(i + 1, e);
        let len = block.chars().count();
        if used + len > config.max_context_chars {
            let remaining = config.max_context_chars.saturating_sub(used);
            if remaining > MIN_PARTIAL_BLOCK_CHARS {
                blocks.push(block.chars().take(remaining).collect());
                included.push(e.clone());
            }
            break;
        }
        blocks.push(block);
        included.push(e.clone());
        used += len;
    }

    let system = format!(
        "You are a company policy assistant.\n\
         You MUST answer strictly using the provided policy context.\n\
         Do NOT invent policy details.\n\
         If the policy context does not clearly contain the answer, reply with exactly:\n\
         \x20 '{}'\n\
         and suggest contacting HR / the policy owner.\n\
         When you provide an answer, reference the relevant source labels such as [S1].",
        config.refusal_message
    );

    let user = format!(
        "Company Policy Context:\n{}\n\n\
         Employee Question:\n{}\n\n\
         Instructions:\n\
         - Answer using ONLY the Company Policy Context.\n\
         - If the answer is not clearly present, reply with: {}\n\
         - Include 1-3 short citations like [S1].",
        blocks.join(BLOCK_SEPARATOR).trim(),
        question.trim(),
        config.refusal_message
    );

    GroundedPrompt {
        prompt: Prompt { system, user },
        included,
    }
}

fn format_block(label: usize, e: &RankedEvidence) -> String {
    let mut header = format!(
        "[S{}] {} | chunk {}",
        label, e.metadata.doc_name, e.metadata.sequence_index
    );
    if !e.metadata.source_file.is_empty() {
        header.push_str(&format!(" | file {}", e.metadata.source_file));
    }
    format!("{}\n{}\n", header, e.text.trim())
}

/// Decides whether generated text is the model declining to answer.
pub trait RefusalPolicy: Send + Sync {
    fn is_refusal(&self, generated: &str) -> bool;
}

/// Substring match against known refusal phrases, ignoring case,
/// whitespace runs and curly apostrophes.
#[derive(Debug, Clone)]
pub struct MarkerRefusalPolicy {
    markers: Vec<String>,
}

impl MarkerRefusalPolicy {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let markers = markers
            .into_iter()
            .map(|m| canonical(m.as_ref()))
            .filter(|m| !m.is_empty())
            .collect();
        Self { markers }
    }

    /// The configured refusal sentence plus any extra markers.
    pub fn from_config(config: &GroundingConfig) -> Self {
        Self::new(
            std::iter::once(config.refusal_message.as_str())
                .chain(config.refusal_markers.iter().map(String::as_str)),
        )
    }
}

impl RefusalPolicy for MarkerRefusalPolicy {
    fn is_refusal(&self, generated: &str) -> bool {
        let text = canonical(generated);
        self.markers.iter().any(|m| text.contains(m.as_str()))
    }
}

fn canonical(s: &str) -> String {
    s.replace(['\u{2019}', '\u{2018}'], "'")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .trim_matches(|c: char| c == '\'' || c == '"' || c == '.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_REFUSAL_MESSAGE;
    use crate::models::ChunkMetadata;

    fn evidence(id: &str, text: &str, score: f32, seq: usize) -> RankedEvidence {
        RankedEvidence {
            chunk_id: id.to_string(),
            text: text.to_string(),
            metadata: ChunkMetadata {
                company_id: "acme".to_string(),
                document_id: "d1".to_string(),
                doc_name: "Employee Handbook".to_string(),
                sequence_index: seq,
                char_start: 0,
                char_end: text.chars().count(),
                source_file: "handbook.pdf".to_string(),
            },
            relevance_score: score,
            retrieval_rank: seq,
        }
    }

    #[test]
    fn prompt_tags_sources_and_carries_refusal_instruction() {
        let ev = vec![
            evidence("a", "Employees receive 10 paid sick days per year.", 0.9, 3),
            evidence("b", "Sick days do not roll over.", 0.7, 4),
        ];
        let gp = build_prompt("How many sick days do I get?", &ev, &GroundingConfig::default());
        assert!(gp
            .prompt
            .user
            .contains("[S1] Employee Handbook | chunk 3 | file handbook.pdf\nEmployees receive 10"));
        assert!(gp.prompt.user.contains("[S2] Employee Handbook | chunk 4"));
        assert!(gp.prompt.user.contains("How many sick days do I get?"));
        assert!(gp.prompt.system.contains(DEFAULT_REFUSAL_MESSAGE));
        assert!(gp.prompt.system.contains("strictly"));
        assert_eq!(gp.included.len(), 2);
    }

    #[test]
    fn budget_drops_blocks_that_do_not_fit() {
        let long = "x".repeat(500);
        let ev = vec![
            evidence("a", &long, 0.9, 0),
            evidence("b", &long, 0.8, 1),
            evidence("c", &long, 0.7, 2),
        ];
        let config = GroundingConfig {
            max_context_chars: 1200,
            ..GroundingConfig::default()
        };
        let gp = build_prompt("q", &ev, &config);
        // two full blocks (554 chars each) fit; 92 remain, too few for a partial
        let ids: Vec<&str> = gp.included.iter().map(|e| e.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(!gp.prompt.user.contains("[S3]"));
    }

    #[test]
    fn budget_admits_partial_final_block() {
        let ev = vec![
            evidence("a", &"x".repeat(500), 0.9, 0),
            evidence("b", &"y".repeat(900), 0.8, 1),
        ];
        let config = GroundingConfig {
            max_context_chars: 1000,
            ..GroundingConfig::default()
        };
        let gp = build_prompt("q", &ev, &config);
        assert_eq!(gp.included.len(), 2);
        assert!(gp.prompt.user.contains("[S2]"));
        assert!(!gp.prompt.user.contains(&"y".repeat(900)));
    }

    #[test]
    fn acceptance_threshold_filters_low_scores() {
        let ev = vec![
            evidence("a", "t", 0.9, 0),
            evidence("b", "t", 0.05, 1),
            evidence("c", "t", 0.5, 2),
        ];
        let kept = accept_evidence(ev, 0.5);
        let ids: Vec<&str> = kept.iter().map(|e| e.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn marker_policy_ignores_case_and_spacing() {
        let policy = MarkerRefusalPolicy::from_config(&GroundingConfig::default());
        assert!(policy.is_refusal(
            "I CAN'T find this   explicitly in the provided\npolicy documents. Please contact HR."
        ));
        assert!(policy.is_refusal(
            "I can\u{2019}t find this explicitly in the provided policy documents."
        ));
        assert!(!policy.is_refusal("Employees receive 10 paid sick days per year [S1]."));
    }

    #[test]
    fn extra_markers_are_honoured() {
        let config = GroundingConfig {
            refusal_markers: vec!["Not covered by policy".to_string()],
            ..GroundingConfig::default()
        };
        let policy = MarkerRefusalPolicy::from_config(&config);
        assert!(policy.is_refusal("Sorry, this is not covered by policy."));
    }
}
