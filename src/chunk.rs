//! Overlapping character-window chunker.
//!
//! Splits normalized document text into [`Chunk`]s of at most `chunk_size`
//! characters. Consecutive chunks share exactly `overlap` characters: each
//! chunk starts `overlap` characters before the previous one ended. When a
//! window stops short of the end of the text, its end is pulled back to the
//! last newline (or else space) in the second half of the window so that
//! passages tend to end on a line or word boundary.
//!
//! Chunk text is always the exact slice `[char_start, char_end)` of the
//! normalized text, so dropping the first `overlap` characters of every chunk
//! after the first and concatenating reproduces the text.

use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::error::{PipelineError, Stage};
use crate::models::Chunk;

/// Normalization applied before chunking: CRLF → LF, outer whitespace trimmed.
pub fn normalize_text(text: &str) -> String {
    text.replace("\r\n", "\n").trim().to_string()
}

/// Split text into overlapping chunks with contiguous indices starting at 0.
///
/// # Errors
///
/// - [`PipelineError::EmptyDocument`] if the text is empty after normalization.
/// - [`PipelineError::InvalidInput`] if `overlap >= chunk_size` or `chunk_size == 0`.
pub fn chunk_text(
    document_id: &str,
    company_id: &str,
    text: &str,
    config: &ChunkingConfig,
) -> Result<Vec<Chunk>, PipelineError> {
    if config.chunk_size == 0 {
        return Err(PipelineError::invalid(
            Stage::IngestChunk,
            "chunk_size must be > 0",
        ));
    }
    if config.overlap >= config.chunk_size {
        return Err(PipelineError::invalid(
            Stage::IngestChunk,
            "overlap must be smaller than chunk_size",
        ));
    }

    let normalized = normalize_text(text);
    if normalized.is_empty() {
        return Err(PipelineError::EmptyDocument);
    }

    let chars: Vec<char> = normalized.chars().collect();
    let chunks = chunk_spans(&chars, config.chunk_size, config.overlap)
        .into_iter()
        .enumerate()
        .map(|(index, (start, end))| Chunk {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            company_id: company_id.to_string(),
            sequence_index: index,
            text: chars[start..end].iter().collect(),
            char_start: start,
            char_end: end,
        })
        .collect();

    Ok(chunks)
}

/// Compute `(start, end)` character spans. `chars` must be non-empty and
/// `overlap < chunk_size`.
fn chunk_spans(chars: &[char], chunk_size: usize, overlap: usize) -> Vec<(usize, usize)> {
    let n = chars.len();
    let mut spans = Vec::new();
    let mut start = 0;

    loop {
        let hard_end = (start + chunk_size).min(n);
        let end = if hard_end < n {
            snap_to_boundary(chars, start, hard_end, overlap)
        } else {
            hard_end
        };
        spans.push((start, end));
        if end >= n {
            break;
        }
        start = end - overlap;
    }

    spans
}

/// Move a window end back to just after a newline or space.
///
/// The result stays above `start + overlap` so the next window always makes
/// progress, and within the second half of the window so chunks do not
/// shrink below half the target size.
fn snap_to_boundary(chars: &[char], start: usize, hard_end: usize, overlap: usize) -> usize {
    let floor = (start + overlap + 1).max(start + (hard_end - start) / 2);
    if floor > hard_end {
        return hard_end;
    }
    for sep in ['\n', ' '] {
        if let Some(end) = (floor..=hard_end).rev().find(|&end| chars[end - 1] == sep) {
            return end;
        }
    }
    hard_end
}
