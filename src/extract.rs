//! Text extraction for uploaded policy documents.
//!
//! PDFs go through `pdf-extract`, one page at a time, with a
//! `--- Page N ---` marker in front of each page so chunks keep a hint of
//! where they came from. Plain-text and Markdown uploads are decoded as UTF-8.
//! Scanned PDFs yield no text (OCR is out of scope); the ingestion pipeline
//! turns that into [`PipelineError::EmptyDocument`].

use std::path::Path;

use crate::error::PipelineError;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";

/// Extracts plain text from document bytes according to their content type.
///
/// This is CPU-bound; async callers should run it on the blocking pool.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, PipelineError> {
    match normalize_content_type(content_type).as_str() {
        MIME_PDF => extract_pdf(bytes),
        MIME_TEXT | MIME_MARKDOWN => String::from_utf8(bytes.to_vec())
            .map_err(|e| PipelineError::Extraction(format!("invalid UTF-8: {}", e))),
        other => Err(PipelineError::UnsupportedContentType(other.to_string())),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, PipelineError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| PipelineError::Extraction(e.to_string()))?;
    Ok(join_pages(&pages))
}

/// Join per-page text with page markers. Pages without text keep their
/// marker only when at least one page has text, so an image-only PDF
/// still comes out empty.
fn join_pages(pages: &[String]) -> String {
    if pages.iter().all(|p| p.trim().is_empty()) {
        return String::new();
    }
    let mut out = String::new();
    for (i, page) in pages.iter().enumerate() {
        out.push_str(&format!("\n\n--- Page {} ---\n", i + 1));
        out.push_str(page);
    }
    out.trim().to_string()
}

/// Strip parameters (`; charset=utf-8`) and lowercase.
pub fn normalize_content_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Guess a content type from a file name's extension.
pub fn content_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(MIME_PDF),
        "txt" => Some(MIME_TEXT),
        "md" | "markdown" => Some(MIME_MARKDOWN),
        _ => None,
    }
}

/// File extension used when storing raw bytes of the given content type.
pub fn extension_for(content_type: &str) -> &'static str {
    match normalize_content_type(content_type).as_str() {
        MIME_PDF => "pdf",
        MIME_MARKDOWN => "md",
        MIME_TEXT => "txt",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_content_type_returns_error() {
        let err = extract_text(b"foo", "application/octet-stream").unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedContentType(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(_)));
    }

    #[test]
    fn plain_text_passes_through() {
        let text = extract_text("Sick leave: 10 days.".as_bytes(), "text/plain; charset=utf-8")
            .unwrap();
        assert_eq!(text, "Sick leave: 10 days.");
    }

    #[test]
    fn invalid_utf8_text_is_extraction_error() {
        let err = extract_text(&[0xff, 0xfe, 0xfd], MIME_TEXT).unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(_)));
    }

    #[test]
    fn page_markers_are_numbered() {
        let joined = join_pages(&["First page".to_string(), "Second page".to_string()]);
        assert!(joined.starts_with("--- Page 1 ---\nFirst page"));
        assert!(joined.contains("--- Page 2 ---\nSecond page"));
    }

    #[test]
    fn image_only_pages_yield_empty_text() {
        assert_eq!(join_pages(&[String::new(), "  \n".to_string()]), "");
    }

    #[test]
    fn content_type_guessing() {
        assert_eq!(content_type_for_path(Path::new("a/handbook.PDF")), Some(MIME_PDF));
        assert_eq!(content_type_for_path(Path::new("notes.md")), Some(MIME_MARKDOWN));
        assert_eq!(content_type_for_path(Path::new("archive.zip")), None);
        assert_eq!(extension_for("Application/PDF"), "pdf");
    }
}
