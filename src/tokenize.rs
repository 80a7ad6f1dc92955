//! Term extraction shared by the hashing embedder and the lexical scorer.
//!
//! Lowercases, splits on anything that is not alphanumeric, drops a short
//! English stopword list and strips a few common suffixes so that "days",
//! "day" and "daily" do not all look unrelated.

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "get",
    "have", "how", "i", "if", "in", "is", "it", "its", "many", "me", "much", "my", "of", "on",
    "or", "our", "should", "so", "that", "the", "their", "there", "this", "to", "us", "was", "we",
    "what", "when", "where", "which", "who", "why", "will", "with", "would", "you", "your",
];

/// Content terms of `text`, in order of appearance (duplicates kept).
pub fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .map(|w| stem(&w))
        .collect()
}

fn stem(word: &str) -> String {
    if word.chars().count() <= 3 {
        return word.to_string();
    }
    for suffix in ["ies", "ing", "ed", "es", "s"] {
        if let Some(base) = word.strip_suffix(suffix) {
            if base.chars().count() >= 3 {
                return if suffix == "ies" {
                    format!("{}y", base)
                } else {
                    base.to_string()
                };
            }
        }
    }
    word.to_string()
}
