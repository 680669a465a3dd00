use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

static NON_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s']").unwrap());
static SENTENCE_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?]\s+").unwrap());
static APOSTROPHE_TRIM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^'+|'+$").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Function words ignored by lexical similarity. Without this, "I value X"
/// and "I value Y" look alike because of "i" and "value"-style glue.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "i", "i'm", "in",
    "is", "it", "its", "me", "my", "of", "on", "or", "so", "that", "the", "this", "to", "we",
    "with", "you", "your",
];

/// Tokenize text into lowercase words.
/// Preserves apostrophes within words (e.g., "don't").
pub fn tokenize(text: &str) -> Vec<String> {
    let cleaned = NON_WORD.replace_all(text, " ");
    cleaned
        .to_lowercase()
        .split_whitespace()
        .map(|t| APOSTROPHE_TRIM.replace_all(t, "").to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Tokens that carry meaning: [`tokenize`] minus stop words.
pub fn content_tokens(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

/// Split text into sentences at sentence-ending punctuation followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut last = 0;

    for m in SENTENCE_END.find_iter(text) {
        let sentence = text[last..m.start() + 1].trim().to_string(); // include the punctuation
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        last = m.end();
    }

    let remainder = text[last..].trim().to_string();
    if !remainder.is_empty() {
        sentences.push(remainder);
    }

    sentences
}

/// Cosine similarity of the term-frequency vectors of two texts, in [0, 1].
/// Texts without content tokens have similarity 0 with everything.
pub fn cosine_similarity(a: &str, b: &str) -> f64 {
    let fa = term_frequencies(a);
    let fb = term_frequencies(b);
    if fa.is_empty() || fb.is_empty() {
        return 0.0;
    }

    let dot: f64 = fa
        .iter()
        .filter_map(|(t, &x)| fb.get(t).map(|&y| x * y))
        .sum();
    let na: f64 = fa.values().map(|x| x * x).sum::<f64>().sqrt();
    let nb: f64 = fb.values().map(|x| x * x).sum::<f64>().sqrt();

    (dot / (na * nb)).clamp(0.0, 1.0)
}

fn term_frequencies(text: &str) -> HashMap<String, f64> {
    let mut freqs = HashMap::new();
    for token in content_tokens(text) {
        *freqs.entry(token).or_insert(0.0) += 1.0;
    }
    freqs
}

/// Lowercase, whitespace-collapsed form used for hashing and comparisons
/// that must ignore formatting.
pub fn normalize(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").to_lowercase()
}

/// SHA-256 hex digest of the normalised text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(text).as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_tokenize() {
        let tokens = tokenize("Hello, world!");
        assert_eq!(tokens, vec!["hello", "world"]);
    }

    #[test]
    fn test_apostrophe_preserved() {
        let tokens = tokenize("Don't stop!");
        assert_eq!(tokens, vec!["don't", "stop"]);
    }

    #[test]
    fn test_content_tokens_drop_stop_words() {
        assert_eq!(
            content_tokens("I value honesty in my work"),
            vec!["value", "honesty", "work"]
        );
    }

    #[test]
    fn test_split_sentences() {
        let s = split_sentences("First one. Second one! Third? Trailing");
        assert_eq!(s, vec!["First one.", "Second one!", "Third?", "Trailing"]);
    }

    #[test]
    fn test_cosine_identical_and_disjoint() {
        let same = cosine_similarity("honesty matters deeply", "Honesty matters deeply.");
        assert!((same - 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity("honesty matters", "quick brown fox"), 0.0);
    }

    #[test]
    fn test_cosine_ignores_stop_words() {
        let s = cosine_similarity("I value honesty", "I value speed");
        let with_glue = cosine_similarity("the honesty", "the speed");
        assert!(s < 0.6, "shared 'value' alone should not look identical: {s}");
        assert_eq!(with_glue, 0.0);
    }

    #[test]
    fn test_cosine_empty_text() {
        assert_eq!(cosine_similarity("", "anything"), 0.0);
        assert_eq!(cosine_similarity("the a an", "the a an"), 0.0);
    }

    #[test]
    fn test_content_hash_ignores_formatting() {
        assert_eq!(
            content_hash("  I value   honesty "),
            content_hash("i value honesty")
        );
        assert_ne!(content_hash("I value honesty"), content_hash("I value speed"));
        assert_eq!(content_hash("x").len(), 64);
    }
}
