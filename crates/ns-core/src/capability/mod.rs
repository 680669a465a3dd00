//! Classification capability: the narrow interface every pipeline stage uses
//! to reach a language model (or a stand-in for one).
//!
//! Providers implement [`Capability`]. Pipeline code never calls a provider
//! directly; it goes through [`ReliableCapability`], which adds timeouts,
//! bounded retries with corrective re-prompting, and turns exhausted retries
//! into `None` instead of an error.

pub mod fixture;
pub mod lexical;
pub mod prompt;
pub mod reliable;

use std::time::Duration;

use async_trait::async_trait;

pub use fixture::FixtureProvider;
pub use lexical::LexicalProvider;
pub use reliable::{ReliableCapability, RetryPolicy};

pub type CapabilityResult<T> = Result<T, CapabilityError>;

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("capability call timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("operation not supported by provider: {0}")]
    Unsupported(String),
}

impl CapabilityError {
    /// Retrying cannot change the answer.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}

/// What a classification call decides.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClassifyTask {
    IdentityBearing,
    Dimension,
    Stance,
    Importance,
}

impl ClassifyTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IdentityBearing => "identity-bearing",
            Self::Dimension => "dimension",
            Self::Stance => "stance",
            Self::Importance => "importance",
        }
    }
}

/// What a free-text generation call produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GenerateTask {
    Generalize,
    Tension,
    CanonicalForms,
}

impl GenerateTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generalize => "generalize",
            Self::Tension => "tension",
            Self::CanonicalForms => "canonical-forms",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClassifyRequest {
    pub task: ClassifyTask,
    /// Raw text being classified, for providers that do not read prompts.
    pub subject: String,
    pub categories: Vec<String>,
    /// Rendered prompt with the subject already delimited.
    pub prompt: String,
}

#[derive(Clone, Debug)]
pub struct GenerateRequest {
    pub task: GenerateTask,
    pub subjects: Vec<String>,
    pub prompt: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    /// `None` when the provider answered outside the allowed categories.
    pub category: Option<String>,
    pub confidence: f64,
}

impl Classification {
    pub fn new(category: impl Into<String>, confidence: f64) -> Self {
        Self {
            category: Some(category.into()),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn unmatched() -> Self {
        Self {
            category: None,
            confidence: 0.0,
        }
    }
}

/// A text classification / generation / similarity backend.
#[async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `generate` can serve `task` at all. Callers skip unsupported
    /// tasks instead of counting them as degraded.
    fn supports(&self, _task: GenerateTask) -> bool {
        true
    }

    async fn classify(&self, request: ClassifyRequest) -> CapabilityResult<Classification>;

    async fn generate(&self, request: GenerateRequest) -> CapabilityResult<String>;

    /// Semantic similarity of two texts in [0, 1].
    async fn compare(&self, a: &str, b: &str) -> CapabilityResult<f64>;
}

/// Map a free-text answer onto one of `categories`.
///
/// An exact match (ignoring case, surrounding punctuation and quotes) wins;
/// otherwise the answer must mention exactly one category as a whole word.
pub fn match_category(answer: &str, categories: &[String]) -> Option<String> {
    let cleaned = answer
        .trim()
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '-')
        .to_lowercase();

    if let Some(exact) = categories.iter().find(|c| c.to_lowercase() == cleaned) {
        return Some(exact.clone());
    }

    let words: Vec<&str> = cleaned
        .split(|c: char| !(c.is_alphanumeric() || c == '-'))
        .filter(|w| !w.is_empty())
        .collect();
    let mut hits = categories
        .iter()
        .filter(|c| words.contains(&c.to_lowercase().as_str()));
    match (hits.next(), hits.next()) {
        (Some(only), None) => Some(only.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cats(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_match_category_exact() {
        let c = cats(&["assert", "deny", "question"]);
        assert_eq!(match_category("  Deny. ", &c), Some("deny".into()));
        assert_eq!(match_category("\"question\"", &c), Some("question".into()));
    }

    #[test]
    fn test_match_category_single_mention() {
        let c = cats(&["identity-core", "voice-presence"]);
        assert_eq!(
            match_category("The answer is voice-presence because of tone", &c),
            Some("voice-presence".into())
        );
    }

    #[test]
    fn test_match_category_ambiguous_or_missing() {
        let c = cats(&["yes", "no"]);
        assert_eq!(match_category("yes and no", &c), None);
        assert_eq!(match_category("perhaps", &c), None);
    }

    #[test]
    fn test_unsupported_is_permanent() {
        assert!(CapabilityError::Unsupported("x".into()).is_permanent());
        assert!(!CapabilityError::Provider("x".into()).is_permanent());
    }
}
