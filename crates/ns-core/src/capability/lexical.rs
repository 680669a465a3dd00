//! Local, deterministic provider. Keyword heuristics stand in for a model's
//! judgement and token cosine stands in for semantic similarity; good enough
//! to run the pipeline offline and reproducibly, not to match an LLM.

use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::{
    Capability, CapabilityError, CapabilityResult, Classification, ClassifyRequest,
    ClassifyTask, GenerateRequest, GenerateTask,
};
use crate::signal::Dimension;
use crate::tokenizer::{content_tokens, cosine_similarity, tokenize};

static FIRST_PERSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(i|i'm|i've|i'd|me|my|myself|mine|we|our)\b").unwrap());
static VALUE_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(value|values|believe|believes|always|never|care|cares|prefer|refuse|matter|matters|important|principle|try|want|need|love|hate|should|must|won't|will not|can't stand|feel|honest|truth)\b",
    )
    .unwrap()
});
static QUESTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\?|\b(wonder|unsure|not sure|whether|maybe|perhaps|doubt)\b)").unwrap()
});
static TENSIONING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(torn|versus|vs|on the other hand|pulled between|at odds)\b").unwrap()
});
static QUALIFY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(but|unless|except|sometimes|usually|depends|as long as)\b").unwrap()
});
static DENY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(never|don't|do not|won't|will not|refuse|reject|not|no longer)\b").unwrap()
});
static CORE_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(always|never|above all|fundamental|deeply|core|most important|non-negotiable)\b")
        .unwrap()
});
static PERIPHERAL_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(sometimes|occasionally|a bit|slightly|kind of|sort of)\b").unwrap()
});
static NEGATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(never|not|don't|do not|won't|avoid|refuse|no)\b").unwrap()
});

const DIMENSION_KEYWORDS: &[(Dimension, &[&str])] = &[
    (Dimension::IdentityCore, &["am", "identity", "who", "self", "purpose", "myself"]),
    (Dimension::CharacterTraits, &["curious", "patient", "stubborn", "calm", "kind", "careful"]),
    (Dimension::VoicePresence, &["voice", "tone", "write", "speak", "words", "humor", "blunt"]),
    (Dimension::HonestyFramework, &["honest", "honesty", "truth", "lie", "lying", "transparent"]),
    (Dimension::BoundariesEthics, &["boundary", "boundaries", "ethics", "harm", "refuse", "consent"]),
    (Dimension::RelationshipDynamics, &["people", "friends", "trust", "others", "team", "listen"]),
    (Dimension::ContinuityGrowth, &["learn", "grow", "change", "growth", "mistakes", "improve"]),
];

#[derive(Clone, Debug, Default)]
pub struct LexicalProvider;

impl LexicalProvider {
    pub fn new() -> Self {
        Self
    }

    fn judge(task: ClassifyTask, text: &str) -> &'static str {
        match task {
            ClassifyTask::IdentityBearing => {
                if FIRST_PERSON.is_match(text) && VALUE_WORDS.is_match(text) {
                    "yes"
                } else {
                    "no"
                }
            }
            ClassifyTask::Dimension => dimension_of(text).as_str(),
            ClassifyTask::Stance => {
                if QUESTION.is_match(text) {
                    "question"
                } else if TENSIONING.is_match(text) {
                    "tensioning"
                } else if QUALIFY.is_match(text) {
                    "qualify"
                } else if DENY.is_match(text) {
                    "deny"
                } else {
                    "assert"
                }
            }
            ClassifyTask::Importance => {
                if CORE_MARKERS.is_match(text) {
                    "core"
                } else if PERIPHERAL_MARKERS.is_match(text) {
                    "peripheral"
                } else {
                    "supporting"
                }
            }
        }
    }
}

fn dimension_of(text: &str) -> Dimension {
    let tokens: HashSet<String> = tokenize(text).into_iter().collect();
    DIMENSION_KEYWORDS
        .iter()
        .map(|(dim, words)| (*dim, words.iter().filter(|w| tokens.contains(**w)).count()))
        .filter(|(_, hits)| *hits > 0)
        // First dimension wins ties.
        .fold(None, |best: Option<(Dimension, usize)>, (dim, hits)| match best {
            Some((_, top)) if top >= hits => best,
            _ => Some((dim, hits)),
        })
        .map(|(dim, _)| dim)
        .unwrap_or(Dimension::Unclassified)
}

/// Two statements are in tension when they share a topic and exactly one of
/// them is negated.
fn lexical_tension(a: &str, b: &str) -> bool {
    let ta: HashSet<String> = content_tokens(a).into_iter().collect();
    let tb: HashSet<String> = content_tokens(b).into_iter().collect();
    let shared = ta.intersection(&tb).count();
    shared > 0 && NEGATION.is_match(a) != NEGATION.is_match(b)
}

#[async_trait]
impl Capability for LexicalProvider {
    fn name(&self) -> &str {
        "lexical"
    }

    fn supports(&self, task: GenerateTask) -> bool {
        matches!(task, GenerateTask::Tension)
    }

    async fn classify(&self, request: ClassifyRequest) -> CapabilityResult<Classification> {
        let answer = Self::judge(request.task, &request.subject);
        if request.categories.iter().any(|c| c == answer) {
            Ok(Classification::new(answer, 0.6))
        } else {
            Ok(Classification::unmatched())
        }
    }

    async fn generate(&self, request: GenerateRequest) -> CapabilityResult<String> {
        match request.task {
            GenerateTask::Tension => match request.subjects.as_slice() {
                [a, b] if lexical_tension(a, b) => {
                    Ok("yes, medium: one statement negates what the other affirms".into())
                }
                [_, _] => Ok("no".into()),
                _ => Err(CapabilityError::InvalidResponse(
                    "tension needs exactly two subjects".into(),
                )),
            },
            other => Err(CapabilityError::Unsupported(other.as_str().into())),
        }
    }

    async fn compare(&self, a: &str, b: &str) -> CapabilityResult<f64> {
        Ok(cosine_similarity(a, b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(task: ClassifyTask, subject: &str, categories: &[&str]) -> ClassifyRequest {
        ClassifyRequest {
            task,
            subject: subject.into(),
            categories: categories.iter().map(|s| s.to_string()).collect(),
            prompt: String::new(),
        }
    }

    #[test]
    fn test_identity_bearing_needs_first_person_and_value() {
        assert_eq!(
            LexicalProvider::judge(ClassifyTask::IdentityBearing, "I always tell the truth"),
            "yes"
        );
        assert_eq!(
            LexicalProvider::judge(ClassifyTask::IdentityBearing, "The meeting is at noon"),
            "no"
        );
    }

    #[test]
    fn test_stance_heuristics() {
        assert_eq!(LexicalProvider::judge(ClassifyTask::Stance, "Am I too blunt?"), "question");
        assert_eq!(LexicalProvider::judge(ClassifyTask::Stance, "I never lie"), "deny");
        assert_eq!(
            LexicalProvider::judge(ClassifyTask::Stance, "I speak plainly, unless someone is grieving"),
            "qualify"
        );
        assert_eq!(LexicalProvider::judge(ClassifyTask::Stance, "I value rigor"), "assert");
    }

    #[test]
    fn test_dimension_keywords() {
        assert_eq!(dimension_of("I value honesty and truth"), Dimension::HonestyFramework);
        assert_eq!(dimension_of("Lunch was good"), Dimension::Unclassified);
    }

    #[tokio::test]
    async fn test_answer_outside_categories_is_unmatched() {
        let p = LexicalProvider::new();
        let c = p
            .classify(request(ClassifyTask::Stance, "I never lie", &["assert"]))
            .await
            .unwrap();
        assert_eq!(c.category, None);
    }

    #[tokio::test]
    async fn test_tension_on_shared_topic_with_one_negation() {
        let p = LexicalProvider::new();
        let reply = p
            .generate(GenerateRequest {
                task: GenerateTask::Tension,
                subjects: vec![
                    "I share every honest opinion".into(),
                    "I do not share opinions that hurt".into(),
                ],
                prompt: String::new(),
            })
            .await
            .unwrap();
        assert!(reply.starts_with("yes"));
    }

    #[tokio::test]
    async fn test_canonical_forms_unsupported() {
        let p = LexicalProvider::new();
        assert!(!p.supports(GenerateTask::CanonicalForms));
        let err = p
            .generate(GenerateRequest {
                task: GenerateTask::CanonicalForms,
                subjects: vec!["x".into()],
                prompt: String::new(),
            })
            .await
            .unwrap_err();
        assert!(err.is_permanent());
    }
}
