//! Value conflicts between principles.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::axiom::Axiom;
use crate::capability::{GenerateTask, ReliableCapability, prompt};
use crate::principle::Principle;
use crate::report::{DegradationCounter, Stage};
use crate::time::now_iso8601;

static NEGATED_CONFLICT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(no|not|without|isn't|aren't|don't|doesn't|do not|does not)\s+(\w+\s+){0,2}?(tension|tensions|conflict|conflicts|contradiction|contradictions)\b",
    )
    .unwrap()
});
static INCOMPATIBLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(incompatible|inconsistent|incoherent|not\s+(\w+\s+)?(compatible|consistent|complementary))\b",
    )
    .unwrap()
});
static COMPATIBLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(compatible|consistent|complementary)\b").unwrap());
static AFFIRMATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(conflict\w*|tension\w*|contradict\w*|clash\w*|oppos\w*|inconsistent|incoherent|at odds)\b").unwrap()
});
static SEVERITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(high|severe|major|strong|medium|moderate|low|minor|mild|slight)\b").unwrap()
});
static LEADING_LABELS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\W*(yes\b\W*)?((high|medium|low)\b\W*)?(severity\b\W*)?").unwrap()
});

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    #[default]
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Medium,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tension {
    pub id: Uuid,
    pub principle_a: Uuid,
    pub principle_b: Uuid,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "now_iso8601")]
    pub detected_at: String,
}

impl Tension {
    pub fn new(principle_a: Uuid, principle_b: Uuid, severity: Severity) -> Self {
        Self {
            id: Uuid::new_v4(),
            principle_a,
            principle_b,
            severity,
            description: None,
            detected_at: now_iso8601(),
        }
    }

    /// Order-independent identity of the pair.
    pub fn pair(&self) -> (Uuid, Uuid) {
        pair_key(self.principle_a, self.principle_b)
    }

    pub fn involves(&self, principle: Uuid) -> bool {
        self.principle_a == principle || self.principle_b == principle
    }
}

pub fn pair_key(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b { (a, b) } else { (b, a) }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TensionVerdict {
    pub conflict: bool,
    pub severity: Severity,
    pub description: Option<String>,
}

/// Read a yes/no conflict judgement. Any explicit conflict word counts no
/// matter how short the reply is; `None` means the reply said neither.
pub fn parse_tension_reply(reply: &str) -> Option<TensionVerdict> {
    let text = reply.trim().to_lowercase();
    let first = text
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())
        .unwrap_or("");

    let conflict = match first {
        "yes" => true,
        "no" | "none" => false,
        _ if NEGATED_CONFLICT.is_match(&text) => false,
        _ if INCOMPATIBLE.is_match(&text) => true,
        _ if COMPATIBLE.is_match(&text) => false,
        _ if AFFIRMATIVE.is_match(&text) => true,
        _ => return None,
    };

    if !conflict {
        return Some(TensionVerdict {
            conflict,
            severity: Severity::Medium,
            description: None,
        });
    }

    let severity = SEVERITY
        .find(&text)
        .map(|m| match m.as_str() {
            "high" | "severe" | "major" | "strong" => Severity::High,
            "low" | "minor" | "mild" | "slight" => Severity::Low,
            _ => Severity::Medium,
        })
        .unwrap_or_default();

    let description = LEADING_LABELS.replace(reply.trim(), "").trim().to_string();
    Some(TensionVerdict {
        conflict,
        severity,
        description: (!description.is_empty()).then_some(description),
    })
}

pub struct TensionDetector {
    capability: ReliableCapability,
    degradation: Arc<DegradationCounter>,
    max_candidates: usize,
}

impl TensionDetector {
    pub fn new(
        capability: ReliableCapability,
        degradation: Arc<DegradationCounter>,
        max_candidates: usize,
    ) -> Self {
        Self {
            capability,
            degradation,
            max_candidates,
        }
    }

    /// The heaviest `max_candidates` principles, heaviest first.
    fn candidates<'a>(&self, principles: &'a [Principle]) -> Vec<&'a Principle> {
        let mut ranked: Vec<&Principle> = principles.iter().collect();
        ranked.sort_by(|a, b| b.weight.total_cmp(&a.weight));
        ranked.truncate(self.max_candidates);
        ranked
    }

    /// Ask about every candidate pair not already in `known`.
    pub async fn detect_tensions(
        &self,
        principles: &[Principle],
        known: &HashSet<(Uuid, Uuid)>,
    ) -> Vec<Tension> {
        if !self.capability.supports(GenerateTask::Tension) {
            tracing::debug!("provider cannot judge tensions, skipping");
            return Vec::new();
        }

        let candidates = self.candidates(principles);
        if principles.len() > candidates.len() {
            tracing::debug!(
                total = principles.len(),
                compared = candidates.len(),
                "tension candidates capped"
            );
        }

        let mut found = Vec::new();
        for (i, a) in candidates.iter().enumerate() {
            for b in &candidates[i + 1..] {
                if known.contains(&pair_key(a.id, b.id)) {
                    continue;
                }
                let verdict = self
                    .capability
                    .generate(
                        GenerateTask::Tension,
                        &[&a.representative_text, &b.representative_text],
                        prompt::tension(&a.representative_text, &b.representative_text),
                        parse_tension_reply,
                    )
                    .await;
                match verdict {
                    Some(v) if v.conflict => {
                        let mut t = Tension::new(a.id, b.id, v.severity);
                        t.description = v.description;
                        found.push(t);
                    }
                    Some(_) => {}
                    None => {
                        tracing::warn!(a = %a.id, b = %b.id, "tension judgement unavailable");
                        self.degradation.record(Stage::Tension);
                    }
                }
            }
        }
        found
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AttachMode {
    /// Keep tensions already on the axiom, add new pairs.
    #[default]
    Merge,
    /// Discard existing tensions; used for a fresh run.
    Replace,
}

/// New axiom copies carrying the tensions that touch their principles.
pub fn attach_tensions(axioms: &[Axiom], tensions: &[Tension], mode: AttachMode) -> Vec<Axiom> {
    axioms
        .iter()
        .map(|axiom| {
            let mut next = axiom.clone();
            if mode == AttachMode::Replace {
                next.tensions.clear();
            }
            let mut pairs: HashSet<(Uuid, Uuid)> = next.tensions.iter().map(Tension::pair).collect();
            for t in tensions {
                let touches = axiom
                    .derived_from
                    .principles
                    .iter()
                    .any(|p| t.involves(*p));
                if touches && pairs.insert(t.pair()) {
                    next.tensions.push(t.clone());
                }
            }
            next
        })
        .collect()
}
