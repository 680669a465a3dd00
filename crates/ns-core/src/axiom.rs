use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::principle::Principle;
use crate::scoring::Centrality;
use crate::signal::{Dimension, SourceCategory, Stance};
use crate::tension::Tension;
use crate::time::now_iso8601;

/// Native phrasing plus optional compact notations.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalForms {
    pub native: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cjk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub math: Option<String>,
}

impl CanonicalForms {
    pub fn native(text: impl Into<String>) -> Self {
        Self {
            native: text.into(),
            ..Self::default()
        }
    }

    pub fn has_notation(&self) -> bool {
        self.cjk.is_some() || self.emoji.is_some() || self.math.is_some()
    }
}

/// Parse `cjk:` / `emoji:` / `math:` lines from a generation reply. `None`
/// when the reply contains none of them.
pub fn parse_canonical_forms(native: &str, reply: &str) -> Option<CanonicalForms> {
    let mut forms = CanonicalForms::native(native);
    for line in reply.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match label.trim().trim_start_matches(['-', '*', ' ']).to_lowercase().as_str() {
            "cjk" => forms.cjk = Some(value.to_string()),
            "emoji" => forms.emoji = Some(value.to_string()),
            "math" => forms.math = Some(value.to_string()),
            _ => {}
        }
    }
    forms.has_notation().then_some(forms)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockReason {
    /// Only self-authored, non-questioning evidence.
    EchoChamber,
    CapExceeded,
    Unclassified,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EchoChamber => "echo-chamber",
            Self::CapExceeded => "cap-exceeded",
            Self::Unclassified => "unclassified",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "echo-chamber" => Some(Self::EchoChamber),
            "cap-exceeded" => Some(Self::CapExceeded),
            "unclassified" => Some(Self::Unclassified),
            _ => None,
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EchoChamber => {
                "no external or questioning evidence (all signals self-asserted)"
            }
            Self::CapExceeded => "cap exceeded",
            Self::Unclassified => "unclassified dimension",
        })
    }
}

/// Where an axiom's evidence came from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvenanceSummary {
    pub self_authored: usize,
    pub curated: usize,
    pub external: usize,
    pub questioning: usize,
}

impl ProvenanceSummary {
    pub fn of(principle: &Principle) -> Self {
        let mut s = Self::default();
        for member in &principle.derived_from {
            match member.source_category {
                SourceCategory::SelfAuthored => s.self_authored += 1,
                SourceCategory::Curated => s.curated += 1,
                SourceCategory::External => s.external += 1,
            }
            if member.stance == Stance::Question {
                s.questioning += 1;
            }
        }
        s
    }

    pub fn diversity(&self) -> usize {
        [self.self_authored, self.curated, self.external]
            .iter()
            .filter(|n| **n > 0)
            .count()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DerivedFrom {
    pub principles: Vec<Uuid>,
    pub signals: Vec<Uuid>,
}

/// A promoted identity statement, or a candidate recorded with the reason it
/// was held back.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Axiom {
    pub id: Uuid,
    pub canonical_forms: CanonicalForms,
    pub dimension: Dimension,
    pub centrality: Centrality,
    pub n_count: usize,
    pub weight: f64,
    pub derived_from: DerivedFrom,
    pub provenance_diversity: usize,
    pub provenance: ProvenanceSummary,
    pub tensions: Vec<Tension>,
    pub blocked: bool,
    pub block_reason: Option<BlockReason>,
    pub created_at: String,
}

impl Default for Axiom {
    fn default() -> Self {
        Self {
            id: Uuid::nil(),
            canonical_forms: CanonicalForms::default(),
            dimension: Dimension::default(),
            centrality: Centrality::default(),
            n_count: 0,
            weight: 0.0,
            derived_from: DerivedFrom::default(),
            provenance_diversity: 0,
            provenance: ProvenanceSummary::default(),
            tensions: Vec::new(),
            blocked: false,
            block_reason: None,
            created_at: crate::time::EPOCH_ISO8601.to_string(),
        }
    }
}

impl Axiom {
    pub fn from_principle(principle: &Principle) -> Self {
        let provenance = ProvenanceSummary::of(principle);
        Self {
            id: Uuid::new_v4(),
            canonical_forms: CanonicalForms::native(&principle.representative_text),
            dimension: principle.dimension,
            centrality: principle.centrality,
            n_count: principle.n_count,
            weight: principle.weight,
            derived_from: DerivedFrom {
                principles: vec![principle.id],
                signals: principle.signal_ids(),
            },
            provenance_diversity: provenance.diversity(),
            provenance,
            tensions: Vec::new(),
            blocked: false,
            block_reason: None,
            created_at: now_iso8601(),
        }
    }

    pub fn blocked(principle: &Principle, reason: BlockReason) -> Self {
        Self {
            blocked: true,
            block_reason: Some(reason),
            ..Self::from_principle(principle)
        }
    }

    pub fn text(&self) -> &str {
        &self.canonical_forms.native
    }

    pub fn is_promoted(&self) -> bool {
        !self.blocked
    }
}
