use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scoring::{Centrality, CentralityThresholds};
use crate::signal::{Dimension, Elicitation, Importance, Signal, SourceCategory, Stance};
use crate::time::now_iso8601;

/// A signal as seen from the principle it joined. Carries what scoring and
/// promotion need so the signal record itself is never touched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalRef {
    pub id: Uuid,
    #[serde(default)]
    pub source_category: SourceCategory,
    #[serde(default)]
    pub stance: Stance,
    #[serde(default)]
    pub importance: Importance,
    #[serde(default)]
    pub elicitation: Elicitation,
    #[serde(default)]
    pub weight: f64,
    /// Similarity to the representative text when the signal joined.
    #[serde(default)]
    pub similarity: f64,
}

impl SignalRef {
    pub fn new(signal: &Signal, weight: f64, similarity: f64) -> Self {
        Self {
            id: signal.id,
            source_category: signal.provenance.source_category,
            stance: signal.stance,
            importance: signal.importance,
            elicitation: signal.provenance.elicitation,
            weight,
            similarity,
        }
    }
}

/// A cluster of signals judged to express the same value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principle {
    pub id: Uuid,
    /// Phrasing of the highest-weighted member signal, verbatim.
    pub representative_text: String,
    pub representative_signal: Uuid,
    #[serde(default)]
    pub representative_weight: f64,
    #[serde(default)]
    pub dimension: Dimension,
    #[serde(default)]
    pub n_count: usize,
    #[serde(default)]
    pub centrality: Centrality,
    /// Sum of member signal weights.
    #[serde(default)]
    pub weight: f64,
    #[serde(default)]
    pub derived_from: Vec<SignalRef>,
    #[serde(default = "now_iso8601")]
    pub created_at: String,
}

impl Principle {
    pub fn new(signal: &Signal, weight: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            representative_text: signal.comparable_text().to_string(),
            representative_signal: signal.id,
            representative_weight: weight,
            dimension: signal.dimension,
            n_count: 1,
            centrality: Centrality::Supporting,
            weight,
            derived_from: vec![SignalRef::new(signal, weight, 1.0)],
            created_at: now_iso8601(),
        }
    }

    pub fn contains(&self, signal_id: Uuid) -> bool {
        self.derived_from.iter().any(|s| s.id == signal_id)
    }

    /// Add a member. The representative changes only when the newcomer
    /// strictly outweighs the current one.
    pub fn reinforce(&mut self, signal: &Signal, weight: f64, similarity: f64) {
        self.derived_from.push(SignalRef::new(signal, weight, similarity));
        if weight > self.representative_weight {
            self.representative_text = signal.comparable_text().to_string();
            self.representative_signal = signal.id;
            self.representative_weight = weight;
        }
        if self.dimension == Dimension::Unclassified {
            self.dimension = signal.dimension;
        }
        self.recount();
    }

    /// Fold `other` into `self`, keeping this principle's representative.
    /// Signals already present are not duplicated.
    pub fn absorb(&mut self, other: Principle) {
        for member in other.derived_from {
            if !self.contains(member.id) {
                self.derived_from.push(member);
            }
        }
        if self.dimension == Dimension::Unclassified {
            self.dimension = other.dimension;
        }
        self.recount();
    }

    /// Recompute `n_count` and `weight` from the member list.
    pub fn recount(&mut self) {
        self.n_count = self.derived_from.len();
        self.weight = self.derived_from.iter().map(|s| s.weight).sum();
    }

    /// Recomputed from the summed member weight, so every reinforcement
    /// can move the tier.
    pub fn update_centrality(&mut self, thresholds: &CentralityThresholds) {
        self.centrality = thresholds.classify(thresholds.strength(self.weight));
    }

    pub fn source_categories(&self) -> BTreeSet<SourceCategory> {
        self.derived_from.iter().map(|s| s.source_category).collect()
    }

    /// Number of distinct source categories among members.
    pub fn provenance_diversity(&self) -> usize {
        self.source_categories().len()
    }

    pub fn has_external(&self) -> bool {
        self.derived_from
            .iter()
            .any(|s| s.source_category == SourceCategory::External)
    }

    pub fn has_question(&self) -> bool {
        self.derived_from.iter().any(|s| s.stance == Stance::Question)
    }

    pub fn signal_ids(&self) -> Vec<Uuid> {
        self.derived_from.iter().map(|s| s.id).collect()
    }
}
