//! Signal weighting and principle centrality.
//!
//! Weight of one signal = importance × provenance factor × elicitation
//! factor. The formula sits behind [`ScoringStrategy`] so it can be tuned or
//! replaced without touching the clusterer or the compressor.
//!
//! Centrality is driven by the sum of member weights, not the count and not
//! the mean: every reinforcing signal moves a principle towards
//! `saturation`, where its strength tops out at 1.0.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CENTRALITY_SATURATION, DEFAULT_CORE_THRESHOLD, DEFAULT_FOUNDATIONAL_THRESHOLD,
};
use crate::signal::{Elicitation, Importance, Signal, SourceCategory};

/// Structural importance tier of a principle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Centrality {
    Foundational,
    Core,
    #[default]
    Supporting,
}

impl Centrality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Foundational => "foundational",
            Self::Core => "core",
            Self::Supporting => "supporting",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim() {
            "foundational" => Self::Foundational,
            "core" => Self::Core,
            _ => Self::Supporting,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralityThresholds {
    pub foundational: f64,
    pub core: f64,
    /// Summed weight that maps to strength 1.0.
    pub saturation: f64,
}

impl Default for CentralityThresholds {
    fn default() -> Self {
        Self {
            foundational: DEFAULT_FOUNDATIONAL_THRESHOLD,
            core: DEFAULT_CORE_THRESHOLD,
            saturation: DEFAULT_CENTRALITY_SATURATION,
        }
    }
}

impl CentralityThresholds {
    pub fn strength(&self, total_weight: f64) -> f64 {
        normalized_strength(total_weight, self.saturation)
    }

    pub fn classify(&self, normalized_strength: f64) -> Centrality {
        if normalized_strength >= self.foundational {
            Centrality::Foundational
        } else if normalized_strength >= self.core {
            Centrality::Core
        } else {
            Centrality::Supporting
        }
    }
}

/// Multipliers of the default multiplicative formula.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub importance_core: f64,
    pub importance_supporting: f64,
    pub importance_peripheral: f64,
    pub source_self: f64,
    pub source_curated: f64,
    pub source_external: f64,
    pub elicitation_agent_initiated: f64,
    pub elicitation_user_elicited: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            importance_core: 1.5,
            importance_supporting: 1.0,
            importance_peripheral: 0.5,
            source_self: 1.0,
            source_curated: 1.5,
            source_external: 2.0,
            elicitation_agent_initiated: 1.0,
            elicitation_user_elicited: 0.5,
        }
    }
}

impl ScoringWeights {
    pub fn all(&self) -> [f64; 8] {
        [
            self.importance_core,
            self.importance_supporting,
            self.importance_peripheral,
            self.source_self,
            self.source_curated,
            self.source_external,
            self.elicitation_agent_initiated,
            self.elicitation_user_elicited,
        ]
    }
}

/// Swappable weighting of signals.
pub trait ScoringStrategy: Send + Sync {
    fn signal_weight(
        &self,
        importance: Importance,
        source: SourceCategory,
        elicitation: Elicitation,
    ) -> f64;

    fn weigh(&self, signal: &Signal) -> f64 {
        self.signal_weight(
            signal.importance,
            signal.provenance.source_category,
            signal.provenance.elicitation,
        )
    }
}

#[derive(Clone, Debug, Default)]
pub struct MultiplicativeScoring {
    pub weights: ScoringWeights,
}

impl MultiplicativeScoring {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }
}

impl ScoringStrategy for MultiplicativeScoring {
    fn signal_weight(
        &self,
        importance: Importance,
        source: SourceCategory,
        elicitation: Elicitation,
    ) -> f64 {
        let w = &self.weights;
        let i = match importance {
            Importance::Core => w.importance_core,
            Importance::Supporting => w.importance_supporting,
            Importance::Peripheral => w.importance_peripheral,
        };
        let p = match source {
            SourceCategory::SelfAuthored => w.source_self,
            SourceCategory::Curated => w.source_curated,
            SourceCategory::External => w.source_external,
        };
        let e = match elicitation {
            Elicitation::AgentInitiated => w.elicitation_agent_initiated,
            Elicitation::UserElicited => w.elicitation_user_elicited,
        };
        i * p * e
    }
}

/// Principle strength in [0, 1]: Σ member weight over the saturation
/// point.
pub fn normalized_strength(total_weight: f64, saturation: f64) -> f64 {
    if saturation <= 0.0 || !total_weight.is_finite() {
        return 0.0;
    }
    (total_weight / saturation).clamp(0.0, 1.0)
}
