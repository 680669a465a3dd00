//! Synthesis configuration. Every field has a default, so a partial TOML file
//! (or none at all) is valid input; [`SynthesisConfig::validate`] is the gate
//! that runs before any pipeline work.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capability::RetryPolicy;
use crate::constants::*;
use crate::scoring::{CentralityThresholds, ScoringWeights};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("extraction.concurrency must be a positive integer, got {0}")]
    Concurrency(i64),

    #[error("{name} must be within [0, 1], got {value}")]
    Threshold { name: &'static str, value: f64 },

    #[error("centrality.foundational ({foundational}) must not be below centrality.core ({core})")]
    CentralityOrder { foundational: f64, core: f64 },

    #[error("centrality.saturation must be positive and finite, got {0}")]
    Saturation(f64),

    #[error("promotion.n_threshold must be at least 1")]
    NThreshold,

    #[error("promotion.cognitive_load_cap must be at least 1")]
    CognitiveLoadCap,

    #[error("tension.max_candidates must be at least 2, got {0}")]
    TensionCandidates(usize),

    #[error("cycle.keep_runs must be at least 1")]
    KeepRuns,

    #[error("capability.timeout_secs must be at least 1")]
    Timeout,

    #[error("capability.max_retries must be at most 10, got {0}")]
    Retries(u32),

    #[error("scoring weights must be positive and finite, got {0}")]
    Weight(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Signed so that a bad value from a file or flag reaches validation
    /// instead of failing to parse.
    pub concurrency: i64,
    pub generalize: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            generalize: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub match_threshold: f64,
    pub merge_threshold: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            merge_threshold: DEFAULT_MERGE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    pub n_threshold: usize,
    pub cognitive_load_cap: usize,
    pub canonical_forms: bool,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            n_threshold: DEFAULT_N_THRESHOLD,
            cognitive_load_cap: DEFAULT_COGNITIVE_LOAD_CAP,
            canonical_forms: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TensionConfig {
    pub max_candidates: usize,
}

impl Default for TensionConfig {
    fn default() -> Self {
        Self {
            max_candidates: DEFAULT_TENSION_MAX_CANDIDATES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// Share of new content (by bytes) that forces a full resynthesis.
    pub resynthesis_delta: f64,
    /// Accumulated new high-severity tensions that force a full resynthesis.
    pub contradiction_limit: u32,
    pub keep_runs: usize,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            resynthesis_delta: DEFAULT_RESYNTHESIS_DELTA,
            contradiction_limit: DEFAULT_CONTRADICTION_LIMIT,
            keep_runs: DEFAULT_KEEP_RUNS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityConfig {
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub backoff_ms: u64,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            backoff_ms: DEFAULT_BACKOFF_MS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    pub extraction: ExtractionConfig,
    pub clustering: ClusteringConfig,
    pub centrality: CentralityThresholds,
    pub scoring: ScoringWeights,
    pub promotion: PromotionConfig,
    pub tension: TensionConfig,
    pub cycle: CycleConfig,
    pub capability: CapabilityConfig,
}

fn unit_interval(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Threshold { name, value })
    }
}

impl SynthesisConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.concurrency()?;

        unit_interval("clustering.match_threshold", self.clustering.match_threshold)?;
        unit_interval("clustering.merge_threshold", self.clustering.merge_threshold)?;
        unit_interval("centrality.foundational", self.centrality.foundational)?;
        unit_interval("centrality.core", self.centrality.core)?;
        unit_interval("cycle.resynthesis_delta", self.cycle.resynthesis_delta)?;
        if self.centrality.foundational < self.centrality.core {
            return Err(ConfigError::CentralityOrder {
                foundational: self.centrality.foundational,
                core: self.centrality.core,
            });
        }
        let saturation = self.centrality.saturation;
        if !(saturation.is_finite() && saturation > 0.0) {
            return Err(ConfigError::Saturation(saturation));
        }

        if self.promotion.n_threshold == 0 {
            return Err(ConfigError::NThreshold);
        }
        if self.promotion.cognitive_load_cap == 0 {
            return Err(ConfigError::CognitiveLoadCap);
        }
        if self.tension.max_candidates < 2 {
            return Err(ConfigError::TensionCandidates(self.tension.max_candidates));
        }
        if self.cycle.keep_runs == 0 {
            return Err(ConfigError::KeepRuns);
        }
        if self.capability.timeout_secs == 0 {
            return Err(ConfigError::Timeout);
        }
        if self.capability.max_retries > 10 {
            return Err(ConfigError::Retries(self.capability.max_retries));
        }
        if let Some(bad) = self
            .scoring
            .all()
            .into_iter()
            .find(|w| !w.is_finite() || *w <= 0.0)
        {
            return Err(ConfigError::Weight(bad));
        }
        Ok(())
    }

    /// The batch width, or the reason it is unusable.
    pub fn concurrency(&self) -> Result<NonZeroUsize, ConfigError> {
        let raw = self.extraction.concurrency;
        usize::try_from(raw)
            .ok()
            .and_then(NonZeroUsize::new)
            .ok_or(ConfigError::Concurrency(raw))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.capability.max_retries,
            timeout: Duration::from_secs(self.capability.timeout_secs),
            backoff: Duration::from_millis(self.capability.backoff_ms),
        }
    }
}
