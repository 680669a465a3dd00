//! Per-run summary. Every completed run produces one, including runs that
//! promote nothing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::compressor::CompressionMetrics;
use crate::cycle::CycleMode;

/// Pipeline stage that fell back to a default.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Classification,
    Similarity,
    Generalization,
    Tension,
    CanonicalForms,
    MalformedRecord,
}

/// Thread-safe fallback tally shared by every stage of one run.
#[derive(Debug, Default)]
pub struct DegradationCounter {
    classification: AtomicUsize,
    similarity: AtomicUsize,
    generalization: AtomicUsize,
    tension: AtomicUsize,
    canonical_forms: AtomicUsize,
    malformed_records: AtomicUsize,
}

impl DegradationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, stage: Stage) -> &AtomicUsize {
        match stage {
            Stage::Classification => &self.classification,
            Stage::Similarity => &self.similarity,
            Stage::Generalization => &self.generalization,
            Stage::Tension => &self.tension,
            Stage::CanonicalForms => &self.canonical_forms,
            Stage::MalformedRecord => &self.malformed_records,
        }
    }

    pub fn record(&self, stage: Stage) {
        self.record_many(stage, 1);
    }

    pub fn record_many(&self, stage: Stage, n: usize) {
        self.slot(stage).fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DegradationCounts {
        DegradationCounts {
            classification: self.classification.load(Ordering::Relaxed),
            similarity: self.similarity.load(Ordering::Relaxed),
            generalization: self.generalization.load(Ordering::Relaxed),
            tension: self.tension.load(Ordering::Relaxed),
            canonical_forms: self.canonical_forms.load(Ordering::Relaxed),
            malformed_records: self.malformed_records.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DegradationCounts {
    pub classification: usize,
    pub similarity: usize,
    pub generalization: usize,
    pub tension: usize,
    pub canonical_forms: usize,
    pub malformed_records: usize,
}

impl DegradationCounts {
    pub fn total(&self) -> usize {
        self.classification
            + self.similarity
            + self.generalization
            + self.tension
            + self.canonical_forms
            + self.malformed_records
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Success,
    Degraded,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Degraded => "degraded",
        }
    }
}

/// Axioms of the previous run compared with this one, by canonical text.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BaselineComparison {
    pub previous_run_id: Option<Uuid>,
    pub retained: Vec<String>,
    pub added: Vec<String>,
    pub dropped: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunReport {
    pub run_id: Uuid,
    pub workspace_id: String,
    pub mode: CycleMode,
    pub started_at: String,
    pub finished_at: String,
    pub blocks_scanned: usize,
    pub blocks_new: usize,
    pub content_delta: f64,
    pub signals_extracted: usize,
    pub signals_total: usize,
    pub dropped_non_identity: usize,
    pub degraded_signals: usize,
    pub principles: usize,
    pub merges: usize,
    pub tensions: usize,
    pub new_high_tensions: usize,
    pub contradiction_count: u32,
    pub promoted: usize,
    pub below_threshold: usize,
    /// Blocked candidate count per reason.
    pub blocked: BTreeMap<String, usize>,
    pub degradation: DegradationCounts,
    pub metrics: CompressionMetrics,
    pub baseline: Option<BaselineComparison>,
    pub status: RunStatus,
    pub notes: Vec<String>,
}

impl RunReport {
    pub fn blocked_total(&self) -> usize {
        self.blocked.values().sum()
    }

    /// Set `status` from the degradation tally and explain an empty result.
    pub fn finalize(&mut self) {
        self.status = if self.degradation.total() > 0 || self.degraded_signals > 0 {
            RunStatus::Degraded
        } else {
            RunStatus::Success
        };

        if self.promoted == 0 {
            let why = if self.signals_total == 0 {
                "no identity-bearing statements were found in the sources".to_string()
            } else if self.blocked_total() > 0 {
                format!(
                    "{} candidate(s) met the evidence threshold but were blocked",
                    self.blocked_total()
                )
            } else {
                format!(
                    "no principle reached the evidence threshold ({} below it)",
                    self.below_threshold
                )
            };
            self.notes.push(format!("zero axioms promoted: {why}"));
        }
    }
}
