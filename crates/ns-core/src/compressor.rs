//! Promotion of principles into axioms.
//!
//! Order of checks for each principle with enough evidence:
//! anti-echo-chamber, then classified dimension, then the cognitive load cap
//! over whatever is left. Nothing that reaches a check is dropped; it comes
//! back as a blocked candidate with a reason.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::axiom::{Axiom, BlockReason, parse_canonical_forms};
use crate::capability::{GenerateTask, ReliableCapability, prompt};
use crate::constants::RATIO_FLOOR;
use crate::principle::Principle;
use crate::report::{DegradationCounter, Stage};
use crate::signal::Dimension;

#[derive(Clone, Copy, Debug)]
pub struct CompressorOptions {
    pub n_threshold: usize,
    pub cognitive_load_cap: usize,
    pub canonical_forms: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompressionMetrics {
    pub signal_count: usize,
    pub axiom_count: usize,
    pub signal_ratio: f64,
    pub input_chars: usize,
    pub output_chars: usize,
    pub char_ratio: f64,
}

impl CompressionMetrics {
    pub fn compute(principles: &[Principle], signal_chars: usize, axioms: &[Axiom]) -> Self {
        let signal_count: usize = principles.iter().map(|p| p.n_count).sum();
        let output_chars: usize = axioms.iter().map(|a| a.text().chars().count()).sum();
        Self {
            signal_count,
            axiom_count: axioms.len(),
            signal_ratio: compression_ratio(signal_count as f64, axioms.len() as f64),
            input_chars: signal_chars,
            output_chars,
            char_ratio: compression_ratio(signal_chars as f64, output_chars as f64),
        }
    }
}

/// `input / output` with the denominator floored, so an empty output gives a
/// finite ratio.
pub fn compression_ratio(input: f64, output: f64) -> f64 {
    let ratio = input / output.max(RATIO_FLOOR);
    if ratio.is_finite() { ratio } else { 0.0 }
}

#[derive(Clone, Debug, Default)]
pub struct CompressionOutcome {
    /// Promoted axioms, highest rank first.
    pub axioms: Vec<Axiom>,
    pub blocked: Vec<Axiom>,
    /// Principles under the evidence threshold; neither promoted nor blocked.
    pub below_threshold: usize,
}

/// Promotion rank: aggregate weight, then evidence count, then input order.
fn rank(a: &(usize, &Principle), b: &(usize, &Principle)) -> Ordering {
    b.1.weight
        .total_cmp(&a.1.weight)
        .then(b.1.n_count.cmp(&a.1.n_count))
        .then(a.0.cmp(&b.0))
}

pub struct Compressor {
    capability: ReliableCapability,
    degradation: Arc<DegradationCounter>,
    options: CompressorOptions,
}

impl Compressor {
    pub fn new(
        capability: ReliableCapability,
        degradation: Arc<DegradationCounter>,
        options: CompressorOptions,
    ) -> Self {
        Self {
            capability,
            degradation,
            options,
        }
    }

    /// Split principles into promoted axioms and blocked candidates. No
    /// capability calls; canonical forms are added by [`Self::compress`].
    pub fn promote(&self, principles: &[Principle]) -> CompressionOutcome {
        let mut outcome = CompressionOutcome::default();
        let mut qualifying: Vec<(usize, &Principle)> = Vec::new();

        for (i, p) in principles.iter().enumerate() {
            if p.n_count < self.options.n_threshold {
                outcome.below_threshold += 1;
            } else if !(p.has_external() || p.has_question()) {
                outcome.blocked.push(Axiom::blocked(p, BlockReason::EchoChamber));
            } else if p.dimension == Dimension::Unclassified {
                outcome.blocked.push(Axiom::blocked(p, BlockReason::Unclassified));
            } else {
                qualifying.push((i, p));
            }
        }

        qualifying.sort_by(rank);
        let cap = self.options.cognitive_load_cap;
        if qualifying.len() > cap {
            tracing::info!(
                qualifying = qualifying.len(),
                cap,
                "cognitive load cap reached, deferring lowest-ranked candidates"
            );
        }
        for (position, (_, p)) in qualifying.into_iter().enumerate() {
            if position < cap {
                outcome.axioms.push(Axiom::from_principle(p));
            } else {
                outcome.blocked.push(Axiom::blocked(p, BlockReason::CapExceeded));
            }
        }
        outcome
    }

    pub async fn compress(&self, principles: &[Principle]) -> CompressionOutcome {
        let mut outcome = self.promote(principles);

        let wants_forms = self.options.canonical_forms
            && self.capability.supports(GenerateTask::CanonicalForms);
        if wants_forms {
            for axiom in &mut outcome.axioms {
                let native = axiom.canonical_forms.native.clone();
                let forms = self
                    .capability
                    .generate(
                        GenerateTask::CanonicalForms,
                        &[&native],
                        prompt::canonical_forms(&native),
                        |reply| parse_canonical_forms(&native, reply),
                    )
                    .await;
                match forms {
                    Some(forms) => axiom.canonical_forms = forms,
                    None => {
                        tracing::warn!(axiom = %axiom.id, "canonical forms unavailable, keeping native text");
                        self.degradation.record(Stage::CanonicalForms);
                    }
                }
            }
        }

        tracing::info!(
            promoted = outcome.axioms.len(),
            blocked = outcome.blocked.len(),
            below_threshold = outcome.below_threshold,
            "compression finished"
        );
        outcome
    }
}
