//! One pass of the pipeline: extract, cluster, merge, detect tensions,
//! compress. Each signal is classified once and added once; there is no inner
//! iteration. Repetition happens across runs, driven by the cycle manager.

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::axiom::Axiom;
use crate::capability::ReliableCapability;
use crate::compressor::{Compressor, CompressorOptions};
use crate::config::{ConfigError, SynthesisConfig};
use crate::extractor::{ExtractorOptions, SignalExtractor};
use crate::principle::Principle;
use crate::principle_store::{MergeReport, PrincipleStore};
use crate::report::DegradationCounter;
use crate::scoring::ScoringStrategy;
use crate::signal::{Signal, SourceBlock};
use crate::tension::{AttachMode, Tension, TensionDetector, attach_tensions, pair_key};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("run cancelled")]
pub struct Cancelled;

#[derive(Debug, Clone, Default)]
pub struct ReflectionInput {
    /// Blocks to extract in this pass, in source order.
    pub blocks: Vec<SourceBlock>,
    /// Principles carried over from the previous run (incremental only).
    pub prior_principles: Vec<Principle>,
    /// Tensions carried over from the previous run (incremental only).
    pub prior_tensions: Vec<Tension>,
}

#[derive(Debug, Clone, Default)]
pub struct ReflectionOutput {
    pub new_signals: Vec<Signal>,
    pub dropped_non_identity: usize,
    pub degraded_signals: usize,
    pub principles: Vec<Principle>,
    pub merges: MergeReport,
    /// Every tension in force after this pass.
    pub tensions: Vec<Tension>,
    /// Tensions first detected in this pass.
    pub new_tensions: Vec<Tension>,
    pub axioms: Vec<Axiom>,
    pub blocked: Vec<Axiom>,
    pub below_threshold: usize,
}

pub struct ReflectionLoop {
    extractor: SignalExtractor,
    store: PrincipleStore,
    detector: TensionDetector,
    compressor: Compressor,
    merge_threshold: f64,
}

impl ReflectionLoop {
    pub fn new(
        capability: ReliableCapability,
        scoring: Arc<dyn ScoringStrategy>,
        config: &SynthesisConfig,
        degradation: Arc<DegradationCounter>,
    ) -> Result<Self, ConfigError> {
        let extractor = SignalExtractor::new(
            capability.clone(),
            degradation.clone(),
            ExtractorOptions {
                concurrency: config.concurrency()?,
                generalize: config.extraction.generalize,
            },
        );
        let store = PrincipleStore::new(
            capability.clone(),
            scoring,
            config.centrality,
            config.clustering.match_threshold,
            degradation.clone(),
        );
        let detector = TensionDetector::new(
            capability.clone(),
            degradation.clone(),
            config.tension.max_candidates,
        );
        let compressor = Compressor::new(
            capability,
            degradation,
            CompressorOptions {
                n_threshold: config.promotion.n_threshold,
                cognitive_load_cap: config.promotion.cognitive_load_cap,
                canonical_forms: config.promotion.canonical_forms,
            },
        );
        Ok(Self {
            extractor,
            store,
            detector,
            compressor,
            merge_threshold: config.clustering.merge_threshold,
        })
    }

    pub async fn run(
        mut self,
        input: ReflectionInput,
        cancel: &CancellationToken,
    ) -> Result<ReflectionOutput, Cancelled> {
        let fresh = input.prior_principles.is_empty() && input.prior_tensions.is_empty();
        self.store.restore(input.prior_principles);

        let extraction = tokio::select! {
            _ = cancel.cancelled() => return Err(Cancelled),
            out = self.extractor.extract(&input.blocks) => out,
        };

        for signal in &extraction.signals {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }
            self.store.add_signal(signal).await;
        }
        let merges = self.store.merge_similar_principles(self.merge_threshold).await;
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        // Carry prior tensions onto surviving principles.
        let live: HashSet<Uuid> = self.store.principles().iter().map(|p| p.id).collect();
        let mut tensions: Vec<Tension> = Vec::new();
        let mut known: HashSet<(Uuid, Uuid)> = HashSet::new();
        for mut t in input.prior_tensions {
            t.principle_a = merges.resolve(t.principle_a);
            t.principle_b = merges.resolve(t.principle_b);
            let live_pair = live.contains(&t.principle_a) && live.contains(&t.principle_b);
            if t.principle_a != t.principle_b && live_pair && known.insert(t.pair()) {
                tensions.push(t);
            }
        }

        let new_tensions = tokio::select! {
            _ = cancel.cancelled() => return Err(Cancelled),
            found = self.detector.detect_tensions(self.store.principles(), &known) => found,
        };
        tensions.extend(new_tensions.iter().cloned());

        let compression = tokio::select! {
            _ = cancel.cancelled() => return Err(Cancelled),
            out = self.compressor.compress(self.store.principles()) => out,
        };
        let mode = if fresh {
            AttachMode::Replace
        } else {
            AttachMode::Merge
        };
        let axioms = attach_tensions(&compression.axioms, &tensions, mode);
        let blocked = attach_tensions(&compression.blocked, &tensions, mode);

        tracing::info!(
            signals = extraction.signals.len(),
            principles = self.store.len(),
            merges = merges.merges.len(),
            tensions = tensions.len(),
            promoted = axioms.len(),
            "reflection pass complete"
        );

        Ok(ReflectionOutput {
            new_signals: extraction.signals,
            dropped_non_identity: extraction.dropped_non_identity,
            degraded_signals: extraction.degraded_signals,
            principles: self.store.into_principles(),
            merges,
            tensions,
            new_tensions,
            axioms,
            blocked,
            below_threshold: compression.below_threshold,
        })
    }
}

/// Known tension pairs, for skipping re-detection.
pub fn tension_pairs(tensions: &[Tension]) -> HashSet<(Uuid, Uuid)> {
    tensions.iter().map(|t| pair_key(t.principle_a, t.principle_b)).collect()
}
