//! Source blocks to signals.
//!
//! Blocks are classified with bounded concurrency; results come back in input
//! order. A classification that stays unavailable after retries falls back to
//! its default and the block is kept, so one bad call never costs the batch.

use std::num::NonZeroUsize;
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream;

use crate::capability::{ClassifyTask, GenerateTask, ReliableCapability, prompt};
use crate::report::{DegradationCounter, Stage};
use crate::signal::{Dimension, Importance, Signal, SourceBlock, Stance};

const YES_NO: [&str; 2] = ["yes", "no"];

#[derive(Clone, Copy, Debug)]
pub struct ExtractorOptions {
    pub concurrency: NonZeroUsize,
    /// Ask the capability for an actor-agnostic paraphrase of each signal.
    pub generalize: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ExtractionOutcome {
    /// In the order of the input blocks.
    pub signals: Vec<Signal>,
    pub dropped_non_identity: usize,
    /// Signals with at least one classification at its fallback.
    pub degraded_signals: usize,
}

enum BlockResult {
    Signal { signal: Signal, degraded: bool },
    NotIdentity,
}

pub struct SignalExtractor {
    capability: ReliableCapability,
    degradation: Arc<DegradationCounter>,
    options: ExtractorOptions,
}

impl SignalExtractor {
    pub fn new(
        capability: ReliableCapability,
        degradation: Arc<DegradationCounter>,
        options: ExtractorOptions,
    ) -> Self {
        Self {
            capability,
            degradation,
            options,
        }
    }

    pub async fn extract(&self, blocks: &[SourceBlock]) -> ExtractionOutcome {
        let results: Vec<BlockResult> = stream::iter(blocks.iter().map(|b| self.extract_block(b)))
            .buffered(self.options.concurrency.get())
            .collect()
            .await;

        let mut outcome = ExtractionOutcome::default();
        for result in results {
            match result {
                BlockResult::Signal { signal, degraded } => {
                    if degraded {
                        outcome.degraded_signals += 1;
                    }
                    outcome.signals.push(signal);
                }
                BlockResult::NotIdentity => outcome.dropped_non_identity += 1,
            }
        }

        tracing::info!(
            blocks = blocks.len(),
            signals = outcome.signals.len(),
            dropped = outcome.dropped_non_identity,
            degraded = outcome.degraded_signals,
            "extraction finished"
        );
        outcome
    }

    async fn classify(&self, task: ClassifyTask, text: &str, categories: &[&str]) -> Option<String> {
        let answer = self
            .capability
            .classify(task, text, categories)
            .await
            .and_then(|c| c.category);
        if answer.is_none() {
            self.degradation.record(Stage::Classification);
        }
        answer
    }

    async fn extract_block(&self, block: &SourceBlock) -> BlockResult {
        let text = block.text.trim();
        let mut degraded = false;

        match self.classify(ClassifyTask::IdentityBearing, text, &YES_NO).await {
            Some(answer) if answer == "no" => {
                tracing::debug!(file = %block.source_file, "dropping non-identity block");
                return BlockResult::NotIdentity;
            }
            Some(_) => {}
            None => {
                tracing::warn!(
                    file = %block.source_file,
                    "identity check unavailable, keeping block as a signal"
                );
                degraded = true;
            }
        }

        let dimensions: Vec<&str> = Dimension::CLASSIFIABLE
            .iter()
            .chain([Dimension::Unclassified].iter())
            .map(|d| d.as_str())
            .collect();
        let stances: Vec<&str> = Stance::ALL.iter().map(|s| s.as_str()).collect();
        let importances: Vec<&str> = Importance::ALL.iter().map(|i| i.as_str()).collect();

        let (dimension, stance, importance) = tokio::join!(
            self.classify(ClassifyTask::Dimension, text, &dimensions),
            self.classify(ClassifyTask::Stance, text, &stances),
            self.classify(ClassifyTask::Importance, text, &importances),
        );

        let mut signal = Signal::from_block(block);
        match dimension.as_deref().and_then(Dimension::parse) {
            Some(d) => signal.dimension = d,
            None => degraded = true,
        }
        match stance.as_deref().and_then(Stance::parse) {
            Some(s) => signal.stance = s,
            None => degraded = true,
        }
        match importance.as_deref().and_then(Importance::parse) {
            Some(i) => signal.importance = i,
            None => degraded = true,
        }
        if degraded {
            tracing::warn!(
                file = %block.source_file,
                signal = %signal.id,
                "classification fell back to defaults"
            );
        }

        if self.options.generalize && self.capability.supports(GenerateTask::Generalize) {
            signal.generalized_text = self
                .capability
                .generate(GenerateTask::Generalize, &[text], prompt::generalize(text), |reply| {
                    let line = reply.lines().map(str::trim).find(|l| !l.is_empty())?;
                    Some(line.trim_matches('"').to_string())
                })
                .await;
            if signal.generalized_text.is_none() {
                self.degradation.record(Stage::Generalization);
            }
        }

        BlockResult::Signal { signal, degraded }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{FixtureProvider, RetryPolicy};
    use std::time::Duration;

    fn extractor(
        provider: FixtureProvider,
        concurrency: usize,
        generalize: bool,
    ) -> (SignalExtractor, Arc<DegradationCounter>) {
        let degradation = Arc::new(DegradationCounter::new());
        let cap = ReliableCapability::new(Arc::new(provider), RetryPolicy::immediate(1));
        let options = ExtractorOptions {
            concurrency: NonZeroUsize::new(concurrency).unwrap(),
            generalize,
        };
        (SignalExtractor::new(cap, degradation.clone(), options), degradation)
    }

    fn blocks(texts: &[&str]) -> Vec<SourceBlock> {
        texts.iter().map(|t| SourceBlock::new(*t, "notes.md")).collect()
    }

    #[tokio::test]
    async fn test_non_identity_blocks_are_dropped() {
        let provider = FixtureProvider::new()
            .classify_when(ClassifyTask::IdentityBearing, "weather", "no")
            .classify_when(ClassifyTask::Stance, "wonder", "question");
        let (ex, degradation) = extractor(provider, 2, false);
        let out = ex
            .extract(&blocks(&["I value honesty", "The weather is nice", "I wonder if I am kind"]))
            .await;
        assert_eq!(out.signals.len(), 2);
        assert_eq!(out.dropped_non_identity, 1);
        assert_eq!(out.signals[1].stance, Stance::Question);
        assert_eq!(out.signals[0].dimension, Dimension::IdentityCore);
        assert_eq!(degradation.snapshot().total(), 0);
    }

    #[tokio::test]
    async fn test_failure_on_one_block_does_not_abort_batch() {
        let provider = FixtureProvider::new().fail_classify_when("broken");
        let (ex, degradation) = extractor(provider, 4, false);
        let out = ex
            .extract(&blocks(&["I value honesty", "this block is broken", "I keep promises"]))
            .await;
        assert_eq!(out.signals.len(), 3);
        assert_eq!(out.degraded_signals, 1);
        let broken = &out.signals[1];
        assert_eq!(broken.dimension, Dimension::Unclassified);
        assert_eq!(broken.stance, Stance::Assert);
        assert_eq!(broken.importance, Importance::Supporting);
        // identity, dimension, stance, importance
        assert_eq!(degradation.snapshot().classification, 4);
    }

    #[tokio::test]
    async fn test_order_preserved_under_concurrency() {
        let provider = FixtureProvider::new().with_latency(Duration::from_millis(5));
        let (ex, _) = extractor(provider, 8, false);
        let texts: Vec<String> = (0..20).map(|i| format!("I value thing number {i}")).collect();
        let input: Vec<SourceBlock> = texts.iter().map(|t| SourceBlock::new(t, "n.md")).collect();
        let out = ex.extract(&input).await;
        let got: Vec<&str> = out.signals.iter().map(|s| s.text.as_str()).collect();
        let want: Vec<&str> = texts.iter().map(String::as_str).collect();
        assert_eq!(got, want);
    }

    #[tokio::test]
    async fn test_ids_unique_across_parallel_batch() {
        let (ex, _) = extractor(FixtureProvider::new(), 16, false);
        let input = blocks(&["I value honesty"; 200]);
        let out = ex.extract(&input).await;
        let ids: std::collections::HashSet<_> = out.signals.iter().map(|s| s.id).collect();
        assert_eq!(ids.len(), 200);
    }

    #[tokio::test]
    async fn test_generalization_when_enabled() {
        let provider = FixtureProvider::new().generalize_with(|s| format!("Values: {s}"));
        let (ex, _) = extractor(provider, 1, true);
        let out = ex.extract(&blocks(&["I value honesty"])).await;
        assert_eq!(
            out.signals[0].generalized_text.as_deref(),
            Some("Values: I value honesty")
        );
    }

    #[tokio::test]
    async fn test_generalization_skipped_when_unsupported() {
        let (ex, degradation) = extractor(FixtureProvider::new(), 1, true);
        let out = ex.extract(&blocks(&["I value honesty"])).await;
        assert!(out.signals[0].generalized_text.is_none());
        assert_eq!(degradation.snapshot().generalization, 0);
    }
}
