//! Incremental clusterer: signals in, principles out.
//!
//! Clustering is strictly sequential. Each `add_signal` depends on the
//! principles created by the ones before it, so signals must arrive in
//! extraction order for runs to be reproducible.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capability::ReliableCapability;
use crate::principle::Principle;
use crate::report::{DegradationCounter, Stage};
use crate::scoring::{CentralityThresholds, ScoringStrategy};
use crate::signal::Signal;

#[derive(Clone, Debug, PartialEq)]
pub enum AddOutcome {
    Created(Uuid),
    Reinforced { principle: Uuid, similarity: f64 },
    /// The signal id was already incorporated; nothing changed.
    AlreadySeen(Uuid),
}

impl AddOutcome {
    pub fn principle_id(&self) -> Uuid {
        match self {
            Self::Created(id) | Self::AlreadySeen(id) => *id,
            Self::Reinforced { principle, .. } => *principle,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Merge {
    pub survivor: Uuid,
    pub absorbed: Uuid,
    pub similarity: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub merges: Vec<Merge>,
    pub comparisons: usize,
}

impl MergeReport {
    /// Where a principle id ended up after all merges.
    pub fn resolve(&self, mut id: Uuid) -> Uuid {
        let forward: HashMap<Uuid, Uuid> =
            self.merges.iter().map(|m| (m.absorbed, m.survivor)).collect();
        while let Some(next) = forward.get(&id) {
            id = *next;
        }
        id
    }
}

pub struct PrincipleStore {
    principles: Vec<Principle>,
    seen: HashSet<Uuid>,
    capability: ReliableCapability,
    scoring: Arc<dyn ScoringStrategy>,
    thresholds: CentralityThresholds,
    match_threshold: f64,
    degradation: Arc<DegradationCounter>,
}

impl PrincipleStore {
    pub fn new(
        capability: ReliableCapability,
        scoring: Arc<dyn ScoringStrategy>,
        thresholds: CentralityThresholds,
        match_threshold: f64,
        degradation: Arc<DegradationCounter>,
    ) -> Self {
        Self {
            principles: Vec::new(),
            seen: HashSet::new(),
            capability,
            scoring,
            thresholds,
            match_threshold,
            degradation,
        }
    }

    /// Seed the store with principles from an earlier run. Member ids go into
    /// the seen-set so replayed signals are recognised; records whose counts
    /// disagree with their member lists are repaired and reported.
    pub fn restore(&mut self, principles: Vec<Principle>) {
        for mut p in principles {
            if p.n_count != p.derived_from.len() {
                tracing::warn!(
                    principle = %p.id,
                    recorded = p.n_count,
                    actual = p.derived_from.len(),
                    "repairing principle with inconsistent signal count"
                );
                self.degradation.record(Stage::MalformedRecord);
            }
            if p.derived_from.is_empty() {
                tracing::warn!(principle = %p.id, "dropping restored principle without signals");
                self.degradation.record(Stage::MalformedRecord);
                continue;
            }
            p.recount();
            p.update_centrality(&self.thresholds);
            self.seen.extend(p.signal_ids());
            self.principles.push(p);
        }
    }

    pub fn principles(&self) -> &[Principle] {
        &self.principles
    }

    pub fn into_principles(self) -> Vec<Principle> {
        self.principles
    }

    pub fn len(&self) -> usize {
        self.principles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.principles.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&Principle> {
        self.principles.iter().find(|p| p.id == id)
    }

    fn position_of_signal(&self, signal_id: Uuid) -> Option<usize> {
        self.principles.iter().position(|p| p.contains(signal_id))
    }

    async fn similarity(&self, a: &str, b: &str) -> f64 {
        match self.capability.compare(a, b).await {
            Some(score) => score,
            None => {
                self.degradation.record(Stage::Similarity);
                0.0
            }
        }
    }

    /// Incorporate one signal: reinforce the best-matching principle at or
    /// above the match threshold, or start a new one.
    pub async fn add_signal(&mut self, signal: &Signal) -> AddOutcome {
        if !self.seen.insert(signal.id) {
            let owner = self
                .position_of_signal(signal.id)
                .map(|i| self.principles[i].id)
                .unwrap_or(signal.id);
            tracing::debug!(signal = %signal.id, "signal already incorporated");
            return AddOutcome::AlreadySeen(owner);
        }

        let weight = self.scoring.weigh(signal);
        let text = signal.comparable_text();

        let mut best: Option<(usize, f64)> = None;
        for i in 0..self.principles.len() {
            let score = self.similarity(text, &self.principles[i].representative_text).await;
            // Earlier principles win ties.
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((i, score));
            }
        }

        match best {
            Some((i, score)) if score >= self.match_threshold => {
                let p = &mut self.principles[i];
                p.reinforce(signal, weight, score);
                p.update_centrality(&self.thresholds);
                AddOutcome::Reinforced {
                    principle: p.id,
                    similarity: score,
                }
            }
            _ => {
                let mut p = Principle::new(signal, weight);
                p.update_centrality(&self.thresholds);
                let id = p.id;
                self.principles.push(p);
                AddOutcome::Created(id)
            }
        }
    }

    /// Merge principles whose representatives score at or above `threshold`
    /// until a full pass finds nothing left to merge. Running it again on the
    /// result is a no-op.
    pub async fn merge_similar_principles(&mut self, threshold: f64) -> MergeReport {
        let mut report = MergeReport::default();
        let mut scores: HashMap<(Uuid, Uuid), f64> = HashMap::new();

        'pass: loop {
            for i in 0..self.principles.len() {
                for j in (i + 1)..self.principles.len() {
                    let key = (self.principles[i].id, self.principles[j].id);
                    let score = match scores.get(&key) {
                        Some(s) => *s,
                        None => {
                            report.comparisons += 1;
                            let s = self
                                .similarity(
                                    &self.principles[i].representative_text,
                                    &self.principles[j].representative_text,
                                )
                                .await;
                            scores.insert(key, s);
                            s
                        }
                    };
                    if score < threshold {
                        continue;
                    }

                    // Heavier aggregate survives; the earlier one on a tie.
                    let (keep, drop) = if self.principles[j].weight > self.principles[i].weight {
                        (j, i)
                    } else {
                        (i, j)
                    };
                    let absorbed = self.principles.remove(drop);
                    let keep = if drop < keep { keep - 1 } else { keep };
                    tracing::debug!(
                        survivor = %self.principles[keep].id,
                        absorbed = %absorbed.id,
                        score,
                        "merging principles"
                    );
                    report.merges.push(Merge {
                        survivor: self.principles[keep].id,
                        absorbed: absorbed.id,
                        similarity: score,
                    });
                    self.principles[keep].absorb(absorbed);
                    self.principles[keep].update_centrality(&self.thresholds);
                    continue 'pass;
                }
            }
            break;
        }

        report
    }
}
