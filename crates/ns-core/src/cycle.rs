//! Run lifecycle: lock, decide the mode, run one reflection pass, commit.
//!
//! ```text
//! (no state) ──▶ initial ──▶ incremental ◀──┐
//!                    │            │         │
//!                    └──────▶ full-resynthesis
//! ```
//!
//! The lock is held for the whole run and released on every exit path. A run
//! that fails or is cancelled before commit leaves the persisted state as it
//! was.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::axiom::Axiom;
use crate::capability::{Capability, ReliableCapability};
use crate::compressor::CompressionMetrics;
use crate::config::{ConfigError, CycleConfig, SynthesisConfig};
use crate::constants::STATE_SCHEMA_VERSION;
use crate::persistence::{LockAcquisition, Persistence, PersistenceError, RunArtifacts};
use crate::reflection::{Cancelled, ReflectionInput, ReflectionLoop};
use crate::report::{BaselineComparison, DegradationCounter, RunReport, Stage};
use crate::scoring::{MultiplicativeScoring, ScoringStrategy};
use crate::signal::{Signal, SourceBlock};
use crate::tension::Severity;
use crate::time::now_iso8601;
use crate::tokenizer::normalize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CycleMode {
    #[default]
    Initial,
    Incremental,
    FullResynthesis,
}

impl CycleMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Incremental => "incremental",
            Self::FullResynthesis => "full-resynthesis",
        }
    }
}

impl fmt::Display for CycleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a mode was chosen.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ModeTrigger {
    Forced,
    NoPriorState,
    SchemaChanged { found: u32 },
    ContentDelta(f64),
    Contradictions(u32),
    WithinThresholds,
}

impl fmt::Display for ModeTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forced => write!(f, "resynthesis forced by caller"),
            Self::NoPriorState => write!(f, "no prior state"),
            Self::SchemaChanged { found } => write!(
                f,
                "state schema v{found} differs from v{STATE_SCHEMA_VERSION}"
            ),
            Self::ContentDelta(d) => write!(f, "content delta {:.0}% reached threshold", d * 100.0),
            Self::Contradictions(n) => write!(f, "{n} accumulated contradictions reached limit"),
            Self::WithinThresholds => write!(f, "changes within incremental thresholds"),
        }
    }
}

/// Persisted between runs. Only the lock holder writes it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CycleState {
    pub schema_version: u32,
    pub workspace_id: String,
    /// The committed run. Artifacts of any other run id are ignored.
    pub last_run_id: Option<Uuid>,
    pub last_run_at: String,
    pub mode: CycleMode,
    /// Hashes of every source block seen by the committed run.
    pub source_hashes: BTreeSet<String>,
    pub source_bytes: u64,
    /// New high-severity tensions accumulated since the last full pass.
    pub contradiction_count: u32,
    /// Lock owner recorded with the state. Committed states carry `None`:
    /// the lock is released as soon as the commit lands, and the lock file
    /// is the only authority on who holds it.
    pub lock_owner_pid: Option<u32>,
    /// Committed run ids, newest last.
    pub run_history: Vec<Uuid>,
    pub run_count: u64,
}

impl CycleState {
    pub fn new(workspace_id: &str) -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            workspace_id: workspace_id.to_string(),
            last_run_at: crate::time::EPOCH_ISO8601.to_string(),
            ..Self::default()
        }
    }
}

/// Share of current source bytes not present in the prior run, in [0, 1].
pub fn content_delta(blocks: &[SourceBlock], prior_hashes: &BTreeSet<String>) -> f64 {
    let mut total = 0usize;
    let mut fresh = 0usize;
    for block in blocks {
        let bytes = block.text.len();
        total += bytes;
        if !prior_hashes.contains(&block.content_hash()) {
            fresh += bytes;
        }
    }
    fresh as f64 / total.max(1) as f64
}

pub fn decide_mode(
    state: Option<&CycleState>,
    delta: f64,
    config: &CycleConfig,
    force: bool,
) -> (CycleMode, ModeTrigger) {
    if force {
        return (CycleMode::FullResynthesis, ModeTrigger::Forced);
    }
    let Some(state) = state.filter(|s| s.last_run_id.is_some()) else {
        return (CycleMode::Initial, ModeTrigger::NoPriorState);
    };
    if state.schema_version != STATE_SCHEMA_VERSION {
        return (
            CycleMode::FullResynthesis,
            ModeTrigger::SchemaChanged {
                found: state.schema_version,
            },
        );
    }
    if delta >= config.resynthesis_delta {
        return (CycleMode::FullResynthesis, ModeTrigger::ContentDelta(delta));
    }
    if state.contradiction_count >= config.contradiction_limit {
        return (
            CycleMode::FullResynthesis,
            ModeTrigger::Contradictions(state.contradiction_count),
        );
    }
    (CycleMode::Incremental, ModeTrigger::WithinThresholds)
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("another run holds the workspace lock (pid {owner_pid})")]
    LockHeld { owner_pid: u32 },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("run cancelled before commit")]
    Cancelled,
}

impl From<Cancelled> for CycleError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

impl CycleError {
    /// Run-aborting failures, as opposed to "try again later".
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Persistence(_))
    }
}

#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    pub force_resynthesis: bool,
    pub cancel: CancellationToken,
}

#[derive(Clone, Debug)]
pub struct CycleOutcome {
    pub axioms: Vec<Axiom>,
    pub blocked: Vec<Axiom>,
    pub report: RunReport,
    pub state: CycleState,
}

/// Releases the workspace lock when dropped.
struct RunLock<'a> {
    persistence: &'a dyn Persistence,
    workspace_id: &'a str,
}

impl Drop for RunLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.persistence.release_lock(self.workspace_id) {
            tracing::warn!(workspace = self.workspace_id, "failed to release run lock: {e}");
        }
    }
}

pub struct CycleManager {
    persistence: Arc<dyn Persistence>,
    capability: Arc<dyn Capability>,
    scoring: Arc<dyn ScoringStrategy>,
    config: SynthesisConfig,
}

impl CycleManager {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        capability: Arc<dyn Capability>,
        config: SynthesisConfig,
    ) -> Self {
        let scoring = Arc::new(MultiplicativeScoring::new(config.scoring.clone()));
        Self {
            persistence,
            capability,
            scoring,
            config,
        }
    }

    pub fn with_scoring(mut self, scoring: Arc<dyn ScoringStrategy>) -> Self {
        self.scoring = scoring;
        self
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    fn lock(&self, workspace_id: &'_ str) -> Result<(), CycleError> {
        match self.persistence.acquire_lock(workspace_id)? {
            LockAcquisition::Acquired => Ok(()),
            LockAcquisition::Reclaimed { stale_pid } => {
                tracing::warn!(
                    workspace = workspace_id,
                    stale_pid,
                    "recovered from crash: reclaimed lock of dead process"
                );
                Ok(())
            }
            LockAcquisition::Held { owner_pid } => Err(CycleError::LockHeld { owner_pid }),
        }
    }

    pub async fn run_cycle(
        &self,
        workspace_id: &str,
        blocks: Vec<SourceBlock>,
        options: RunOptions,
    ) -> Result<CycleOutcome, CycleError> {
        self.config.validate()?;
        self.lock(workspace_id)?;
        let _guard = RunLock {
            persistence: self.persistence.as_ref(),
            workspace_id,
        };

        let started_at = now_iso8601();
        let run_id = Uuid::new_v4();
        let prior = self.persistence.load_state(workspace_id)?;
        let prior_hashes = prior.as_ref().map(|s| s.source_hashes.clone()).unwrap_or_default();
        let delta = content_delta(&blocks, &prior_hashes);
        let (mode, trigger) = decide_mode(
            prior.as_ref(),
            delta,
            &self.config.cycle,
            options.force_resynthesis,
        );
        tracing::info!(workspace = workspace_id, %run_id, %mode, reason = %trigger, "starting run");

        let prior_run = prior.as_ref().and_then(|s| s.last_run_id);
        let mut input = ReflectionInput::default();
        let mut carried_signals: Vec<Signal> = Vec::new();
        let mut baseline: Option<(Uuid, Vec<Axiom>)> = None;

        // Start the malformed-row tally at this run's loads.
        self.persistence.take_skipped_records(workspace_id);
        match (mode, prior_run) {
            (CycleMode::Incremental, Some(last)) => {
                carried_signals = self.persistence.load_signals(workspace_id, last)?;
                input.prior_principles = self.persistence.load_principles(workspace_id, last)?;
                input.prior_tensions = self.persistence.load_tensions(workspace_id, last)?;
                input.blocks = blocks
                    .iter()
                    .filter(|b| !prior_hashes.contains(&b.content_hash()))
                    .cloned()
                    .collect();
            }
            (CycleMode::FullResynthesis, Some(last)) => {
                baseline = Some((last, self.persistence.load_axioms(workspace_id, last)?));
                input.blocks = blocks.clone();
            }
            _ => input.blocks = blocks.clone(),
        }
        let blocks_new = input.blocks.len();

        let degradation = Arc::new(DegradationCounter::new());
        let skipped = self.persistence.take_skipped_records(workspace_id);
        if skipped > 0 {
            tracing::warn!(workspace = workspace_id, skipped, "prior run had malformed rows");
            degradation.record_many(Stage::MalformedRecord, skipped);
        }
        let reflection = ReflectionLoop::new(
            ReliableCapability::new(self.capability.clone(), self.config.retry_policy()),
            self.scoring.clone(),
            &self.config,
            degradation.clone(),
        )?;
        let prior_pairs = crate::reflection::tension_pairs(&input.prior_tensions);
        let output = reflection.run(input, &options.cancel).await?;

        let new_high = output
            .new_tensions
            .iter()
            .filter(|t| t.severity == Severity::High && !prior_pairs.contains(&t.pair()))
            .count() as u32;
        let contradiction_count = match mode {
            CycleMode::Incremental => prior.as_ref().map_or(0, |s| s.contradiction_count) + new_high,
            _ => 0,
        };

        let mut signals = carried_signals;
        signals.extend(output.new_signals.iter().cloned());
        let signal_chars: usize = signals.iter().map(|s| s.text.chars().count()).sum();

        let mut blocked_by_reason: BTreeMap<String, usize> = BTreeMap::new();
        for b in &output.blocked {
            if let Some(reason) = b.block_reason {
                *blocked_by_reason.entry(reason.as_str().to_string()).or_default() += 1;
            }
        }

        let mut report = RunReport {
            run_id,
            workspace_id: workspace_id.to_string(),
            mode,
            started_at,
            finished_at: now_iso8601(),
            blocks_scanned: blocks.len(),
            blocks_new,
            content_delta: delta,
            signals_extracted: output.new_signals.len(),
            signals_total: signals.len(),
            dropped_non_identity: output.dropped_non_identity,
            degraded_signals: output.degraded_signals,
            principles: output.principles.len(),
            merges: output.merges.merges.len(),
            tensions: output.tensions.len(),
            new_high_tensions: new_high as usize,
            contradiction_count,
            promoted: output.axioms.len(),
            below_threshold: output.below_threshold,
            blocked: blocked_by_reason,
            degradation: degradation.snapshot(),
            metrics: CompressionMetrics::compute(&output.principles, signal_chars, &output.axioms),
            baseline: baseline.map(|(id, prev)| compare_baseline(id, &prev, &output.axioms)),
            status: Default::default(),
            notes: vec![format!("mode {mode}: {trigger}")],
        };
        report.finalize();

        if options.cancel.is_cancelled() {
            return Err(CycleError::Cancelled);
        }

        let mut all_axioms = output.axioms.clone();
        all_axioms.extend(output.blocked.iter().cloned());
        self.persistence.save_run(
            workspace_id,
            &RunArtifacts {
                run_id,
                report: report.clone(),
                signals,
                principles: output.principles,
                axioms: all_axioms,
                tensions: output.tensions,
            },
        )?;

        let mut history = prior.as_ref().map(|s| s.run_history.clone()).unwrap_or_default();
        history.push(run_id);
        let excess = history.len().saturating_sub(self.config.cycle.keep_runs);
        history.drain(..excess);

        let state = CycleState {
            schema_version: STATE_SCHEMA_VERSION,
            workspace_id: workspace_id.to_string(),
            last_run_id: Some(run_id),
            last_run_at: report.finished_at.clone(),
            mode,
            source_bytes: blocks.iter().map(|b| b.text.len() as u64).sum(),
            source_hashes: blocks.iter().map(SourceBlock::content_hash).collect(),
            contradiction_count,
            // Released right after this commit; the lock file names any live owner.
            lock_owner_pid: None,
            run_history: history,
            run_count: prior.as_ref().map_or(0, |s| s.run_count) + 1,
        };
        self.persistence.save_state(workspace_id, &state)?;

        if let Err(e) = self.persistence.prune_runs(workspace_id, &state.run_history) {
            tracing::warn!(workspace = workspace_id, "pruning old runs failed: {e}");
        }

        tracing::info!(
            workspace = workspace_id,
            %run_id,
            promoted = report.promoted,
            blocked = report.blocked_total(),
            status = report.status.as_str(),
            "run committed"
        );

        Ok(CycleOutcome {
            axioms: output.axioms,
            blocked: output.blocked,
            report,
            state,
        })
    }
}

fn compare_baseline(previous_run: Uuid, previous: &[Axiom], current: &[Axiom]) -> BaselineComparison {
    let before: BTreeMap<String, &str> = previous
        .iter()
        .filter(|a| a.is_promoted())
        .map(|a| (normalize(a.text()), a.text()))
        .collect();
    let after: BTreeMap<String, &str> = current
        .iter()
        .map(|a| (normalize(a.text()), a.text()))
        .collect();
    let before_keys: HashSet<&String> = before.keys().collect();
    let after_keys: HashSet<&String> = after.keys().collect();

    BaselineComparison {
        previous_run_id: Some(previous_run),
        retained: after
            .iter()
            .filter(|(k, _)| before_keys.contains(k))
            .map(|(_, v)| v.to_string())
            .collect(),
        added: after
            .iter()
            .filter(|(k, _)| !before_keys.contains(k))
            .map(|(_, v)| v.to_string())
            .collect(),
        dropped: before
            .iter()
            .filter(|(k, _)| !after_keys.contains(k))
            .map(|(_, v)| v.to_string())
            .collect(),
    }
}
