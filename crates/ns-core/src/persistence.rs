//! Storage seam for the cycle manager.
//!
//! A run is committed in two steps: its artifacts are saved under a fresh run
//! id, then the cycle state naming that run id is saved atomically. Artifacts
//! of a run the state does not name are never read, so a crash between the
//! two steps leaves the previous run in force.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use uuid::Uuid;

use crate::axiom::Axiom;
use crate::cycle::CycleState;
use crate::principle::Principle;
use crate::report::RunReport;
use crate::signal::Signal;
use crate::tension::Tension;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("persistence failure: {0}")]
pub struct PersistenceError(pub String);

impl PersistenceError {
    pub fn new(msg: impl fmt::Display) -> Self {
        Self(msg.to_string())
    }
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockAcquisition {
    Acquired,
    /// The previous owner had died; its lock was taken over.
    Reclaimed { stale_pid: u32 },
    Held { owner_pid: u32 },
}

/// Everything one run writes besides the cycle state.
#[derive(Debug, Clone, Default)]
pub struct RunArtifacts {
    pub run_id: Uuid,
    pub report: RunReport,
    pub signals: Vec<Signal>,
    pub principles: Vec<Principle>,
    /// Promoted axioms and blocked candidates.
    pub axioms: Vec<Axiom>,
    pub tensions: Vec<Tension>,
}

pub trait Persistence: Send + Sync {
    fn load_state(&self, workspace_id: &str) -> PersistenceResult<Option<CycleState>>;

    /// Must be atomic: readers see the old state or the new one, never a mix.
    fn save_state(&self, workspace_id: &str, state: &CycleState) -> PersistenceResult<()>;

    fn load_signals(&self, workspace_id: &str, run_id: Uuid) -> PersistenceResult<Vec<Signal>>;
    fn save_signals(&self, workspace_id: &str, run_id: Uuid, signals: &[Signal])
    -> PersistenceResult<()>;

    fn load_principles(&self, workspace_id: &str, run_id: Uuid)
    -> PersistenceResult<Vec<Principle>>;
    fn save_principles(
        &self,
        workspace_id: &str,
        run_id: Uuid,
        principles: &[Principle],
    ) -> PersistenceResult<()>;

    /// Promoted axioms and blocked candidates of one run.
    fn load_axioms(&self, workspace_id: &str, run_id: Uuid) -> PersistenceResult<Vec<Axiom>>;
    fn save_axioms(&self, workspace_id: &str, run_id: Uuid, axioms: &[Axiom])
    -> PersistenceResult<()>;

    fn load_tensions(&self, workspace_id: &str, run_id: Uuid) -> PersistenceResult<Vec<Tension>>;
    fn save_tensions(&self, workspace_id: &str, run_id: Uuid, tensions: &[Tension])
    -> PersistenceResult<()>;

    fn load_report(&self, workspace_id: &str, run_id: Uuid) -> PersistenceResult<Option<RunReport>>;
    fn save_report(&self, workspace_id: &str, report: &RunReport) -> PersistenceResult<()>;

    /// Write all artifacts of a run. Backends with transactions should
    /// override this to write them in one.
    fn save_run(&self, workspace_id: &str, run: &RunArtifacts) -> PersistenceResult<()> {
        self.save_report(workspace_id, &run.report)?;
        self.save_signals(workspace_id, run.run_id, &run.signals)?;
        self.save_principles(workspace_id, run.run_id, &run.principles)?;
        self.save_axioms(workspace_id, run.run_id, &run.axioms)?;
        self.save_tensions(workspace_id, run.run_id, &run.tensions)
    }

    /// Drop artifacts of every run not in `keep`.
    fn prune_runs(&self, _workspace_id: &str, _keep: &[Uuid]) -> PersistenceResult<()> {
        Ok(())
    }

    /// Rows dropped as malformed by loads since the previous call. Backends
    /// that never drop rows keep the default.
    fn take_skipped_records(&self, _workspace_id: &str) -> usize {
        0
    }

    fn acquire_lock(&self, workspace_id: &str) -> PersistenceResult<LockAcquisition>;
    fn release_lock(&self, workspace_id: &str) -> PersistenceResult<()>;
}

#[derive(Debug, Default)]
struct MemoryWorkspace {
    state: Option<CycleState>,
    runs: HashMap<Uuid, RunArtifacts>,
    lock_owner: Option<u32>,
}

/// In-process backend for tests and dry runs. The lock has no liveness
/// check: a held lock stays held until released.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    workspaces: Mutex<HashMap<String, MemoryWorkspace>>,
    fail_writes: Mutex<bool>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().unwrap_or_else(|e| e.into_inner()) = fail;
    }

    /// Mark the workspace lock as held by `pid`.
    pub fn hold_lock(&self, workspace_id: &str, pid: u32) {
        self.with(workspace_id, |ws| ws.lock_owner = Some(pid));
    }

    pub fn lock_owner(&self, workspace_id: &str) -> Option<u32> {
        self.with(workspace_id, |ws| ws.lock_owner)
    }

    pub fn run_ids(&self, workspace_id: &str) -> Vec<Uuid> {
        self.with(workspace_id, |ws| ws.runs.keys().copied().collect())
    }

    fn with<T>(&self, workspace_id: &str, f: impl FnOnce(&mut MemoryWorkspace) -> T) -> T {
        let mut all = self.workspaces.lock().unwrap_or_else(|e| e.into_inner());
        f(all.entry(workspace_id.to_string()).or_default())
    }

    fn check_writable(&self) -> PersistenceResult<()> {
        if *self.fail_writes.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(PersistenceError::new("store is read-only"));
        }
        Ok(())
    }

    fn write_run(
        &self,
        workspace_id: &str,
        run_id: Uuid,
        f: impl FnOnce(&mut RunArtifacts),
    ) -> PersistenceResult<()> {
        self.check_writable()?;
        self.with(workspace_id, |ws| {
            let run = ws.runs.entry(run_id).or_insert_with(|| RunArtifacts {
                run_id,
                ..RunArtifacts::default()
            });
            f(run);
        });
        Ok(())
    }

    fn read_run<T: Default>(
        &self,
        workspace_id: &str,
        run_id: Uuid,
        f: impl FnOnce(&RunArtifacts) -> T,
    ) -> T {
        self.with(workspace_id, |ws| ws.runs.get(&run_id).map(f).unwrap_or_default())
    }
}

impl Persistence for MemoryPersistence {
    fn load_state(&self, workspace_id: &str) -> PersistenceResult<Option<CycleState>> {
        Ok(self.with(workspace_id, |ws| ws.state.clone()))
    }

    fn save_state(&self, workspace_id: &str, state: &CycleState) -> PersistenceResult<()> {
        self.check_writable()?;
        self.with(workspace_id, |ws| ws.state = Some(state.clone()));
        Ok(())
    }

    fn load_signals(&self, workspace_id: &str, run_id: Uuid) -> PersistenceResult<Vec<Signal>> {
        Ok(self.read_run(workspace_id, run_id, |r| r.signals.clone()))
    }

    fn save_signals(
        &self,
        workspace_id: &str,
        run_id: Uuid,
        signals: &[Signal],
    ) -> PersistenceResult<()> {
        self.write_run(workspace_id, run_id, |r| r.signals = signals.to_vec())
    }

    fn load_principles(
        &self,
        workspace_id: &str,
        run_id: Uuid,
    ) -> PersistenceResult<Vec<Principle>> {
        Ok(self.read_run(workspace_id, run_id, |r| r.principles.clone()))
    }

    fn save_principles(
        &self,
        workspace_id: &str,
        run_id: Uuid,
        principles: &[Principle],
    ) -> PersistenceResult<()> {
        self.write_run(workspace_id, run_id, |r| r.principles = principles.to_vec())
    }

    fn load_axioms(&self, workspace_id: &str, run_id: Uuid) -> PersistenceResult<Vec<Axiom>> {
        Ok(self.read_run(workspace_id, run_id, |r| r.axioms.clone()))
    }

    fn save_axioms(&self, workspace_id: &str, run_id: Uuid, axioms: &[Axiom]) -> PersistenceResult<()> {
        self.write_run(workspace_id, run_id, |r| r.axioms = axioms.to_vec())
    }

    fn load_tensions(&self, workspace_id: &str, run_id: Uuid) -> PersistenceResult<Vec<Tension>> {
        Ok(self.read_run(workspace_id, run_id, |r| r.tensions.clone()))
    }

    fn save_tensions(
        &self,
        workspace_id: &str,
        run_id: Uuid,
        tensions: &[Tension],
    ) -> PersistenceResult<()> {
        self.write_run(workspace_id, run_id, |r| r.tensions = tensions.to_vec())
    }

    fn load_report(&self, workspace_id: &str, run_id: Uuid) -> PersistenceResult<Option<RunReport>> {
        Ok(self.with(workspace_id, |ws| ws.runs.get(&run_id).map(|r| r.report.clone())))
    }

    fn save_report(&self, workspace_id: &str, report: &RunReport) -> PersistenceResult<()> {
        self.write_run(workspace_id, report.run_id, |r| r.report = report.clone())
    }

    fn prune_runs(&self, workspace_id: &str, keep: &[Uuid]) -> PersistenceResult<()> {
        self.check_writable()?;
        self.with(workspace_id, |ws| ws.runs.retain(|id, _| keep.contains(id)));
        Ok(())
    }

    fn acquire_lock(&self, workspace_id: &str) -> PersistenceResult<LockAcquisition> {
        let pid = std::process::id();
        Ok(self.with(workspace_id, |ws| match ws.lock_owner {
            Some(owner_pid) => LockAcquisition::Held { owner_pid },
            None => {
                ws.lock_owner = Some(pid);
                LockAcquisition::Acquired
            }
        }))
    }

    fn release_lock(&self, workspace_id: &str) -> PersistenceResult<()> {
        self.with(workspace_id, |ws| ws.lock_owner = None);
        Ok(())
    }
}
