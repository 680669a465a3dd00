//! Cycle manager runs against the file-backed store.

use std::path::Path;
use std::sync::{Arc, Barrier};

use ns_core::{
    Axiom, CycleManager, CycleMode, CycleState, FixtureProvider, LockAcquisition, Persistence,
    PersistenceError, PersistenceResult, Principle, RunArtifacts, RunOptions, RunReport, RunStatus,
    Signal, SourceBlock, SourceCategory, SynthesisConfig, Tension,
};
use ns_store::{WorkspaceStore, lock};
use uuid::Uuid;

const WS: &str = "acme_notes";

fn config() -> SynthesisConfig {
    let mut config = SynthesisConfig::default();
    config.capability.max_retries = 0;
    config.capability.backoff_ms = 0;
    config
}

fn provider() -> Arc<FixtureProvider> {
    Arc::new(FixtureProvider::new().similarity("truth", "truth", 0.95))
}

fn blocks(texts: &[&str]) -> Vec<SourceBlock> {
    texts
        .iter()
        .map(|t| {
            SourceBlock::new(*t, "memory/notes.md")
                .with_category(SourceCategory::External)
                .with_timestamp("2026-03-01T09:00:00Z")
        })
        .collect()
}

const FIRST: [&str; 5] = [
    "I tell the truth even when it is awkward",
    "Telling the truth is how I earn trust",
    "The truth matters more than looking good",
    "Quiet mornings help me think",
    "Long walks settle my thoughts",
];

const ADDED: [&str; 3] = [
    "Generosity with time is something I practise deliberately",
    "I would rather ask a clumsy question than pretend to understand",
    "Finishing what I start is a promise I make to myself",
];

async fn run(store: Arc<WorkspaceStore>, texts: &[&str]) -> ns_core::CycleOutcome {
    CycleManager::new(store, provider(), config())
        .run_cycle(WS, blocks(texts), RunOptions::default())
        .await
        .unwrap()
}

/// Scenario 4: a large change triggers a full resynthesis that commits
/// atomically and releases the lock.
#[tokio::test]
async fn large_change_resynthesises_and_commits() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(WorkspaceStore::open(dir.path()).unwrap());

    let first = run(store.clone(), &FIRST).await;
    assert_eq!(first.report.mode, CycleMode::Initial);
    assert_eq!(first.axioms.len(), 1);

    let texts: Vec<&str> = FIRST.iter().chain(ADDED.iter()).copied().collect();
    let second = run(store.clone(), &texts).await;
    assert_eq!(second.report.mode, CycleMode::FullResynthesis);
    assert!(second.report.content_delta >= 0.30);

    let paths = store.paths(WS);
    assert!(!paths.lock.exists(), "lock released");
    let on_disk = store.load_state(WS).unwrap().unwrap();
    assert_eq!(on_disk.last_run_id, Some(second.report.run_id));
    assert_eq!(on_disk, second.state);

    let baseline = second.report.baseline.unwrap();
    assert_eq!(baseline.previous_run_id, Some(first.report.run_id));
    assert_eq!(baseline.retained, vec![FIRST[0].to_string()]);

    assert_eq!(
        store.run_ids(WS).unwrap(),
        vec![first.report.run_id, second.report.run_id]
    );
}

#[tokio::test]
async fn incremental_run_resumes_from_a_fresh_store_instance() {
    let dir = tempfile::tempdir().unwrap();
    let first = run(Arc::new(WorkspaceStore::open(dir.path()).unwrap()), &FIRST).await;

    // A new process: nothing shared but the files.
    let store = Arc::new(WorkspaceStore::open(dir.path()).unwrap());
    let mut texts = FIRST.to_vec();
    texts.push("The truth is kind");
    let second = run(store.clone(), &texts).await;

    assert_eq!(second.report.mode, CycleMode::Incremental);
    assert_eq!(second.report.blocks_new, 1);
    assert_eq!(second.axioms.len(), 1);
    assert_eq!(second.axioms[0].n_count, 4);
    assert_eq!(
        second.axioms[0].derived_from.principles,
        first.axioms[0].derived_from.principles,
        "principle identity survives the round trip"
    );
    assert_eq!(store.load_signals(WS, second.report.run_id).unwrap().len(), 6);
}

#[tokio::test]
async fn malformed_carried_rows_are_counted_as_degradation() {
    let dir = tempfile::tempdir().unwrap();
    run(Arc::new(WorkspaceStore::open(dir.path()).unwrap()), &FIRST).await;

    let store = Arc::new(WorkspaceStore::open(dir.path()).unwrap());
    {
        let conn = rusqlite::Connection::open(store.paths(WS).db).unwrap();
        let id: String = conn
            .query_row("SELECT id FROM signals WHERE text = ?1", [FIRST[3]], |row| {
                row.get(0)
            })
            .unwrap();
        conn.execute_batch(&format!(
            "UPDATE signals SET id = 'garbled' WHERE id = '{id}';
             UPDATE run_signals SET signal_id = 'garbled' WHERE signal_id = '{id}';"
        ))
        .unwrap();
    }

    let mut texts = FIRST.to_vec();
    texts.push("The truth is kind");
    let second = run(store, &texts).await;

    assert_eq!(second.report.mode, CycleMode::Incremental);
    assert_eq!(second.report.degradation.malformed_records, 1);
    assert_eq!(second.report.status, RunStatus::Degraded);
}

#[tokio::test]
async fn old_runs_are_pruned_to_keep_runs() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(WorkspaceStore::open(dir.path()).unwrap());
    let mut cfg = config();
    cfg.cycle.keep_runs = 2;

    let mut last = None;
    for _ in 0..4 {
        let outcome = CycleManager::new(store.clone(), provider(), cfg.clone())
            .run_cycle(
                WS,
                blocks(&FIRST),
                RunOptions {
                    force_resynthesis: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        last = Some(outcome);
    }
    let last = last.unwrap();
    assert_eq!(last.state.run_history.len(), 2);
    assert_eq!(store.run_ids(WS).unwrap(), last.state.run_history);
    assert_eq!(last.state.run_count, 4);
}

/// Delegates to a real store but dies half-way through writing the state
/// file, the way a killed process would.
struct CrashOnStateWrite {
    inner: WorkspaceStore,
}

impl Persistence for CrashOnStateWrite {
    fn load_state(&self, ws: &str) -> PersistenceResult<Option<CycleState>> {
        self.inner.load_state(ws)
    }
    fn save_state(&self, ws: &str, state: &CycleState) -> PersistenceResult<()> {
        let json = serde_json::to_string_pretty(state).map_err(PersistenceError::new)?;
        let torn = &json[..json.len() / 2];
        let tmp = self.inner.paths(ws).state.with_extension("json.99999.tmp");
        std::fs::write(tmp, torn).map_err(PersistenceError::new)?;
        Err(PersistenceError::new("killed mid-write"))
    }
    fn load_signals(&self, ws: &str, run: Uuid) -> PersistenceResult<Vec<Signal>> {
        self.inner.load_signals(ws, run)
    }
    fn save_signals(&self, ws: &str, run: Uuid, v: &[Signal]) -> PersistenceResult<()> {
        self.inner.save_signals(ws, run, v)
    }
    fn load_principles(&self, ws: &str, run: Uuid) -> PersistenceResult<Vec<Principle>> {
        self.inner.load_principles(ws, run)
    }
    fn save_principles(&self, ws: &str, run: Uuid, v: &[Principle]) -> PersistenceResult<()> {
        self.inner.save_principles(ws, run, v)
    }
    fn load_axioms(&self, ws: &str, run: Uuid) -> PersistenceResult<Vec<Axiom>> {
        self.inner.load_axioms(ws, run)
    }
    fn save_axioms(&self, ws: &str, run: Uuid, v: &[Axiom]) -> PersistenceResult<()> {
        self.inner.save_axioms(ws, run, v)
    }
    fn load_tensions(&self, ws: &str, run: Uuid) -> PersistenceResult<Vec<Tension>> {
        self.inner.load_tensions(ws, run)
    }
    fn save_tensions(&self, ws: &str, run: Uuid, v: &[Tension]) -> PersistenceResult<()> {
        self.inner.save_tensions(ws, run, v)
    }
    fn load_report(&self, ws: &str, run: Uuid) -> PersistenceResult<Option<RunReport>> {
        self.inner.load_report(ws, run)
    }
    fn save_report(&self, ws: &str, report: &RunReport) -> PersistenceResult<()> {
        self.inner.save_report(ws, report)
    }
    fn save_run(&self, ws: &str, run: &RunArtifacts) -> PersistenceResult<()> {
        self.inner.save_run(ws, run)
    }
    fn acquire_lock(&self, ws: &str) -> PersistenceResult<LockAcquisition> {
        self.inner.acquire_lock(ws)
    }
    fn release_lock(&self, ws: &str) -> PersistenceResult<()> {
        self.inner.release_lock(ws)
    }
}

#[tokio::test]
async fn crash_mid_state_write_keeps_previous_commit() {
    let dir = tempfile::tempdir().unwrap();
    let first = run(Arc::new(WorkspaceStore::open(dir.path()).unwrap()), &FIRST).await;
    let state_path = WorkspaceStore::open(dir.path()).unwrap().paths(WS).state;
    let before = std::fs::read_to_string(&state_path).unwrap();

    let crashing = Arc::new(CrashOnStateWrite {
        inner: WorkspaceStore::open(dir.path()).unwrap(),
    });
    let texts: Vec<&str> = FIRST.iter().chain(ADDED.iter()).copied().collect();
    let err = CycleManager::new(crashing, provider(), config())
        .run_cycle(WS, blocks(&texts), RunOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_fatal());

    assert_eq!(std::fs::read_to_string(&state_path).unwrap(), before);

    // The orphaned run is written but never read; the next commit prunes it.
    let store = Arc::new(WorkspaceStore::open(dir.path()).unwrap());
    assert_eq!(store.run_ids(WS).unwrap().len(), 2);
    assert!(!store.paths(WS).lock.exists());
    let recovered = run(store.clone(), &FIRST).await;
    assert_eq!(recovered.report.mode, CycleMode::Incremental);
    assert_eq!(
        store.run_ids(WS).unwrap(),
        vec![first.report.run_id, recovered.report.run_id]
    );
}

#[test]
fn concurrent_acquire_has_exactly_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let path = Arc::new(dir.path().join("cycle.lock"));
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let path = path.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                lock::acquire(&path).unwrap()
            })
        })
        .collect();
    let outcomes: Vec<LockAcquisition> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let winners = outcomes
        .iter()
        .filter(|o| matches!(o, LockAcquisition::Acquired))
        .count();
    assert_eq!(winners, 1, "{outcomes:?}");
    assert!(outcomes.contains(&LockAcquisition::Held {
        owner_pid: std::process::id()
    }));
}

#[cfg(unix)]
#[tokio::test]
async fn dead_owner_lock_is_reclaimed_by_the_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(WorkspaceStore::open(dir.path()).unwrap());
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let dead = child.id();
    child.wait().unwrap();
    write_lock(&store.paths(WS).lock, dead);

    let outcome = run(store.clone(), &FIRST).await;
    assert_eq!(outcome.report.mode, CycleMode::Initial);
    assert!(!store.paths(WS).lock.exists());
}

#[tokio::test]
async fn live_owner_lock_blocks_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(WorkspaceStore::open(dir.path()).unwrap());
    write_lock(&store.paths(WS).lock, std::process::id());

    let err = CycleManager::new(store.clone(), provider(), config())
        .run_cycle(WS, blocks(&FIRST), RunOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ns_core::CycleError::LockHeld { owner_pid } if owner_pid == std::process::id()
    ));
    assert!(store.load_state(WS).unwrap().is_none());
}

fn write_lock(path: &Path, pid: u32) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, pid.to_string()).unwrap();
}
