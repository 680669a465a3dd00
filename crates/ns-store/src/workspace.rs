use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Mutex, MutexGuard};
use std::{env, fs};

use ns_core::{
    Axiom, CycleState, LockAcquisition, Persistence, PersistenceResult, Principle, RunArtifacts,
    RunReport, Signal, SynthesisConfig, Tension,
};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::store::SoulDb;
use crate::{lock, state};

pub const DATA_DIR_ENV: &str = "NEON_SOUL_DATA_DIR";
pub const CONFIG_FILE: &str = "neon-soul.toml";

/// `$NEON_SOUL_DATA_DIR`, else `~/.neon-soul`.
pub fn default_data_dir() -> PathBuf {
    env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| dirs_home().join(".neon-soul"))
}

fn dirs_home() -> PathBuf {
    env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

// ---------------------------------------------------------------------------
// Pure parsing helpers
// ---------------------------------------------------------------------------

/// Path portion of a `scheme://host/path` URL.
fn extract_url_path(url: &str) -> Option<&str> {
    let after_scheme = url.find("://").map(|i| &url[i + 3..])?;
    let after_host = after_scheme.find('/').map(|i| &after_scheme[i + 1..])?;
    if after_host.is_empty() {
        None
    } else {
        Some(after_host)
    }
}

/// `org_repo` from a git remote URL: SCP-style SSH, `ssh://` and `https://`
/// forms. Nested groups keep the last two segments.
fn parse_remote_url(url: &str) -> Option<String> {
    let colon_pos = url.find(':')?;
    let path = if url[..colon_pos].contains("//") || url[colon_pos..].starts_with("://") {
        extract_url_path(url)?
    } else {
        &url[colon_pos + 1..]
    };

    let path = path.trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    if path.is_empty() {
        return None;
    }

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let identity = match segments.as_slice() {
        [] => return None,
        [only] => only.to_string(),
        [.., org, repo] => format!("{org}_{repo}"),
    };
    Some(identity)
}

/// Make a name safe to use as a directory name.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Git probes
// ---------------------------------------------------------------------------

fn detect_git_root(from: &Path) -> Option<PathBuf> {
    let output = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(from)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!root.is_empty()).then(|| PathBuf::from(root))
}

fn detect_git_remote_identity(from: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["remote", "get-url", "origin"])
        .current_dir(from)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_remote_url(String::from_utf8_lossy(&output.stdout).trim())
}

/// Stable workspace id, in priority order: explicit id, git remote origin
/// (`org_repo`), git root basename, workspace directory basename.
pub fn resolve_workspace_id(explicit: Option<&str>, workspace: &Path) -> String {
    if let Some(name) = explicit {
        let sanitized = sanitize_name(name.trim());
        if !sanitized.is_empty() {
            return sanitized;
        }
    }

    if let Some(git_root) = detect_git_root(workspace) {
        if let Some(identity) = detect_git_remote_identity(&git_root) {
            return sanitize_name(&identity);
        }
        if let Some(basename) = git_root.file_name() {
            let name = sanitize_name(&basename.to_string_lossy());
            if !name.is_empty() {
                return name;
            }
        }
    }

    let absolute = workspace
        .canonicalize()
        .unwrap_or_else(|_| workspace.to_path_buf());
    absolute
        .file_name()
        .map(|n| sanitize_name(&n.to_string_lossy()))
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "unnamed".to_string())
}

/// `<workspace>/neon-soul.toml`; a missing file means defaults.
pub fn load_config(workspace: &Path) -> Result<SynthesisConfig> {
    let path = workspace.join(CONFIG_FILE);
    match fs::read_to_string(&path) {
        Ok(content) => {
            let config: SynthesisConfig = toml::from_str(&content)?;
            tracing::debug!(path = %path.display(), "loaded config");
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SynthesisConfig::default()),
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Per-workspace storage
// ---------------------------------------------------------------------------

/// Files of one workspace.
///
/// ```text
/// <data_dir>/workspaces/<workspace_id>/
/// ├── soul.db
/// ├── cycle-state.json
/// └── cycle.lock
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct WorkspacePaths {
    pub dir: PathBuf,
    pub db: PathBuf,
    pub state: PathBuf,
    pub lock: PathBuf,
}

impl WorkspacePaths {
    pub fn new(data_dir: &Path, workspace_id: &str) -> Self {
        let dir = data_dir
            .join("workspaces")
            .join(sanitize_name(workspace_id));
        Self {
            db: dir.join("soul.db"),
            state: dir.join("cycle-state.json"),
            lock: dir.join("cycle.lock"),
            dir,
        }
    }
}

/// File-backed [`Persistence`]: one SQLite database, state file and lock per
/// workspace under a shared data directory.
pub struct WorkspaceStore {
    data_dir: PathBuf,
    dbs: Mutex<HashMap<String, SoulDb>>,
}

impl WorkspaceStore {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let workspaces = data_dir.join("workspaces");
        fs::create_dir_all(&workspaces).map_err(|e| {
            StoreError::InvalidData(format!("failed to create {}: {e}", workspaces.display()))
        })?;
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            dbs: Mutex::new(HashMap::new()),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn paths(&self, workspace_id: &str) -> WorkspacePaths {
        WorkspacePaths::new(&self.data_dir, workspace_id)
    }

    fn ensure_dir(&self, workspace_id: &str) -> Result<WorkspacePaths> {
        let paths = self.paths(workspace_id);
        fs::create_dir_all(&paths.dir)?;
        Ok(paths)
    }

    fn dbs(&self) -> MutexGuard<'_, HashMap<String, SoulDb>> {
        self.dbs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_db<T>(&self, workspace_id: &str, f: impl FnOnce(&SoulDb) -> Result<T>) -> Result<T> {
        let mut dbs = self.dbs();
        if !dbs.contains_key(workspace_id) {
            let paths = self.ensure_dir(workspace_id)?;
            let db = SoulDb::open(&paths.db)?;
            tracing::debug!(path = %paths.db.display(), "opened soul.db");
            dbs.insert(workspace_id.to_string(), db);
        }
        match dbs.get(workspace_id) {
            Some(db) => f(db),
            None => Err(StoreError::InvalidData(format!(
                "database for workspace '{workspace_id}' unavailable"
            ))),
        }
    }

    /// PID in the workspace lock file and whether that process is alive.
    pub fn lock_owner(&self, workspace_id: &str) -> Option<(u32, bool)> {
        let pid = lock::read_owner(&self.paths(workspace_id).lock).ok()??;
        Some((pid, lock::is_process_alive(pid)))
    }

    pub fn run_ids(&self, workspace_id: &str) -> Result<Vec<Uuid>> {
        self.with_db(workspace_id, |db| db.run_ids())
    }
}

impl Persistence for WorkspaceStore {
    fn load_state(&self, workspace_id: &str) -> PersistenceResult<Option<CycleState>> {
        Ok(state::load_state(&self.paths(workspace_id).state)?)
    }

    fn save_state(&self, workspace_id: &str, state: &CycleState) -> PersistenceResult<()> {
        let paths = self.ensure_dir(workspace_id)?;
        lock::ensure_owner(&paths.lock, std::process::id())?;
        Ok(state::save_state(&paths.state, state)?)
    }

    fn load_signals(&self, workspace_id: &str, run_id: Uuid) -> PersistenceResult<Vec<Signal>> {
        Ok(self.with_db(workspace_id, |db| db.load_signals(run_id))?)
    }

    fn save_signals(
        &self,
        workspace_id: &str,
        run_id: Uuid,
        signals: &[Signal],
    ) -> PersistenceResult<()> {
        Ok(self.with_db(workspace_id, |db| db.save_signals(run_id, signals))?)
    }

    fn load_principles(
        &self,
        workspace_id: &str,
        run_id: Uuid,
    ) -> PersistenceResult<Vec<Principle>> {
        Ok(self.with_db(workspace_id, |db| db.load_principles(run_id))?)
    }

    fn save_principles(
        &self,
        workspace_id: &str,
        run_id: Uuid,
        principles: &[Principle],
    ) -> PersistenceResult<()> {
        Ok(self.with_db(workspace_id, |db| db.save_principles(run_id, principles))?)
    }

    fn load_axioms(&self, workspace_id: &str, run_id: Uuid) -> PersistenceResult<Vec<Axiom>> {
        Ok(self.with_db(workspace_id, |db| db.load_axioms(run_id))?)
    }

    fn save_axioms(&self, workspace_id: &str, run_id: Uuid, axioms: &[Axiom]) -> PersistenceResult<()> {
        Ok(self.with_db(workspace_id, |db| db.save_axioms(run_id, axioms))?)
    }

    fn load_tensions(&self, workspace_id: &str, run_id: Uuid) -> PersistenceResult<Vec<Tension>> {
        Ok(self.with_db(workspace_id, |db| db.load_tensions(run_id))?)
    }

    fn save_tensions(
        &self,
        workspace_id: &str,
        run_id: Uuid,
        tensions: &[Tension],
    ) -> PersistenceResult<()> {
        Ok(self.with_db(workspace_id, |db| db.save_tensions(run_id, tensions))?)
    }

    fn load_report(&self, workspace_id: &str, run_id: Uuid) -> PersistenceResult<Option<RunReport>> {
        Ok(self.with_db(workspace_id, |db| db.load_report(run_id))?)
    }

    fn save_report(&self, workspace_id: &str, report: &RunReport) -> PersistenceResult<()> {
        Ok(self.with_db(workspace_id, |db| db.save_report(report))?)
    }

    fn save_run(&self, workspace_id: &str, run: &RunArtifacts) -> PersistenceResult<()> {
        Ok(self.with_db(workspace_id, |db| db.save_run(run))?)
    }

    fn prune_runs(&self, workspace_id: &str, keep: &[Uuid]) -> PersistenceResult<()> {
        Ok(self.with_db(workspace_id, |db| db.prune_runs(keep).map(|_| ()))?)
    }

    fn take_skipped_records(&self, workspace_id: &str) -> usize {
        self.with_db(workspace_id, |db| Ok(db.take_skipped()))
            .unwrap_or_default()
    }

    fn acquire_lock(&self, workspace_id: &str) -> PersistenceResult<LockAcquisition> {
        let paths = self.ensure_dir(workspace_id)?;
        let outcome = lock::acquire(&paths.lock)?;
        tracing::debug!(workspace = workspace_id, ?outcome, "lock attempt");
        Ok(outcome)
    }

    fn release_lock(&self, workspace_id: &str) -> PersistenceResult<()> {
        Ok(lock::release(&self.paths(workspace_id).lock)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::open(dir.path()).unwrap();
        let paths = store.paths("acme_soul");
        assert_eq!(paths.dir, dir.path().join("workspaces/acme_soul"));
        assert_eq!(paths.db, paths.dir.join("soul.db"));
        assert_eq!(paths.state, paths.dir.join("cycle-state.json"));
        assert_eq!(paths.lock, paths.dir.join("cycle.lock"));
    }

    #[test]
    fn test_paths_cannot_escape_data_dir() {
        let paths = WorkspacePaths::new(Path::new("/data"), "../../etc");
        assert_eq!(paths.dir, PathBuf::from("/data/workspaces/______etc"));
    }

    #[test]
    fn test_db_created_on_first_use() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::open(dir.path()).unwrap();
        assert!(store.run_ids("ws").unwrap().is_empty());
        assert!(store.paths("ws").db.exists());
    }

    #[test]
    fn test_lock_roundtrip_through_trait() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::open(dir.path()).unwrap();
        assert_eq!(store.acquire_lock("ws").unwrap(), LockAcquisition::Acquired);
        assert_eq!(store.lock_owner("ws"), Some((std::process::id(), true)));
        store.release_lock("ws").unwrap();
        assert_eq!(store.lock_owner("ws"), None);
    }

    #[test]
    fn test_state_commit_requires_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::open(dir.path()).unwrap();
        let state = CycleState::new("ws");
        assert!(store.save_state("ws", &state).is_err());

        store.acquire_lock("ws").unwrap();
        // Lost to another process between acquire and commit.
        fs::write(store.paths("ws").lock, "4242").unwrap();
        assert!(store.save_state("ws", &state).is_err());
        assert!(!store.paths("ws").state.exists());

        fs::write(store.paths("ws").lock, std::process::id().to_string()).unwrap();
        store.save_state("ws", &state).unwrap();
        assert!(store.load_state("ws").unwrap().is_some());
    }

    #[test]
    fn test_missing_config_is_default() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            load_config(dir.path()).unwrap().promotion.n_threshold,
            SynthesisConfig::default().promotion.n_threshold
        );
    }

    #[test]
    fn test_partial_config_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "[clustering]\nmatch_threshold = 0.8\n\n[promotion]\nn_threshold = 4\n",
        )
        .unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.clustering.match_threshold, 0.8);
        assert_eq!(config.promotion.n_threshold, 4);
        assert_eq!(
            config.clustering.merge_threshold,
            SynthesisConfig::default().clustering.merge_threshold
        );
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "[promotion\n").unwrap();
        assert!(matches!(load_config(dir.path()), Err(StoreError::Toml(_))));
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("hello world"), "hello_world");
        assert_eq!(sanitize_name("my/workspace"), "my_workspace");
        assert_eq!(sanitize_name("valid-name_123"), "valid-name_123");
    }

    #[test]
    fn test_resolve_explicit_wins() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_workspace_id(Some("my soul"), dir.path()), "my_soul");
    }

    #[test]
    fn test_resolve_blank_explicit_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("agent-notes");
        fs::create_dir(&ws).unwrap();
        let id = resolve_workspace_id(Some("  "), &ws);
        assert!(!id.is_empty());
        assert!(id.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_parse_remote_ssh_scp() {
        assert_eq!(
            parse_remote_url("git@github.com:acme/soul-notes.git"),
            Some("acme_soul-notes".to_string())
        );
    }

    #[test]
    fn test_parse_remote_https() {
        assert_eq!(
            parse_remote_url("https://github.com/acme/soul-notes.git"),
            Some("acme_soul-notes".to_string())
        );
    }

    #[test]
    fn test_parse_remote_ssh_scheme() {
        assert_eq!(
            parse_remote_url("ssh://git@github.com/acme/soul-notes.git"),
            Some("acme_soul-notes".to_string())
        );
    }

    #[test]
    fn test_parse_remote_gitlab_subgroups() {
        assert_eq!(
            parse_remote_url("git@gitlab.com:group/subgroup/repo.git"),
            Some("subgroup_repo".to_string())
        );
    }

    #[test]
    fn test_parse_remote_garbage() {
        assert_eq!(parse_remote_url("not-a-url"), None);
        assert_eq!(parse_remote_url(""), None);
    }
}
