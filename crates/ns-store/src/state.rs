//! `cycle-state.json`: the commit pointer of a workspace.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use ns_core::CycleState;
use ns_core::time::canonicalize_or_epoch;

use crate::error::Result;

pub fn load_state(path: &Path) -> Result<Option<CycleState>> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut state: CycleState = serde_json::from_str(&content)?;
    state.last_run_at = canonicalize_or_epoch(&state.last_run_at);
    Ok(Some(state))
}

/// Write to a sibling temp file, sync, then rename over the old state.
/// Readers see the previous state or the new one, never a torn file.
pub fn save_state(path: &Path, state: &CycleState) -> Result<()> {
    let json = serde_json::to_string_pretty(state)?;
    let tmp = tmp_path(path);
    {
        let mut f = File::create(&tmp)?;
        f.write_all(json.as_bytes())?;
        f.sync_all()?;
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    sync_parent(path);
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    path.with_extension(format!("json.{}.tmp", std::process::id()))
}

#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(dir) = path.parent()
        && let Ok(d) = File::open(dir)
    {
        let _ = d.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}
