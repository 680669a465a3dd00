//! Cross-process run lock: `cycle.lock` holding the owner's PID.
//!
//! Creation is atomic: the PID is written to a private temp file which is
//! then hard-linked to the lock path. `link` fails if the lock exists, so two
//! processes can never both succeed, and a reader never sees a half-written
//! PID. A lock whose owner is dead is moved to a tombstone and the move is
//! verified before the lock is taken over.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use ns_core::LockAcquisition;

use crate::error::{Result, StoreError};

const MAX_ATTEMPTS: usize = 3;

static SEQ: AtomicUsize = AtomicUsize::new(0);

pub fn acquire(path: &Path) -> Result<LockAcquisition> {
    acquire_as(path, std::process::id())
}

pub(crate) fn acquire_as(path: &Path, pid: u32) -> Result<LockAcquisition> {
    let tmp = private_path(path, "tmp", pid);
    {
        let mut f = File::create(&tmp)?;
        write!(f, "{pid}")?;
        f.sync_all()?;
    }
    let result = take(path, &tmp, pid);
    let _ = fs::remove_file(&tmp);
    result
}

fn take(path: &Path, tmp: &Path, pid: u32) -> Result<LockAcquisition> {
    let mut reclaimed: Option<u32> = None;

    for _ in 0..MAX_ATTEMPTS {
        match fs::hard_link(tmp, path) {
            Ok(()) => {
                return Ok(match reclaimed {
                    Some(stale_pid) => LockAcquisition::Reclaimed { stale_pid },
                    None => LockAcquisition::Acquired,
                });
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        let owner = match read_owner(path) {
            Ok(owner) => owner,
            // Released between our link attempt and the read.
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        if let Some(owner_pid) = owner
            && is_process_alive(owner_pid)
        {
            return Ok(LockAcquisition::Held { owner_pid });
        }

        let stale_pid = owner.unwrap_or(0);
        let tombstone = private_path(path, "stale", pid);
        match fs::rename(path, &tombstone) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        }

        // Someone may have reclaimed and re-locked between our read and the
        // rename. If what we moved is not the dead lock, put it back.
        let moved = read_owner(&tombstone).ok().flatten();
        if moved != owner {
            let restored = fs::hard_link(&tombstone, path);
            let _ = fs::remove_file(&tombstone);
            if let Err(e) = &restored {
                // A third process locked the path before the restore. The
                // displaced owner finds out at commit time through
                // `ensure_owner`.
                tracing::error!(
                    lock = %path.display(),
                    displaced = ?moved,
                    now_held_by = ?read_owner(path).ok().flatten(),
                    error = %e,
                    "could not restore a live run lock moved during reclaim"
                );
            }
            if let Some(owner_pid) = moved
                && (restored.is_ok() || is_process_alive(owner_pid))
            {
                return Ok(LockAcquisition::Held { owner_pid });
            }
            continue;
        }
        let _ = fs::remove_file(&tombstone);
        reclaimed = Some(stale_pid);
    }

    match read_owner(path).ok().flatten() {
        Some(owner_pid) => Ok(LockAcquisition::Held { owner_pid }),
        None => Ok(LockAcquisition::Held { owner_pid: 0 }),
    }
}

/// Remove the lock if this process owns it. Someone else's lock is left
/// alone.
pub fn release(path: &Path) -> Result<()> {
    release_as(path, std::process::id())
}

pub(crate) fn release_as(path: &Path, pid: u32) -> Result<()> {
    match read_owner(path) {
        Ok(Some(owner)) if owner == pid => match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        },
        Ok(Some(owner)) => {
            tracing::warn!(lock = %path.display(), owner, "not releasing a lock held by another process");
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Fails unless the lock names `pid`. Checked before anything is committed,
/// so a process that lost its lock cannot overwrite another run's state.
pub fn ensure_owner(path: &Path, pid: u32) -> Result<()> {
    let owner = match read_owner(path) {
        Ok(owner) => owner,
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };
    if owner == Some(pid) {
        return Ok(());
    }
    let held_by = owner.map_or_else(|| "nobody".to_string(), |p| format!("pid {p}"));
    Err(StoreError::InvalidData(format!(
        "run lock {} is held by {held_by}, not pid {pid}; refusing to commit",
        path.display()
    )))
}

/// PID recorded in the lock file; `None` when the content is not a PID.
pub fn read_owner(path: &Path) -> std::io::Result<Option<u32>> {
    let content = fs::read_to_string(path)?;
    Ok(content.trim().parse::<u32>().ok().filter(|p| *p != 0))
}

/// Sibling file name unique to this attempt, so threads sharing a PID never
/// collide.
fn private_path(path: &Path, kind: &str, pid: u32) -> PathBuf {
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    path.with_extension(format!("lock.{kind}.{pid}.{seq}"))
}

#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // kill(pid, 0) checks existence without sending a signal; EPERM means
    // the process exists under another user.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    true // no liveness probe: never reclaim
}
