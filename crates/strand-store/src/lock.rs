//! Advisory lock held as a sibling directory (`<file>.lock/`).
//!
//! A lock is staged as `<file>.lock.<token>.tmp/` with its owner file inside
//! and renamed into place, so a visible lock directory always names its
//! owner. An abandoned lock is reclaimed by renaming it to a unique
//! tombstone: only one waiter's rename can succeed, and the winner checks the
//! tombstone's owner before deleting it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::StoreError;

const OWNER_FILE: &str = "owner.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Give up with `LockTimeout` after this long.
    pub timeout: Duration,
    /// A lock older than this whose owner process is gone is abandoned.
    pub stale_after: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            stale_after: Duration::from_secs(30),
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockOwner {
    token: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

pub fn lock_dir_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    target.with_file_name(name)
}

/// `<dir>.<suffix>` next to `dir`.
fn sibling(dir: &Path, suffix: &str) -> PathBuf {
    let mut name = dir
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);
    dir.with_file_name(name)
}

/// Scoped lock guard. Dropping it releases the lock.
#[derive(Debug)]
pub struct DirLock {
    dir: PathBuf,
    token: String,
    released: bool,
}

impl DirLock {
    pub fn acquire(target: &Path, options: &LockOptions) -> Result<Self, StoreError> {
        let dir = lock_dir_for(target);
        if let Some(parent) = dir.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::io(parent, source))?;
        }

        let started = Instant::now();
        let mut backoff = options.initial_backoff;
        loop {
            if let Some(lock) = Self::try_create(&dir)? {
                return Ok(lock);
            }
            if let Some(holder) = inspect(&dir, options.stale_after) {
                if holder.abandoned && reclaim(&dir, holder.token.as_deref())? {
                    continue;
                }
            }

            let waited = started.elapsed();
            if waited >= options.timeout {
                return Err(StoreError::LockTimeout { path: dir, waited });
            }
            std::thread::sleep(backoff.min(options.timeout - waited));
            backoff = (backoff * 2).min(options.max_backoff);
        }
    }

    /// `None` when another writer holds the lock.
    fn try_create(dir: &Path) -> Result<Option<Self>, StoreError> {
        let owner = LockOwner {
            token: uuid::Uuid::new_v4().to_string(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let body = serde_json::to_vec(&owner).map_err(|source| StoreError::Serialize {
            path: dir.to_path_buf(),
            source,
        })?;

        let staging = sibling(dir, &format!("{}.tmp", owner.token));
        fs::create_dir(&staging).map_err(|source| StoreError::io(&staging, source))?;
        let owner_path = staging.join(OWNER_FILE);
        if let Err(source) = fs::write(&owner_path, body) {
            discard(&staging);
            return Err(StoreError::io(owner_path, source));
        }

        match fs::rename(&staging, dir) {
            Ok(()) => {
                tracing::debug!(lock = %dir.display(), "lock acquired");
                Ok(Some(DirLock {
                    dir: dir.to_path_buf(),
                    token: owner.token,
                    released: false,
                }))
            }
            Err(source) => {
                discard(&staging);
                if dir.exists() {
                    Ok(None)
                } else {
                    Err(StoreError::io(dir, source))
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn release(mut self) -> Result<(), StoreError> {
        self.released = true;
        self.remove_if_owned()
    }

    fn remove_if_owned(&self) -> Result<(), StoreError> {
        if let Some(owner) = read_owner(&self.dir) {
            if owner.token != self.token {
                tracing::warn!(
                    lock = %self.dir.display(),
                    "lock was reclaimed by another writer; leaving it in place"
                );
                return Ok(());
            }
        }
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::io(&self.dir, source)),
        }
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = self.remove_if_owned() {
                tracing::warn!(error = %err, "failed to release lock");
            }
        }
    }
}

fn read_owner(dir: &Path) -> Option<LockOwner> {
    let body = fs::read(dir.join(OWNER_FILE)).ok()?;
    serde_json::from_slice(&body).ok()
}

/// Who holds a lock directory, as far as it can be told from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Holder {
    token: Option<String>,
    abandoned: bool,
}

/// `None` when the lock disappeared while looking at it.
fn inspect(dir: &Path, stale_after: Duration) -> Option<Holder> {
    let owner = read_owner(dir);
    let age = match &owner {
        Some(owner) => (Utc::now() - owner.acquired_at)
            .to_std()
            .unwrap_or(Duration::ZERO),
        None => fs::metadata(dir)
            .and_then(|meta| meta.modified())
            .ok()?
            .elapsed()
            .unwrap_or(Duration::ZERO),
    };
    let running = owner
        .as_ref()
        .is_some_and(|owner| process_running(owner.pid));
    Some(Holder {
        token: owner.map(|owner| owner.token),
        abandoned: age > stale_after && !running,
    })
}

#[cfg(target_os = "linux")]
fn process_running(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_running(_pid: u32) -> bool {
    false
}

/// Move an abandoned lock out of the way. Returns true when the lock that was
/// inspected (owner `expected`) is the one that got removed.
fn reclaim(dir: &Path, expected: Option<&str>) -> Result<bool, StoreError> {
    let tombstone = sibling(dir, &format!("stale-{}", uuid::Uuid::new_v4().simple()));
    match fs::rename(dir, &tombstone) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
        Err(source) => return Err(StoreError::io(dir, source)),
    }

    let found = read_owner(&tombstone).map(|owner| owner.token);
    if found.as_deref() != expected {
        // Re-acquired between inspection and rename.
        if let Err(err) = fs::rename(&tombstone, dir) {
            tracing::warn!(lock = %dir.display(), error = %err, "could not restore a lock moved during reclaim");
            discard(&tombstone);
        }
        return Ok(false);
    }
    discard(&tombstone);
    tracing::warn!(lock = %dir.display(), "reclaimed abandoned lock");
    Ok(true)
}

fn discard(path: &Path) {
    match fs::remove_dir_all(path) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => tracing::warn!(path = %path.display(), error = %err, "could not remove lock leftovers"),
    }
}
