//! Advisory lock on the paging directory.
//!
//! - Exclusive: held by a `PagingManager` for its whole lifetime.
//! - Shared: taken by `pagingctl` for read-only inspection.
//!
//! Lock file path: <paging_dir>/LOCK. Released on Drop.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::consts::LOCK_FILE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("open lock file {}", path.display()))
}

/// Try to lock `<dir>/LOCK` without blocking. Fails if another process
/// (or another manager in this process) holds a conflicting lock.
pub fn try_acquire_lock(dir: &Path, mode: LockMode) -> Result<LockGuard> {
    let path = dir.join(LOCK_FILE);
    let file = open_lock_file(&path)?;
    match mode {
        LockMode::Shared => file
            .try_lock_shared()
            .with_context(|| format!("paging directory is locked: {}", path.display()))?,
        LockMode::Exclusive => file.try_lock_exclusive().with_context(|| {
            format!("paging directory is already in use: {}", path.display())
        })?,
    }
    Ok(LockGuard { file, path, mode })
}

pub fn try_acquire_exclusive_lock(dir: &Path) -> Result<LockGuard> {
    try_acquire_lock(dir, LockMode::Exclusive)
}

pub fn try_acquire_shared_lock(dir: &Path) -> Result<LockGuard> {
    try_acquire_lock(dir, LockMode::Shared)
}
