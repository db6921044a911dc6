use anyhow::{anyhow, Result};
use std::path::Path;

use broker_paging::lock::{try_acquire_shared_lock, LockGuard};

/// Shared lock on an existing paging directory. Fails while a manager holds it.
pub fn open_shared(dir: &Path) -> Result<LockGuard> {
    if !dir.is_dir() {
        return Err(anyhow!("{} is not a paging directory", dir.display()));
    }
    try_acquire_shared_lock(dir)
}
