use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::consts::STORE_DIR_PREFIX;
use crate::message::Address;

/// fsync the directory containing `path`, so a create/rename/unlink survives a crash.
#[cfg(unix)]
pub fn fsync_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            let dir = File::open(parent)?;
            dir.sync_all()?;
        }
    }
    Ok(())
}
#[cfg(not(unix))]
pub fn fsync_dir(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Write `value` as pretty JSON through tmp + rename + dir fsync.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("state.json");
    let tmp = path.with_file_name(format!("{}.tmp", file_name));
    let _ = fs::remove_file(&tmp);

    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    let mut f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)
        .with_context(|| format!("open tmp {}", tmp.display()))?;
    f.write_all(&data)?;
    f.sync_all()?;

    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    let _ = fsync_dir(path);
    Ok(())
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Directory name of an address store: `addr-<hex(name)>`. Hex keeps any
/// address name filesystem-safe and reversible.
pub fn store_dir_name(address: &Address) -> String {
    let mut out = String::with_capacity(STORE_DIR_PREFIX.len() + address.as_str().len() * 2);
    out.push_str(STORE_DIR_PREFIX);
    for b in address.as_str().as_bytes() {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

pub fn parse_store_dir_name(name: &str) -> Option<Address> {
    let hex = name.strip_prefix(STORE_DIR_PREFIX)?;
    if hex.len() % 2 != 0 {
        return None;
    }
    let mut bytes = Vec::with_capacity(hex.len() / 2);
    for i in (0..hex.len()).step_by(2) {
        bytes.push(u8::from_str_radix(hex.get(i..i + 2)?, 16).ok()?);
    }
    String::from_utf8(bytes).ok().map(Address::from)
}

pub fn display_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => format!("(binary {} B)", bytes.len()),
    }
}
