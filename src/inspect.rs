//! Read-only inspection of a paging directory (status / dump / verify).
//!
//! Never modifies page files: torn tails are reported, not truncated. Callers
//! are expected to hold at least a shared lock on the directory.

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PagingResult;
use crate::message::{Address, PropertyValue};
use crate::page::{list_pages, read_header, PageEntry, PageReader};
use crate::store::acks::LowWaterMark;
use crate::util::{parse_store_dir_name, store_dir_name};

#[derive(Debug, Clone, Serialize)]
pub struct PageReport {
    pub seq: u64,
    pub sealed: bool,
    pub messages: u64,
    pub acked: u64,
    pub file_bytes: u64,
    pub torn_tail: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreReport {
    pub address: String,
    pub directory: PathBuf,
    pub store_id: Option<u64>,
    pub pages: Vec<PageReport>,
    /// Bytes of committed messages not yet acknowledged per the low-water mark.
    pub unacked_bytes: u64,
    pub unacked_messages: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordDump {
    pub page: u64,
    pub offset: u64,
    pub kind: &'static str,
    pub ordinal: Option<u64>,
    pub tx_id: u64,
    pub message_id: Option<u64>,
    pub size: Option<u64>,
    pub durable: Option<bool>,
    pub scheduled_delivery: Option<u64>,
    pub acked: Option<bool>,
    pub properties: BTreeMap<String, serde_json::Value>,
    pub body_base64: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    pub stores: usize,
    pub pages: usize,
    pub records: u64,
    pub torn_tails: Vec<String>,
    pub corrupt: Vec<String>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.corrupt.is_empty()
    }
}

/// Store directories under `root`, sorted by address.
pub fn store_dirs(root: &Path) -> Result<Vec<(Address, PathBuf)>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(root).with_context(|| format!("read {}", root.display()))? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(a) = entry.file_name().to_str().and_then(parse_store_dir_name) {
            out.push((a, entry.path()));
        }
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

fn read_all(path: &Path) -> PagingResult<(Vec<PageEntry>, PageReader)> {
    let mut reader = PageReader::open_detached(path)?;
    let mut entries = Vec::new();
    for e in reader.by_ref() {
        entries.push(e?);
    }
    Ok((entries, reader))
}

pub fn store_status(address: &Address, dir: &Path) -> StoreReport {
    let mut report = StoreReport {
        address: address.to_string(),
        directory: dir.to_path_buf(),
        store_id: None,
        pages: Vec::new(),
        unacked_bytes: 0,
        unacked_messages: 0,
        error: None,
    };
    if let Err(e) = fill_status(dir, &mut report) {
        report.error = Some(format!("{:#}", e));
    }
    report
}

fn fill_status(dir: &Path, report: &mut StoreReport) -> Result<()> {
    let lwm = LowWaterMark::load(dir)?;
    report.store_id = lwm.as_ref().map(|l| l.store_id);

    let mut pages = Vec::new();
    let mut committed = HashSet::new();
    for (seq, path) in list_pages(dir)? {
        if report.store_id.is_none() {
            report.store_id = Some(read_header(&path)?.store_id);
        }
        let (entries, reader) = read_all(&path)?;
        for e in &entries {
            if let PageEntry::TxCommit { tx_id, .. } = e {
                committed.insert(*tx_id);
            }
        }
        let file_bytes = fs::metadata(&path)?.len();
        pages.push((seq, entries, reader.reached_seal(), reader.torn_tail(), file_bytes));
    }

    for (seq, entries, sealed, torn_tail, file_bytes) in pages {
        let acks = lwm.as_ref().map(|l| l.acks(seq)).unwrap_or_default();
        let mut messages = 0u64;
        for e in &entries {
            if let PageEntry::Message {
                ordinal,
                tx_id,
                message,
                ..
            } = e
            {
                messages += 1;
                let live = *tx_id == 0 || committed.contains(tx_id);
                if live && !acks.is_acked(*ordinal) {
                    report.unacked_messages += 1;
                    report.unacked_bytes += message.memory_size();
                }
            }
        }
        report.pages.push(PageReport {
            seq,
            sealed,
            messages,
            acked: acks.acked_count(),
            file_bytes,
            torn_tail,
        });
    }
    Ok(())
}

pub fn status(root: &Path) -> Result<Vec<StoreReport>> {
    Ok(store_dirs(root)?
        .into_iter()
        .map(|(a, d)| store_status(&a, &d))
        .collect())
}

fn property_json(v: &PropertyValue) -> serde_json::Value {
    match v {
        PropertyValue::Bool(b) => serde_json::Value::from(*b),
        PropertyValue::Int(i) => serde_json::Value::from(*i),
        PropertyValue::Long(l) => serde_json::Value::from(*l),
        PropertyValue::Str(s) => serde_json::Value::from(s.as_str()),
        PropertyValue::Bytes(b) => {
            serde_json::Value::from(base64::engine::general_purpose::STANDARD.encode(b))
        }
    }
}

/// Every record of every page of `address`, oldest first.
pub fn dump(root: &Path, address: &Address) -> Result<Vec<RecordDump>> {
    let dir = root.join(store_dir_name(address));
    if !dir.is_dir() {
        return Err(anyhow!("no store for address '{}' under {}", address, root.display()));
    }
    let lwm = LowWaterMark::load(&dir)?;
    let mut out = Vec::new();
    for (seq, path) in list_pages(&dir)? {
        let acks = lwm.as_ref().map(|l| l.acks(seq)).unwrap_or_default();
        let (entries, _) = read_all(&path).with_context(|| format!("read {}", path.display()))?;
        for e in entries {
            let rec = match e {
                PageEntry::Message {
                    ordinal,
                    offset,
                    tx_id,
                    message,
                } => RecordDump {
                    page: seq,
                    offset,
                    kind: "message",
                    ordinal: Some(ordinal),
                    tx_id,
                    message_id: Some(message.id),
                    size: Some(message.memory_size()),
                    durable: Some(message.durable),
                    scheduled_delivery: message.scheduled_delivery(),
                    acked: Some(acks.is_acked(ordinal)),
                    properties: message
                        .properties
                        .iter()
                        .map(|(k, v)| (k.clone(), property_json(v)))
                        .collect(),
                    body_base64: Some(
                        base64::engine::general_purpose::STANDARD.encode(&message.body),
                    ),
                },
                PageEntry::TxCommit { offset, tx_id } => RecordDump {
                    page: seq,
                    offset,
                    kind: "tx_commit",
                    ordinal: None,
                    tx_id,
                    message_id: None,
                    size: None,
                    durable: None,
                    scheduled_delivery: None,
                    acked: None,
                    properties: BTreeMap::new(),
                    body_base64: None,
                },
                PageEntry::Seal { offset } => RecordDump {
                    page: seq,
                    offset,
                    kind: "seal",
                    ordinal: None,
                    tx_id: 0,
                    message_id: None,
                    size: None,
                    durable: None,
                    scheduled_delivery: None,
                    acked: None,
                    properties: BTreeMap::new(),
                    body_base64: None,
                },
            };
            out.push(rec);
        }
    }
    Ok(out)
}

/// Full CRC scan of every page in every store.
pub fn verify(root: &Path) -> Result<VerifyReport> {
    let mut report = VerifyReport::default();
    for (address, dir) in store_dirs(root)? {
        report.stores += 1;
        let expected = LowWaterMark::load(&dir)
            .ok()
            .flatten()
            .map(|l| l.store_id);
        let mut store_id = expected;
        for (_, path) in list_pages(&dir)? {
            report.pages += 1;
            match read_header(&path) {
                Ok(h) => match store_id {
                    Some(id) if id != h.store_id => {
                        report.corrupt.push(format!(
                            "{}: page belongs to store {:#x}, expected {:#x}",
                            path.display(),
                            h.store_id,
                            id
                        ));
                        continue;
                    }
                    _ => store_id = Some(h.store_id),
                },
                Err(e) => {
                    report.corrupt.push(format!("'{}': {}", address, e));
                    continue;
                }
            }
            match read_all(&path) {
                Ok((entries, reader)) => {
                    report.records += entries.len() as u64;
                    if let Some(at) = reader.torn_tail() {
                        report
                            .torn_tails
                            .push(format!("{} at offset {}", path.display(), at));
                    }
                }
                Err(e) => report.corrupt.push(format!("'{}': {}", address, e)),
            }
        }
    }
    Ok(report)
}
