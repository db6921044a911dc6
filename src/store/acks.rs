//! Durable low-water mark of an address store.
//!
//! Format: <store_dir>/depage.json
//! {
//!   "version": 1,
//!   "address": "orders",
//!   "store_id": 1234,
//!   "oldest_page": 3,
//!   "pages": { "3": { "prefix": 17, "extra": [19, 20] } }
//! }
//!
//! `prefix` is the count of contiguously acknowledged ordinals from 0; `extra`
//! holds acknowledged ordinals beyond it. Written through tmp + rename.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::consts::LWM_FILE;
use crate::util::write_json_atomic;

const LWM_VERSION: u32 = 1;

/// Acknowledged ordinals of one page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageAcks {
    pub prefix: u64,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub extra: BTreeSet<u64>,
}

impl PageAcks {
    pub fn is_acked(&self, ordinal: u64) -> bool {
        ordinal < self.prefix || self.extra.contains(&ordinal)
    }

    /// Returns false if the ordinal was already acknowledged.
    pub fn ack(&mut self, ordinal: u64) -> bool {
        if self.is_acked(ordinal) {
            return false;
        }
        if ordinal == self.prefix {
            self.prefix += 1;
            while self.extra.remove(&self.prefix) {
                self.prefix += 1;
            }
        } else {
            self.extra.insert(ordinal);
        }
        true
    }

    pub fn acked_count(&self) -> u64 {
        self.prefix + self.extra.len() as u64
    }

    pub fn is_complete(&self, total: u64) -> bool {
        self.prefix >= total
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LowWaterMark {
    pub version: u32,
    pub address: String,
    pub store_id: u64,
    /// Oldest page still referenced; None when the store holds no pages.
    pub oldest_page: Option<u64>,
    #[serde(default)]
    pub pages: BTreeMap<u64, PageAcks>,
}

impl LowWaterMark {
    pub fn new(address: &str, store_id: u64) -> Self {
        Self {
            version: LWM_VERSION,
            address: address.to_string(),
            store_id,
            oldest_page: None,
            pages: BTreeMap::new(),
        }
    }

    pub fn path(store_dir: &Path) -> PathBuf {
        store_dir.join(LWM_FILE)
    }

    pub fn load(store_dir: &Path) -> Result<Option<Self>> {
        let p = Self::path(store_dir);
        if !p.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&p).with_context(|| format!("read {}", p.display()))?;
        let lwm: LowWaterMark = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse {}", p.display()))?;
        if lwm.version != LWM_VERSION {
            anyhow::bail!(
                "unsupported low-water mark version {} in {}",
                lwm.version,
                p.display()
            );
        }
        Ok(Some(lwm))
    }

    pub fn save(&self, store_dir: &Path) -> Result<()> {
        write_json_atomic(&Self::path(store_dir), self)
    }

    pub fn acks(&self, page: u64) -> PageAcks {
        self.pages.get(&page).cloned().unwrap_or_default()
    }
}
