//! Paging configuration: global tunables plus per-address settings.
//!
//! - `PagingConfig::from_env()` reads `BP_*` variables on top of the defaults.
//! - `with_*` setters and `PagingConfigBuilder` override single fields.
//! - `AddressSettings` come from a `SettingsSource` (the broker's address
//!   registry); `AddressSettingsMap` is a ready in-memory source.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_GLOBAL_WATERMARK, DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_PAGE_SIZE};
use crate::message::Address;

/// What a send does when it hits a size limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FullPolicy {
    /// Keep accepting; the address starts paging.
    #[default]
    Page,
    /// Discard the message and report `SendOutcome::Dropped`.
    Drop,
    /// Wait until enough size is released.
    Block,
}

impl FromStr for FullPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "page" | "continue" => Ok(FullPolicy::Page),
            "drop" => Ok(FullPolicy::Drop),
            "block" => Ok(FullPolicy::Block),
            other => Err(format!("unknown full policy '{}' (page|drop|block)", other)),
        }
    }
}

impl fmt::Display for FullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FullPolicy::Page => "page",
            FullPolicy::Drop => "drop",
            FullPolicy::Block => "block",
        })
    }
}

#[derive(Clone, Debug)]
pub struct PagingConfig {
    /// Root of all address stores.
    /// Env: BP_PAGING_DIR (default ./paging)
    pub directory: PathBuf,

    /// Global max size in bytes; None = unbounded.
    /// Env: BP_GLOBAL_MAX_SIZE (-1 = unbounded)
    pub global_max_size: Option<u64>,

    /// Resident size at or below which depaging proceeds, unless an address
    /// has its own watermark.
    /// Env: BP_GLOBAL_WATERMARK (default 10 MiB)
    pub global_watermark: u64,

    /// Page-size bound.
    /// Env: BP_PAGE_SIZE (default 10 MiB)
    pub page_size: u64,

    /// Hard cap for a single page record.
    /// Env: BP_MAX_MESSAGE_BYTES (default 64 MiB)
    pub max_message_bytes: u64,

    /// Policy for addresses without their own.
    /// Env: BP_FULL_POLICY = page|drop|block (default page)
    pub default_policy: FullPolicy,

    /// fsync durable appends before the send returns.
    /// Env: BP_SYNC_ON_APPEND (default true)
    pub sync_on_append: bool,

    /// Persist the low-water mark on every acknowledgement instead of only on
    /// page deletion and shutdown.
    /// Env: BP_SYNC_ACKS (default false)
    pub sync_acks: bool,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./paging"),
            global_max_size: None,
            global_watermark: DEFAULT_GLOBAL_WATERMARK,
            page_size: DEFAULT_PAGE_SIZE,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            default_policy: FullPolicy::Page,
            sync_on_append: true,
            sync_acks: false,
        }
    }
}

fn env_flag(v: &str) -> bool {
    let s = v.trim().to_ascii_lowercase();
    s == "1" || s == "true" || s == "on" || s == "yes"
}

impl PagingConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("BP_PAGING_DIR") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.directory = PathBuf::from(s);
            }
        }

        if let Ok(v) = std::env::var("BP_GLOBAL_MAX_SIZE") {
            if let Ok(n) = v.trim().parse::<i64>() {
                cfg.global_max_size = if n < 0 { None } else { Some(n as u64) };
            }
        }

        if let Ok(v) = std::env::var("BP_GLOBAL_WATERMARK") {
            if let Ok(n) = v.trim().parse::<u64>() {
                cfg.global_watermark = n;
            }
        }

        if let Ok(v) = std::env::var("BP_PAGE_SIZE") {
            if let Ok(n) = v.trim().parse::<u64>() {
                if n > 0 {
                    cfg.page_size = n;
                }
            }
        }

        if let Ok(v) = std::env::var("BP_MAX_MESSAGE_BYTES") {
            if let Ok(n) = v.trim().parse::<u64>() {
                if n > 0 {
                    cfg.max_message_bytes = n;
                }
            }
        }

        if let Ok(v) = std::env::var("BP_FULL_POLICY") {
            if let Ok(p) = v.parse::<FullPolicy>() {
                cfg.default_policy = p;
            }
        }

        if let Ok(v) = std::env::var("BP_SYNC_ON_APPEND") {
            cfg.sync_on_append = env_flag(&v);
        }

        if let Ok(v) = std::env::var("BP_SYNC_ACKS") {
            cfg.sync_acks = env_flag(&v);
        }

        cfg
    }

    pub fn builder() -> PagingConfigBuilder {
        PagingConfigBuilder::new()
    }

    pub fn with_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.directory = dir.into();
        self
    }

    pub fn with_global_max_size(mut self, max: Option<u64>) -> Self {
        self.global_max_size = max;
        self
    }

    pub fn with_global_watermark(mut self, bytes: u64) -> Self {
        self.global_watermark = bytes;
        self
    }

    pub fn with_page_size(mut self, bytes: u64) -> Self {
        self.page_size = bytes;
        self
    }

    pub fn with_max_message_bytes(mut self, bytes: u64) -> Self {
        self.max_message_bytes = bytes;
        self
    }

    pub fn with_default_policy(mut self, policy: FullPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn with_sync_on_append(mut self, on: bool) -> Self {
        self.sync_on_append = on;
        self
    }

    pub fn with_sync_acks(mut self, on: bool) -> Self {
        self.sync_acks = on;
        self
    }
}

impl fmt::Display for PagingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PagingConfig {{ \
             directory: {}, \
             global_max_size: {}, \
             global_watermark: {}, \
             page_size: {}, \
             max_message_bytes: {}, \
             default_policy: {}, \
             sync_on_append: {}, \
             sync_acks: {} \
             }}",
            self.directory.display(),
            self.global_max_size
                .map(|v| v.to_string())
                .unwrap_or_else(|| "unbounded".to_string()),
            self.global_watermark,
            self.page_size,
            self.max_message_bytes,
            self.default_policy,
            self.sync_on_append,
            self.sync_acks,
        )
    }
}

/// Builder over `PagingConfig`. `new()` starts from the environment,
/// `from_default()` from plain defaults.
#[derive(Clone, Debug)]
pub struct PagingConfigBuilder {
    cfg: PagingConfig,
}

impl Default for PagingConfigBuilder {
    fn default() -> Self {
        Self {
            cfg: PagingConfig::from_env(),
        }
    }
}

impl PagingConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_default() -> Self {
        Self {
            cfg: PagingConfig::default(),
        }
    }

    pub fn directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cfg.directory = dir.into();
        self
    }

    pub fn global_max_size(mut self, max: Option<u64>) -> Self {
        self.cfg.global_max_size = max;
        self
    }

    pub fn global_watermark(mut self, bytes: u64) -> Self {
        self.cfg.global_watermark = bytes;
        self
    }

    pub fn page_size(mut self, bytes: u64) -> Self {
        self.cfg.page_size = bytes;
        self
    }

    pub fn max_message_bytes(mut self, bytes: u64) -> Self {
        self.cfg.max_message_bytes = bytes;
        self
    }

    pub fn default_policy(mut self, policy: FullPolicy) -> Self {
        self.cfg.default_policy = policy;
        self
    }

    pub fn sync_on_append(mut self, on: bool) -> Self {
        self.cfg.sync_on_append = on;
        self
    }

    pub fn sync_acks(mut self, on: bool) -> Self {
        self.cfg.sync_acks = on;
        self
    }

    pub fn build(self) -> PagingConfig {
        self.cfg
    }
}

/// Per-address settings. `None` fields fall back to the global configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSettings {
    /// None = unbounded (defers to the global limit).
    pub max_size_bytes: Option<u64>,
    pub policy: Option<FullPolicy>,
    pub watermark: Option<u64>,
}

impl AddressSettings {
    pub fn with_max_size_bytes(mut self, max: Option<u64>) -> Self {
        self.max_size_bytes = max;
        self
    }

    pub fn with_policy(mut self, policy: FullPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_watermark(mut self, bytes: u64) -> Self {
        self.watermark = Some(bytes);
        self
    }

    pub fn policy_or(&self, default: FullPolicy) -> FullPolicy {
        self.policy.unwrap_or(default)
    }

    pub fn watermark_or(&self, global: u64) -> u64 {
        self.watermark.unwrap_or(global)
    }
}

/// The broker's address/settings registry as seen by paging.
pub trait SettingsSource: Send + Sync {
    fn settings_for(&self, address: &Address) -> AddressSettings;
}

/// Exact-name entries with a fallback default.
#[derive(Clone, Debug, Default)]
pub struct AddressSettingsMap {
    default: AddressSettings,
    entries: HashMap<Address, AddressSettings>,
}

impl AddressSettingsMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(mut self, settings: AddressSettings) -> Self {
        self.default = settings;
        self
    }

    pub fn with_address(mut self, address: impl Into<Address>, settings: AddressSettings) -> Self {
        self.entries.insert(address.into(), settings);
        self
    }
}

impl SettingsSource for AddressSettingsMap {
    fn settings_for(&self, address: &Address) -> AddressSettings {
        self.entries.get(address).copied().unwrap_or(self.default)
    }
}
