//! manager/open: startup and shutdown.
//!
//! init():
//! 1) create the paging directory and take the exclusive LOCK;
//! 2) recover every `addr-*` store (failed stores are kept, disabled);
//! 3) publish recovered paged bytes into the global size;
//! 4) continue message/transaction ids after the highest ones on disk.
//! No depaging happens until `start_depaging()`.

use anyhow::{Context, Result};
use log::{info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::core::PagingManager;
use crate::config::{PagingConfig, SettingsSource};
use crate::delivery::DeliveryTarget;
use crate::lock::try_acquire_exclusive_lock;
use crate::store::recovery::recover_store;
use crate::store::StoreContext;
use crate::util::parse_store_dir_name;

impl PagingManager {
    pub fn init(
        config: PagingConfig,
        settings: Arc<dyn SettingsSource>,
        target: Arc<dyn DeliveryTarget>,
    ) -> Result<Self> {
        let root = config.directory.clone();
        fs::create_dir_all(&root)
            .with_context(|| format!("create paging directory {}", root.display()))?;
        let lock = try_acquire_exclusive_lock(&root)?;
        info!("paging manager starting: {}", config);

        let ctx = Arc::new(StoreContext::new(config, target));
        let mut stores = HashMap::new();
        let mut max_message_id = 0u64;
        let mut max_tx_id = 0u64;
        let mut global = 0u64;

        let mut entries: Vec<_> = fs::read_dir(&root)
            .with_context(|| format!("read paging directory {}", root.display()))?
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(address) = name.to_str().and_then(parse_store_dir_name) else {
                warn!("ignoring unknown entry {}", entry.path().display());
                continue;
            };
            let rec = recover_store(&ctx, address.clone(), entry.path())?;
            global += rec.paged_bytes;
            max_message_id = max_message_id.max(rec.max_message_id);
            max_tx_id = max_tx_id.max(rec.max_tx_id);
            stores.insert(address, rec.store);
        }

        ctx.global_size.store(global, Ordering::Release);
        info!(
            "paging manager ready: {} store(s), {} bytes paged",
            stores.len(),
            global
        );

        Ok(Self {
            ctx,
            settings,
            stores: RwLock::new(stores),
            next_message_id: AtomicU64::new(max_message_id + 1),
            next_tx_id: AtomicU64::new(max_tx_id + 1),
            lock: Mutex::new(Some(lock)),
        })
    }

    /// `init` followed by `start_depaging`.
    pub fn start(
        config: PagingConfig,
        settings: Arc<dyn SettingsSource>,
        target: Arc<dyn DeliveryTarget>,
    ) -> Result<Self> {
        let m = Self::init(config, settings, target)?;
        m.start_depaging()?;
        Ok(m)
    }

    /// Begin feeding paged data to delivery. Every store is kicked once; the
    /// first error is returned after all stores were tried.
    pub fn start_depaging(&self) -> Result<()> {
        if self.ctx.depaging.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut first_err = None;
        for store in self.stores() {
            if store.failure().is_some() {
                continue;
            }
            let settings = self.settings_for(store.address());
            if let Err(e) = store.depage(&settings) {
                warn!("address '{}': initial depage failed: {:#}", store.address(), e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Close cursors, flush current pages, persist low-water marks, wake
    /// blocked senders and release the directory lock. Idempotent.
    pub fn shutdown(&self) -> Result<()> {
        if self.ctx.shutdown.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut first_err = None;
        for store in self.stores() {
            if let Err(e) = store.close() {
                warn!("address '{}': close failed: {:#}", store.address(), e);
                first_err.get_or_insert(e);
            }
        }
        self.ctx.notify_released();
        self.lock.lock().take();
        info!(
            "paging manager stopped ({} bytes still accounted)",
            self.get_global_size()
        );
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.ctx.is_shutdown()
    }
}
