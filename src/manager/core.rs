//! manager/core: `PagingManager` type and read-side API.

use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::{AddressSettings, PagingConfig, SettingsSource};
use crate::error::PagingError;
use crate::lock::LockGuard;
use crate::message::Address;
use crate::metrics::MetricsSnapshot;
use crate::store::{AddressPageStore, StoreContext};
use crate::util::store_dir_name;

/// Result of a send. `Dropped` is a flow-control outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted,
    Dropped,
}

impl SendOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SendOutcome::Accepted)
    }
}

pub struct PagingManager {
    pub(crate) ctx: Arc<StoreContext>,
    pub(crate) settings: Arc<dyn SettingsSource>,
    pub(crate) stores: RwLock<HashMap<Address, Arc<AddressPageStore>>>,
    pub(crate) next_message_id: AtomicU64,
    pub(crate) next_tx_id: AtomicU64,
    // Exclusive lock on the paging directory; taken away on shutdown.
    pub(crate) lock: Mutex<Option<LockGuard>>,
}

impl PagingManager {
    pub fn config(&self) -> &PagingConfig {
        &self.ctx.config
    }

    /// Sum of all address sizes (resident + paged), maintained incrementally.
    pub fn get_global_size(&self) -> u64 {
        self.ctx.global_size.load(Ordering::Acquire)
    }

    /// Store of `address`, created on first use.
    pub fn get_page_store(&self, address: &Address) -> Result<Arc<AddressPageStore>> {
        if let Some(s) = self.stores.read().get(address) {
            return Ok(s.clone());
        }
        if self.ctx.is_shutdown() {
            return Err(PagingError::Shutdown.into());
        }
        let mut stores = self.stores.write();
        let store = stores.entry(address.clone()).or_insert_with(|| {
            let dir = self.ctx.config.directory.join(store_dir_name(address));
            Arc::new(AddressPageStore::new(self.ctx.clone(), address.clone(), dir))
        });
        Ok(store.clone())
    }

    /// Existing store of `address`, without creating one.
    pub fn find_page_store(&self, address: &Address) -> Option<Arc<AddressPageStore>> {
        self.stores.read().get(address).cloned()
    }

    pub fn stores(&self) -> Vec<Arc<AddressPageStore>> {
        let mut v: Vec<_> = self.stores.read().values().cloned().collect();
        v.sort_by(|a, b| a.address().cmp(b.address()));
        v
    }

    pub fn addresses(&self) -> Vec<Address> {
        let mut v: Vec<_> = self.stores.read().keys().cloned().collect();
        v.sort();
        v
    }

    pub fn is_paging(&self, address: &Address) -> bool {
        self.find_page_store(address).is_some_and(|s| s.is_paging())
    }

    pub fn get_address_size(&self, address: &Address) -> u64 {
        self.find_page_store(address).map_or(0, |s| s.address_size())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    pub(crate) fn settings_for(&self, address: &Address) -> AddressSettings {
        self.settings.settings_for(address)
    }
}

impl Drop for PagingManager {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("paging manager shutdown on drop: {:#}", e);
        }
    }
}
