//! Address page store: per-address NOT_PAGING / PAGING state machine.
//!
//! Owns the ordered pages of one address (oldest first, the last one is the
//! current page while unsealed), the depaging cursor, and the address size
//! split into:
//! - resident: routed to delivery and not yet released (last ack pending);
//! - paged: written to pages and not yet depaged.
//!
//! All operations on one store are serialized by its mutex. Global size grows
//! under that mutex, before the message can be routed; releases are applied
//! after the mutex is dropped.
//!
//! Submodules:
//! - acks.rs    : per-page acknowledgement ledger and the durable low-water mark.
//! - recovery.rs: rebuild a store from its directory at startup.

pub mod acks;
pub(crate) mod recovery;

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AddressSettings, FullPolicy, PagingConfig};
use crate::cursor::{CursorEvent, DepageCursor};
use crate::delivery::{Delivery, DeliveryTarget, Origin};
use crate::error::{PagingError, PagingResult};
use crate::manager::SendOutcome;
use crate::message::{Address, PagedMessage};
use crate::metrics::PagingMetrics;
use crate::page::{Page, PageLimits};
use acks::{LowWaterMark, PageAcks};

/// State shared by the manager and all of its stores.
pub(crate) struct StoreContext {
    pub config: PagingConfig,
    pub global_size: AtomicU64,
    pub metrics: PagingMetrics,
    pub target: Arc<dyn DeliveryTarget>,
    pub next_sequence: AtomicU64,
    pub depaging: AtomicBool,
    pub shutdown: AtomicBool,
    release_lock: Mutex<()>,
    released: Condvar,
}

impl StoreContext {
    pub fn new(config: PagingConfig, target: Arc<dyn DeliveryTarget>) -> Self {
        Self {
            config,
            global_size: AtomicU64::new(0),
            metrics: PagingMetrics::default(),
            target,
            next_sequence: AtomicU64::new(1),
            depaging: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            release_lock: Mutex::new(()),
            released: Condvar::new(),
        }
    }

    pub fn limits(&self) -> PageLimits {
        PageLimits {
            page_size: self.config.page_size,
            max_message_bytes: self.config.max_message_bytes,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Wait until some size is released (or the timeout passes).
    pub fn wait_for_release(&self, timeout: Duration) {
        let mut g = self.release_lock.lock();
        self.released.wait_for(&mut g, timeout);
    }

    pub fn notify_released(&self) {
        let _g = self.release_lock.lock();
        self.released.notify_all();
    }
}

/// One page plus its acknowledgement ledger.
pub struct PageSlot {
    pub page: Page,
    pub acks: PageAcks,
}

/// Outcome of one send attempt against the store.
pub(crate) enum SendAttempt {
    Done(SendOutcome),
    /// Block policy and the limit is hit: the message is handed back.
    Blocked(PagedMessage),
}

enum Placement {
    Resident,
    Paged,
    Drop,
    Block,
}

struct InFlight {
    size: u64,
    refs: usize,
    origin: Origin,
}

/// Global size released by one operation, applied once the store is unlocked.
#[derive(Default)]
struct Settle {
    released: u64,
}

pub(crate) struct StoreState {
    store_id: u64,
    paging: bool,
    pages: BTreeMap<u64, PageSlot>,
    next_page_seq: u64,
    cursor: DepageCursor,
    resident: u64,
    paged: u64,
    in_flight: HashMap<u64, InFlight>,
    committed: HashSet<u64>,
    failed: Option<String>,
    lwm_dirty: bool,
}

impl StoreState {
    fn new(store_id: u64) -> Self {
        Self {
            store_id,
            paging: false,
            pages: BTreeMap::new(),
            next_page_seq: 1,
            cursor: DepageCursor::new(),
            resident: 0,
            paged: 0,
            in_flight: HashMap::new(),
            committed: HashSet::new(),
            failed: None,
            lwm_dirty: false,
        }
    }

    fn current_seq(&self) -> Option<u64> {
        self.pages
            .iter()
            .next_back()
            .filter(|(_, s)| !s.page.is_sealed())
            .map(|(seq, _)| *seq)
    }
}

pub struct AddressPageStore {
    address: Address,
    dir: PathBuf,
    ctx: Arc<StoreContext>,
    state: Mutex<StoreState>,
}

impl AddressPageStore {
    pub(crate) fn new(ctx: Arc<StoreContext>, address: Address, dir: PathBuf) -> Self {
        Self {
            address,
            dir,
            ctx,
            state: Mutex::new(StoreState::new(rand::random::<u64>())),
        }
    }

    pub(crate) fn from_state(
        ctx: Arc<StoreContext>,
        address: Address,
        dir: PathBuf,
        state: StoreState,
    ) -> Self {
        Self {
            address,
            dir,
            ctx,
            state: Mutex::new(state),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    pub fn is_paging(&self) -> bool {
        self.state.lock().paging
    }

    /// Resident + paged bytes. Zero once everything sent was acknowledged.
    pub fn address_size(&self) -> u64 {
        let st = self.state.lock();
        st.resident + st.paged
    }

    pub fn resident_size(&self) -> u64 {
        self.state.lock().resident
    }

    pub fn paged_size(&self) -> u64 {
        self.state.lock().paged
    }

    pub fn page_count(&self) -> usize {
        self.state.lock().pages.len()
    }

    pub fn page_sequences(&self) -> Vec<u64> {
        self.state.lock().pages.keys().copied().collect()
    }

    /// Deliveries routed and not yet fully acknowledged.
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Reason the store was taken out of service, if it was.
    pub fn failure(&self) -> Option<String> {
        self.state.lock().failed.clone()
    }

    // ---------------------------------------------------------------------
    // Operations driven by the manager
    // ---------------------------------------------------------------------

    pub(crate) fn send(&self, message: PagedMessage, settings: &AddressSettings) -> Result<SendAttempt> {
        let mut settle = Settle::default();
        let result = {
            let mut st = self.state.lock();
            self.send_locked(&mut st, message, settings, &mut settle)
        };
        self.settle(settle);
        result
    }

    /// Make a committed transaction's sends visible, in staged order.
    pub(crate) fn commit_sends(
        &self,
        tx_id: u64,
        messages: Vec<PagedMessage>,
        settings: &AddressSettings,
    ) -> Result<Vec<SendOutcome>> {
        let mut settle = Settle::default();
        let result = {
            let mut st = self.state.lock();
            self.commit_locked(&mut st, tx_id, messages, settings, &mut settle)
        };
        self.settle(settle);
        result
    }

    /// Everything `commit_sends` rejects before writing, checked without side
    /// effects.
    pub(crate) fn check_commit(&self, messages: &[PagedMessage]) -> Result<()> {
        let st = self.state.lock();
        self.check_usable(&st)?;
        for m in messages {
            self.check_size(m.memory_size())?;
        }
        Ok(())
    }

    /// Fails unless `count` acknowledgements of `sequence` would be accepted.
    pub(crate) fn check_ack(&self, sequence: u64, count: usize) -> Result<()> {
        let st = self.state.lock();
        match st.in_flight.get(&sequence) {
            Some(entry) if entry.refs >= count => Ok(()),
            Some(entry) => Err(anyhow!(
                "address '{}': delivery {} has {} outstanding reference(s), {} staged",
                self.address,
                sequence,
                entry.refs,
                count
            )),
            None => Err(anyhow!(
                "address '{}': no outstanding delivery with sequence {}",
                self.address,
                sequence
            )),
        }
    }

    /// Account and route a resident message reloaded from the broker's journal.
    pub(crate) fn restore_resident(&self, message: PagedMessage) -> Result<()> {
        let mut settle = Settle::default();
        let result = {
            let mut st = self.state.lock();
            match self.check_usable(&st) {
                Ok(()) => {
                    let size = message.memory_size();
                    self.grow_global(size);
                    st.resident += size;
                    settle.released += self.route(&mut st, Arc::new(message), Origin::Resident, size);
                    Ok(())
                }
                Err(e) => Err(e),
            }
        };
        self.settle(settle);
        result.map_err(Into::into)
    }

    pub(crate) fn acknowledge(&self, sequence: u64, settings: &AddressSettings) -> Result<()> {
        let mut settle = Settle::default();
        let result = {
            let mut st = self.state.lock();
            self.ack_locked(&mut st, sequence, settings, &mut settle)
        };
        self.settle(settle);
        result
    }

    /// Depage as far as the watermark allows. Returns the number of messages routed.
    pub(crate) fn depage(&self, settings: &AddressSettings) -> Result<usize> {
        let mut settle = Settle::default();
        let result = {
            let mut st = self.state.lock();
            self.depage_locked(&mut st, settings, &mut settle)
        };
        self.settle(settle);
        result
    }

    /// Shutdown: release the cursor, flush the current page (left unsealed),
    /// persist the low-water mark.
    pub(crate) fn close(&self) -> Result<()> {
        let mut st = self.state.lock();
        st.cursor.close();
        if let Some(seq) = st.current_seq() {
            if let Some(slot) = st.pages.get_mut(&seq) {
                slot.page
                    .sync()
                    .with_context(|| format!("sync current page {} of '{}'", seq, self.address))?;
            }
        }
        if self.dir.exists() {
            self.persist_lwm(&mut st)?;
        }
        Ok(())
    }

    /// Drop pages recovery found fully acknowledged and persist discards.
    fn finish_recovery(&self) -> Result<()> {
        let mut st = self.state.lock();
        self.reclaim(&mut st)?;
        if st.pages.is_empty() {
            st.paging = false;
        }
        if st.lwm_dirty && self.dir.exists() {
            self.persist_lwm(&mut st)?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Locked internals
    // ---------------------------------------------------------------------

    fn check_usable(&self, st: &StoreState) -> PagingResult<()> {
        if self.ctx.is_shutdown() {
            return Err(PagingError::Shutdown);
        }
        if let Some(reason) = &st.failed {
            return Err(PagingError::StoreFailed {
                address: self.address.to_string(),
                reason: reason.clone(),
            });
        }
        Ok(())
    }

    fn check_size(&self, size: u64) -> PagingResult<()> {
        let max = self.ctx.config.max_message_bytes;
        if size > max {
            return Err(PagingError::MessageTooLarge { size, max });
        }
        Ok(())
    }

    /// Global limit first, then the address limit, then the current state.
    fn place(
        &self,
        st: &StoreState,
        size: u64,
        settings: &AddressSettings,
        pending_global: u64,
        in_tx: bool,
    ) -> Placement {
        let cfg = &self.ctx.config;
        let global = self.ctx.global_size.load(Ordering::Acquire) + pending_global;
        let global_hit = cfg.global_max_size.is_some_and(|max| global + size > max);
        let address_hit = settings
            .max_size_bytes
            .is_some_and(|max| st.resident + st.paged + size > max);

        if global_hit || address_hit {
            match settings.policy_or(cfg.default_policy) {
                FullPolicy::Page => Placement::Paged,
                FullPolicy::Drop => Placement::Drop,
                // A commit never waits while holding the store.
                FullPolicy::Block if in_tx => Placement::Paged,
                FullPolicy::Block => Placement::Block,
            }
        } else if st.paging {
            Placement::Paged
        } else {
            Placement::Resident
        }
    }

    fn send_locked(
        &self,
        st: &mut StoreState,
        message: PagedMessage,
        settings: &AddressSettings,
        settle: &mut Settle,
    ) -> Result<SendAttempt> {
        self.check_usable(st)?;
        let size = message.memory_size();
        self.check_size(size)?;

        match self.place(st, size, settings, 0, false) {
            Placement::Drop => {
                self.ctx.metrics.record_dropped();
                debug!(
                    "address '{}': full, dropping message {} ({} bytes)",
                    self.address, message.id, size
                );
                Ok(SendAttempt::Done(SendOutcome::Dropped))
            }
            Placement::Block => Ok(SendAttempt::Blocked(message)),
            Placement::Resident => {
                self.grow_global(size);
                st.resident += size;
                settle.released += self.route(st, Arc::new(message), Origin::Resident, size);
                Ok(SendAttempt::Done(SendOutcome::Accepted))
            }
            Placement::Paged => {
                let sync = self.ctx.config.sync_on_append && message.durable;
                self.append_rolling(st, |p| p.append(&message, 0, sync))?;
                st.paged += size;
                self.grow_global(size);
                self.ctx.metrics.record_paged(size);
                if let Err(e) = self.depage_locked(st, settings, settle) {
                    error!("address '{}': depage after send failed: {:#}", self.address, e);
                }
                Ok(SendAttempt::Done(SendOutcome::Accepted))
            }
        }
    }

    fn commit_locked(
        &self,
        st: &mut StoreState,
        tx_id: u64,
        messages: Vec<PagedMessage>,
        settings: &AddressSettings,
        settle: &mut Settle,
    ) -> Result<Vec<SendOutcome>> {
        self.check_usable(st)?;
        for m in &messages {
            self.check_size(m.memory_size())?;
        }

        let mut outcomes = Vec::with_capacity(messages.len());
        let mut batch_paged = 0u64;
        let mut paged_count = 0usize;
        let mut durable = false;

        for message in messages {
            let size = message.memory_size();
            match self.place(st, size, settings, batch_paged, true) {
                Placement::Drop => {
                    self.ctx.metrics.record_dropped();
                    outcomes.push(SendOutcome::Dropped);
                }
                Placement::Resident => {
                    self.grow_global(size);
                    st.resident += size;
                    settle.released += self.route(st, Arc::new(message), Origin::Resident, size);
                    outcomes.push(SendOutcome::Accepted);
                }
                Placement::Paged | Placement::Block => {
                    durable |= message.durable;
                    if let Err(e) = self.append_rolling(st, |p| p.append(&message, tx_id, false)) {
                        // Records already written stay on disk without a commit
                        // marker: the cursor discards them.
                        st.paged -= batch_paged;
                        return Err(e.context(format!("commit tx {} to '{}'", tx_id, self.address)));
                    }
                    st.paged += size;
                    batch_paged += size;
                    paged_count += 1;
                    outcomes.push(SendOutcome::Accepted);
                }
            }
        }

        if paged_count > 0 {
            let sync = self.ctx.config.sync_on_append && durable;
            if let Err(e) = self.append_rolling(st, |p| p.append_commit(tx_id, sync)) {
                st.paged -= batch_paged;
                return Err(e.context(format!("commit marker for tx {} on '{}'", tx_id, self.address)));
            }
            st.committed.insert(tx_id);
            self.grow_global(batch_paged);
            self.ctx.metrics.record_paged_batch(paged_count as u64, batch_paged);
            debug!(
                "address '{}': tx {} committed {} paged message(s), {} bytes",
                self.address, tx_id, paged_count, batch_paged
            );
            if let Err(e) = self.depage_locked(st, settings, settle) {
                error!("address '{}': depage after commit failed: {:#}", self.address, e);
            }
        }
        Ok(outcomes)
    }

    fn ack_locked(
        &self,
        st: &mut StoreState,
        sequence: u64,
        settings: &AddressSettings,
        settle: &mut Settle,
    ) -> Result<()> {
        let Some(entry) = st.in_flight.get_mut(&sequence) else {
            return Err(anyhow!(
                "address '{}': no outstanding delivery with sequence {}",
                self.address,
                sequence
            ));
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            if let Some(done) = st.in_flight.remove(&sequence) {
                self.release(st, done.size, done.origin);
                settle.released += done.size;
            }
            if self.ctx.config.sync_acks && st.lwm_dirty && self.dir.exists() {
                self.persist_lwm(st)?;
            }
        }
        if st.failed.is_some() || self.ctx.is_shutdown() {
            return Ok(());
        }
        self.depage_locked(st, settings, settle).map(|_| ())
    }

    /// Route one message to delivery. Returns the size released right away
    /// when the target created no reference.
    fn route(&self, st: &mut StoreState, message: Arc<PagedMessage>, origin: Origin, size: u64) -> u64 {
        let sequence = self.ctx.next_sequence.fetch_add(1, Ordering::AcqRel);
        let delivery = Delivery {
            address: self.address.clone(),
            message,
            origin,
            sequence,
            binding: 0,
        };
        let refs = self.ctx.target.route(&delivery);
        if refs == 0 {
            self.release(st, size, origin);
            return size;
        }
        st.in_flight.insert(sequence, InFlight { size, refs, origin });
        0
    }

    fn release(&self, st: &mut StoreState, size: u64, origin: Origin) {
        st.resident = st.resident.saturating_sub(size);
        if let Origin::Paged { page, ordinal } = origin {
            if let Some(slot) = st.pages.get_mut(&page) {
                slot.acks.ack(ordinal);
                st.lwm_dirty = true;
            }
        }
    }

    /// Depaging threshold on resident size: the address watermark (or the
    /// global one), capped by the address and global max sizes.
    fn watermark(&self, settings: &AddressSettings) -> u64 {
        let cfg = &self.ctx.config;
        let mut w = settings.watermark_or(cfg.global_watermark);
        if let Some(max) = settings.max_size_bytes {
            w = w.min(max);
        }
        if let Some(max) = cfg.global_max_size {
            w = w.min(max);
        }
        w
    }

    fn depage_locked(
        &self,
        st: &mut StoreState,
        settings: &AddressSettings,
        settle: &mut Settle,
    ) -> Result<usize> {
        let mut routed = 0usize;
        if self.ctx.depaging.load(Ordering::Acquire)
            && !self.ctx.is_shutdown()
            && st.failed.is_none()
        {
            let watermark = self.watermark(settings);
            while st.paging && st.resident <= watermark {
                let event = {
                    let StoreState {
                        cursor,
                        pages,
                        committed,
                        ..
                    } = &mut *st;
                    cursor.next(pages, committed)
                };
                match event {
                    Ok(CursorEvent::Message(rec)) => {
                        st.paged = st.paged.saturating_sub(rec.size);
                        st.resident += rec.size;
                        self.ctx.metrics.record_depaged();
                        routed += 1;
                        let origin = Origin::Paged {
                            page: rec.page,
                            ordinal: rec.ordinal,
                        };
                        settle.released += self.route(st, Arc::new(rec.message), origin, rec.size);
                    }
                    Ok(CursorEvent::Discarded { page, ordinal, tx_id }) => {
                        debug!(
                            "address '{}': skipping record {}/{} of uncommitted tx {}",
                            self.address, page, ordinal, tx_id
                        );
                        if let Some(slot) = st.pages.get_mut(&page) {
                            slot.acks.ack(ordinal);
                            st.lwm_dirty = true;
                        }
                    }
                    Ok(CursorEvent::EndOfStore) => {
                        if st.paged == 0 {
                            self.stop_paging(st)?;
                        }
                        break;
                    }
                    Err(e) => {
                        if e.is_fatal_for_store() {
                            self.fail(st, e.to_string());
                        }
                        return Err(anyhow::Error::new(e)
                            .context(format!("depage address '{}'", self.address)));
                    }
                }
            }
        }
        self.reclaim(st)?;
        Ok(routed)
    }

    fn fail(&self, st: &mut StoreState, reason: String) {
        error!("address '{}': store failed: {}", self.address, reason);
        st.cursor.close();
        st.failed = Some(reason);
    }

    fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)
                .with_context(|| format!("create store dir {}", self.dir.display()))?;
        }
        Ok(())
    }

    fn start_paging(&self, st: &mut StoreState) -> Result<()> {
        self.ensure_current(st)?;
        st.paging = true;
        info!(
            "address '{}': paging started (resident {} bytes)",
            self.address, st.resident
        );
        Ok(())
    }

    fn stop_paging(&self, st: &mut StoreState) -> Result<()> {
        if let Some(seq) = st.current_seq() {
            if let Some(slot) = st.pages.get_mut(&seq) {
                slot.page
                    .seal()
                    .with_context(|| format!("seal page {} of '{}'", seq, self.address))?;
                self.ctx.metrics.record_page_sealed();
            }
        }
        st.cursor.close();
        st.paging = false;
        st.lwm_dirty = true;
        info!(
            "address '{}': paging stopped (resident {} bytes)",
            self.address, st.resident
        );
        Ok(())
    }

    /// Make sure an unsealed current page exists.
    fn ensure_current(&self, st: &mut StoreState) -> Result<()> {
        if st.current_seq().is_some() {
            return Ok(());
        }
        self.ensure_dir()?;
        let seq = st.next_page_seq;
        let page = Page::create(&self.dir, st.store_id, seq, self.ctx.limits())
            .with_context(|| format!("create page {} of '{}'", seq, self.address))?;
        st.next_page_seq = seq + 1;
        st.pages.insert(
            seq,
            PageSlot {
                page,
                acks: PageAcks::default(),
            },
        );
        self.ctx.metrics.record_page_created();
        st.lwm_dirty = true;
        if st.pages.len() == 1 {
            // First page of this store: record its identity.
            self.persist_lwm(st)?;
        }
        debug!("address '{}': new current page {}", self.address, seq);
        Ok(())
    }

    /// Apply `op` to the current page. On `CapacityExceeded` seal it, roll
    /// to a fresh page and retry once.
    fn append_rolling<T>(
        &self,
        st: &mut StoreState,
        op: impl Fn(&mut Page) -> PagingResult<T>,
    ) -> Result<T> {
        if !st.paging {
            self.start_paging(st)?;
        } else {
            self.ensure_current(st)?;
        }
        let seq = st
            .current_seq()
            .ok_or_else(|| anyhow!("address '{}': no current page", self.address))?;
        let first = match st.pages.get_mut(&seq) {
            Some(slot) => op(&mut slot.page),
            None => return Err(anyhow!("address '{}': page {} vanished", self.address, seq)),
        };
        match first {
            Ok(v) => Ok(v),
            Err(PagingError::CapacityExceeded { .. }) => {
                if let Some(slot) = st.pages.get_mut(&seq) {
                    slot.page
                        .seal()
                        .with_context(|| format!("seal page {} of '{}'", seq, self.address))?;
                    self.ctx.metrics.record_page_sealed();
                }
                self.ensure_current(st)?;
                let next = st
                    .current_seq()
                    .ok_or_else(|| anyhow!("address '{}': no current page", self.address))?;
                let slot = st
                    .pages
                    .get_mut(&next)
                    .ok_or_else(|| anyhow!("address '{}': page {} vanished", self.address, next))?;
                op(&mut slot.page)
                    .with_context(|| format!("append to fresh page {} of '{}'", next, self.address))
            }
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("append to page {} of '{}'", seq, self.address))),
        }
    }

    /// Delete fully acknowledged sealed pages, oldest first. Stops at the first
    /// page that is not reclaimable or still has readers.
    fn reclaim(&self, st: &mut StoreState) -> Result<()> {
        let mut deleted = false;
        loop {
            let Some((&seq, slot)) = st.pages.iter().next() else {
                break;
            };
            if !slot.page.is_sealed() || !slot.acks.is_complete(slot.page.message_count()) {
                break;
            }
            match slot.page.delete() {
                Ok(()) => {
                    st.pages.remove(&seq);
                    deleted = true;
                    self.ctx.metrics.record_page_deleted();
                    info!("address '{}': page {} reclaimed", self.address, seq);
                }
                Err(PagingError::PageInUse { readers, .. }) => {
                    self.ctx.metrics.record_page_delete_retry();
                    warn!(
                        "address '{}': page {} still has {} reader(s), delete deferred",
                        self.address, seq, readers
                    );
                    break;
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e)
                        .context(format!("delete page {} of '{}'", seq, self.address)))
                }
            }
        }
        if deleted && self.dir.exists() {
            self.persist_lwm(st)?;
        }
        Ok(())
    }

    fn persist_lwm(&self, st: &mut StoreState) -> Result<()> {
        let mut lwm = LowWaterMark::new(self.address.as_str(), st.store_id);
        lwm.oldest_page = st.pages.keys().next().copied();
        for (seq, slot) in &st.pages {
            lwm.pages.insert(*seq, slot.acks.clone());
        }
        lwm.save(&self.dir)
            .with_context(|| format!("persist low-water mark of '{}'", self.address))?;
        st.lwm_dirty = false;
        Ok(())
    }

    /// Called with the store locked, before the sized message can be routed,
    /// so a release never runs ahead of its matching add.
    fn grow_global(&self, size: u64) {
        if size > 0 {
            self.ctx.global_size.fetch_add(size, Ordering::AcqRel);
        }
    }

    /// Apply the release and wake blocked senders.
    fn settle(&self, s: Settle) {
        if s.released > 0 {
            self.ctx.global_size.fetch_sub(s.released, Ordering::AcqRel);
            self.ctx.notify_released();
        }
    }
}
