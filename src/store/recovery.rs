//! Rebuild an address store from `<paging_dir>/addr-<hex>/` at startup.
//!
//! Steps:
//! 1) load depage.json (store id + acknowledged ordinals), if present;
//! 2) open every page oldest first, verify all records, truncate a torn tail;
//!    an unsealed page that is not the newest gets sealed;
//! 3) collect committed transaction ids from TX_COMMIT records;
//! 4) recompute paged bytes: committed or non-transactional messages not yet
//!    acknowledged. Uncommitted transactional records are marked acknowledged.
//!
//! Any error here (interior corruption, a page of another store, an unreadable
//! depage.json) makes this store failed; other stores are unaffected.

use anyhow::Result;
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::acks::LowWaterMark;
use super::{AddressPageStore, PageSlot, StoreContext, StoreState};
use crate::message::Address;
use crate::page::{list_pages, read_header, Page, PageScan};

pub(crate) struct RecoveredStore {
    pub store: Arc<AddressPageStore>,
    pub paged_bytes: u64,
    pub max_message_id: u64,
    pub max_tx_id: u64,
}

pub(crate) fn recover_store(
    ctx: &Arc<StoreContext>,
    address: Address,
    dir: PathBuf,
) -> Result<RecoveredStore> {
    match rebuild(ctx, &address, &dir) {
        Ok((state, max_message_id, max_tx_id)) => {
            let store = Arc::new(AddressPageStore::from_state(
                ctx.clone(),
                address,
                dir,
                state,
            ));
            store.finish_recovery()?;
            Ok(RecoveredStore {
                paged_bytes: store.paged_size(),
                store,
                max_message_id,
                max_tx_id,
            })
        }
        Err(e) => {
            error!("address '{}': recovery failed, store disabled: {:#}", address, e);
            let mut state = StoreState::new(0);
            state.failed = Some(format!("{:#}", e));
            Ok(RecoveredStore {
                store: Arc::new(AddressPageStore::from_state(ctx.clone(), address, dir, state)),
                paged_bytes: 0,
                max_message_id: 0,
                max_tx_id: 0,
            })
        }
    }
}

fn rebuild(
    ctx: &Arc<StoreContext>,
    address: &Address,
    dir: &Path,
) -> Result<(StoreState, u64, u64)> {
    let lwm = LowWaterMark::load(dir)?;
    let files = list_pages(dir)?;

    let store_id = match (&lwm, files.first()) {
        (Some(l), _) => l.store_id,
        (None, Some((_, path))) => read_header(path)?.store_id,
        (None, None) => rand::random::<u64>(),
    };

    let mut state = StoreState::new(store_id);
    let mut scans: Vec<(u64, PageScan)> = Vec::with_capacity(files.len());
    let mut max_message_id = 0u64;
    let mut max_tx_id = 0u64;
    let last_index = files.len().saturating_sub(1);

    for (i, (seq, path)) in files.iter().enumerate() {
        let (mut page, scan) = Page::recover(path, Some(store_id), ctx.limits())?;
        if scan.truncated_at.is_some() {
            ctx.metrics.record_torn_tail();
        }
        if !page.is_sealed() && i != last_index {
            warn!(
                "address '{}': page {} is unsealed but not the newest, sealing it",
                address, seq
            );
            page.seal()?;
        }
        max_message_id = max_message_id.max(scan.max_message_id);
        for m in &scan.messages {
            max_tx_id = max_tx_id.max(m.tx_id);
        }
        for tx in &scan.commits {
            max_tx_id = max_tx_id.max(*tx);
            state.committed.insert(*tx);
        }

        let acks = lwm.as_ref().map(|l| l.acks(*seq)).unwrap_or_default();
        state.pages.insert(*seq, PageSlot { page, acks });
        state.next_page_seq = seq + 1;
        scans.push((*seq, scan));
    }

    let mut discarded = 0usize;
    for (seq, scan) in &scans {
        let Some(slot) = state.pages.get_mut(seq) else {
            continue;
        };
        for m in &scan.messages {
            if m.tx_id != 0 && !state.committed.contains(&m.tx_id) {
                if slot.acks.ack(m.ordinal) {
                    discarded += 1;
                }
            } else if !slot.acks.is_acked(m.ordinal) {
                state.paged += m.size;
            }
        }
    }

    state.paging = !state.pages.is_empty();
    state.lwm_dirty = discarded > 0;

    info!(
        "address '{}': recovered {} page(s), {} bytes paged{}",
        address,
        state.pages.len(),
        state.paged,
        if discarded > 0 {
            format!(", {} uncommitted record(s) discarded", discarded)
        } else {
            String::new()
        }
    );
    Ok((state, max_message_id, max_tx_id))
}
