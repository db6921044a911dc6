//! manager/txn: transactional sends and acknowledgements.
//!
//! Staged sends stay in memory (not counted in any size) until commit. At
//! commit each address gets its staged messages in staged order under its store
//! lock; paged ones are written with the transaction id and followed by a
//! TX_COMMIT record, so recovery never emits records of a transaction that did
//! not finish committing. Staged deliveries are acknowledged after the sends
//! and handed back to the delivery target on rollback.

use anyhow::{anyhow, Context, Result};
use log::debug;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

use super::core::{PagingManager, SendOutcome};
use crate::delivery::Delivery;
use crate::error::PagingError;
use crate::message::{Address, PagedMessage};

/// Transaction handle. Consumed by `commit` or `rollback`.
#[derive(Debug)]
pub struct Transaction {
    id: u64,
    sends: Vec<(Address, PagedMessage)>,
    deliveries: Vec<Delivery>,
}

impl Transaction {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn staged_sends(&self) -> usize {
        self.sends.len()
    }

    pub fn staged_deliveries(&self) -> usize {
        self.deliveries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sends.is_empty() && self.deliveries.is_empty()
    }
}

impl PagingManager {
    pub fn begin_transaction(&self) -> Transaction {
        Transaction {
            id: self.next_tx_id.fetch_add(1, Ordering::AcqRel),
            sends: Vec::new(),
            deliveries: Vec::new(),
        }
    }

    /// Stage a send. Invisible to delivery and size accounting until commit.
    pub fn prepare_send(
        &self,
        tx: &mut Transaction,
        address: &Address,
        mut message: PagedMessage,
    ) -> Result<()> {
        if self.ctx.is_shutdown() {
            return Err(PagingError::Shutdown.into());
        }
        let size = message.memory_size();
        let max = self.ctx.config.max_message_bytes;
        if size > max {
            return Err(PagingError::MessageTooLarge { size, max }.into());
        }
        self.assign_id(&mut message);
        tx.sends.push((address.clone(), message));
        Ok(())
    }

    /// Stage the acknowledgement of a delivery; its size stays accounted
    /// until commit.
    pub fn prepare_delivery(&self, tx: &mut Transaction, delivery: Delivery) {
        tx.deliveries.push(delivery);
    }

    /// Make staged sends visible, then acknowledge staged deliveries. Returns
    /// one outcome per staged send, in staged order.
    ///
    /// Every target store, message size and staged delivery is checked before
    /// anything is applied, so a rejected commit changes nothing. Only an I/O
    /// failure while writing can leave a prefix of the address groups applied.
    pub fn commit(&self, tx: Transaction) -> Result<Vec<SendOutcome>> {
        if self.ctx.is_shutdown() {
            return Err(PagingError::Shutdown.into());
        }
        let Transaction {
            id,
            sends,
            deliveries,
        } = tx;

        // Group per address, keeping staged order inside each group.
        let mut groups: Vec<(Address, Vec<(usize, PagedMessage)>)> = Vec::new();
        let total = sends.len();
        for (i, (address, message)) in sends.into_iter().enumerate() {
            match groups.iter_mut().find(|(a, _)| *a == address) {
                Some((_, v)) => v.push((i, message)),
                None => groups.push((address, vec![(i, message)])),
            }
        }

        let mut targets = Vec::with_capacity(groups.len());
        for (address, staged) in groups {
            let store = self.get_page_store(&address)?;
            let (idx, messages): (Vec<usize>, Vec<PagedMessage>) = staged.into_iter().unzip();
            store
                .check_commit(&messages)
                .with_context(|| format!("commit tx {} on '{}'", id, address))?;
            targets.push((address, store, idx, messages));
        }
        let mut staged_acks: BTreeMap<(&Address, u64), usize> = BTreeMap::new();
        for d in &deliveries {
            *staged_acks.entry((&d.address, d.sequence)).or_default() += 1;
        }
        for (&(address, sequence), &count) in &staged_acks {
            self.find_page_store(address)
                .ok_or_else(|| anyhow!("no store for address '{}'", address))
                .and_then(|s| s.check_ack(sequence, count))
                .with_context(|| format!("commit tx {}: acknowledge {}", id, sequence))?;
        }

        let mut outcomes = vec![SendOutcome::Accepted; total];
        for (address, store, idx, messages) in targets {
            let settings = self.settings_for(&address);
            let done = store
                .commit_sends(id, messages, &settings)
                .with_context(|| format!("commit tx {} on '{}'", id, address))?;
            for (i, o) in idx.into_iter().zip(done) {
                outcomes[i] = o;
            }
        }
        for d in &deliveries {
            self.acknowledge(d)
                .with_context(|| format!("commit tx {}: acknowledge {}", id, d.sequence))?;
        }

        self.ctx.metrics.record_tx_committed();
        debug!(
            "tx {} committed: {} send(s), {} ack(s)",
            id,
            total,
            deliveries.len()
        );
        Ok(outcomes)
    }

    /// Discard staged sends and give staged deliveries back for redelivery.
    /// No size changes.
    pub fn rollback(&self, tx: Transaction) {
        for d in &tx.deliveries {
            self.ctx.target.cancel(d);
        }
        self.ctx.metrics.record_tx_rolled_back();
        debug!(
            "tx {} rolled back: {} send(s) discarded, {} delivery(ies) returned",
            tx.id,
            tx.sends.len(),
            tx.deliveries.len()
        );
    }
}
