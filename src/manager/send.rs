//! manager/send: producer and consumer paths.

use anyhow::{anyhow, Result};
use log::debug;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::core::{PagingManager, SendOutcome};
use crate::delivery::Delivery;
use crate::error::PagingError;
use crate::message::{Address, PagedMessage};
use crate::store::SendAttempt;

const BLOCK_POLL: Duration = Duration::from_millis(100);

impl PagingManager {
    /// Route a message to `address`: resident, paged, dropped or (block
    /// policy) wait until enough size is released.
    pub fn send(&self, address: &Address, mut message: PagedMessage) -> Result<SendOutcome> {
        self.assign_id(&mut message);
        let store = self.get_page_store(address)?;
        let mut blocked = false;
        loop {
            let settings = self.settings_for(address);
            match store.send(message, &settings)? {
                SendAttempt::Done(outcome) => return Ok(outcome),
                SendAttempt::Blocked(m) => {
                    message = m;
                    if !blocked {
                        blocked = true;
                        self.ctx.metrics.record_send_blocked();
                        debug!("address '{}': full, sender blocked", address);
                    }
                    self.ctx.wait_for_release(BLOCK_POLL);
                    if self.ctx.is_shutdown() {
                        return Err(PagingError::Shutdown.into());
                    }
                }
            }
        }
    }

    /// Re-account a resident message the broker reloaded from its own journal
    /// and route it. Call before `start_depaging` so it precedes paged data.
    pub fn restore_resident(&self, address: &Address, mut message: PagedMessage) -> Result<()> {
        if message.id == 0 {
            self.assign_id(&mut message);
        } else {
            self.next_message_id.fetch_max(message.id + 1, Ordering::AcqRel);
        }
        self.get_page_store(address)?.restore_resident(message)
    }

    /// Acknowledge one reference of a delivery. The message's size is released
    /// with the last reference, which may depage more messages.
    pub fn acknowledge(&self, delivery: &Delivery) -> Result<()> {
        let store = self.find_page_store(&delivery.address).ok_or_else(|| {
            anyhow!("acknowledge: no store for address '{}'", delivery.address)
        })?;
        let settings = self.settings_for(&delivery.address);
        store.acknowledge(delivery.sequence, &settings)
    }

    /// Depage `address` as far as its watermark allows.
    pub fn depage(&self, address: &Address) -> Result<usize> {
        match self.find_page_store(address) {
            Some(store) => store.depage(&self.settings_for(address)),
            None => Ok(0),
        }
    }

    pub(crate) fn assign_id(&self, message: &mut PagedMessage) {
        if message.id == 0 {
            message.id = self.next_message_id.fetch_add(1, Ordering::AcqRel);
        }
    }
}
