//! Hand-off to the broker's delivery mechanism.
//!
//! A store routes every message that becomes deliverable (resident sends,
//! depaged records, restored resident messages) through a `DeliveryTarget`.
//! The target reports how many queue references it created; the message's size
//! is released once the last reference is acknowledged via
//! `PagingManager::acknowledge`.
//!
//! `Bindings` + `MessageQueue` are an in-memory target: one or more FIFO queues
//! bound to an address, honouring scheduled delivery times.

use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::message::{Address, PagedMessage};
use crate::util::now_millis;

/// Where a delivered message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Resident,
    Paged { page: u64, ordinal: u64 },
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub address: Address,
    pub message: Arc<PagedMessage>,
    pub origin: Origin,
    /// Routing order; unique per manager.
    pub sequence: u64,
    /// Index of the binding this copy was handed to (set by the target).
    pub binding: usize,
}

impl Delivery {
    pub fn is_paged(&self) -> bool {
        matches!(self.origin, Origin::Paged { .. })
    }
}

pub trait DeliveryTarget: Send + Sync {
    /// Accept a delivery. Returns the number of references created; each must
    /// be acknowledged once. `0` releases the message immediately.
    fn route(&self, delivery: &Delivery) -> usize;

    /// Take back an un-acknowledged reference for redelivery in its original order.
    fn cancel(&self, delivery: &Delivery);
}

/// FIFO of deliveries ordered by routing sequence.
#[derive(Debug)]
pub struct MessageQueue {
    name: String,
    ready: Mutex<BTreeMap<u64, Delivery>>,
    arrived: Condvar,
}

impl MessageQueue {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            ready: Mutex::new(BTreeMap::new()),
            arrived: Condvar::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Messages waiting in the queue, scheduled ones included.
    pub fn message_count(&self) -> usize {
        self.ready.lock().len()
    }

    pub fn push(&self, delivery: Delivery) {
        self.ready.lock().insert(delivery.sequence, delivery);
        self.arrived.notify_all();
    }

    /// Next due delivery without waiting.
    pub fn receive_immediate(&self) -> Option<Delivery> {
        let mut ready = self.ready.lock();
        Self::take_due(&mut ready, now_millis()).0
    }

    /// Wait up to `timeout` for the next due delivery.
    pub fn receive(&self, timeout: Duration) -> Option<Delivery> {
        let deadline = Instant::now() + timeout;
        let mut ready = self.ready.lock();
        loop {
            let (found, next_due) = Self::take_due(&mut ready, now_millis());
            if found.is_some() {
                return found;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let mut wait_until = deadline;
            if let Some(due) = next_due {
                let in_ms = due.saturating_sub(now_millis());
                wait_until = wait_until.min(now + Duration::from_millis(in_ms.max(1)));
            }
            self.arrived.wait_until(&mut ready, wait_until);
        }
    }

    /// Drain every delivery currently queued, due or not.
    pub fn drain(&self) -> Vec<Delivery> {
        let mut ready = self.ready.lock();
        std::mem::take(&mut *ready).into_values().collect()
    }

    // First delivery whose scheduled time has passed, plus the earliest
    // pending schedule when none is due.
    fn take_due(ready: &mut BTreeMap<u64, Delivery>, now: u64) -> (Option<Delivery>, Option<u64>) {
        let mut next_due: Option<u64> = None;
        let mut hit = None;
        for (seq, d) in ready.iter() {
            match d.message.scheduled_delivery() {
                Some(at) if at > now => {
                    next_due = Some(next_due.map_or(at, |n| n.min(at)));
                }
                _ => {
                    hit = Some(*seq);
                    break;
                }
            }
        }
        match hit {
            Some(seq) => (ready.remove(&seq), None),
            None => (None, next_due),
        }
    }
}

/// Address -> bound queues. Each bound queue gets its own reference.
#[derive(Debug, Default)]
pub struct Bindings {
    routes: RwLock<HashMap<Address, Vec<Arc<MessageQueue>>>>,
}

impl Bindings {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn bind(&self, address: impl Into<Address>, queue: Arc<MessageQueue>) {
        self.routes.write().entry(address.into()).or_default().push(queue);
    }

    pub fn queues(&self, address: &Address) -> Vec<Arc<MessageQueue>> {
        self.routes.read().get(address).cloned().unwrap_or_default()
    }
}

impl DeliveryTarget for Bindings {
    fn route(&self, delivery: &Delivery) -> usize {
        let routes = self.routes.read();
        let Some(queues) = routes.get(&delivery.address) else {
            return 0;
        };
        for (i, q) in queues.iter().enumerate() {
            let mut copy = delivery.clone();
            copy.binding = i;
            q.push(copy);
        }
        queues.len()
    }

    fn cancel(&self, delivery: &Delivery) {
        let routes = self.routes.read();
        if let Some(q) = routes
            .get(&delivery.address)
            .and_then(|qs| qs.get(delivery.binding))
        {
            q.push(delivery.clone());
        }
    }
}
