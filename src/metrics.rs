//! Paging metrics: relaxed atomic counters owned by one `PagingManager`.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PagingMetrics {
    messages_paged: AtomicU64,
    bytes_paged: AtomicU64,
    messages_depaged: AtomicU64,
    messages_dropped: AtomicU64,
    pages_created: AtomicU64,
    pages_sealed: AtomicU64,
    pages_deleted: AtomicU64,
    page_delete_retries: AtomicU64,
    sends_blocked: AtomicU64,
    tx_committed: AtomicU64,
    tx_rolled_back: AtomicU64,
    torn_tails_truncated: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub messages_paged: u64,
    pub bytes_paged: u64,
    pub messages_depaged: u64,
    pub messages_dropped: u64,
    pub pages_created: u64,
    pub pages_sealed: u64,
    pub pages_deleted: u64,
    pub page_delete_retries: u64,
    pub sends_blocked: u64,
    pub tx_committed: u64,
    pub tx_rolled_back: u64,
    pub torn_tails_truncated: u64,
}

impl MetricsSnapshot {
    /// Average bytes per paged message.
    pub fn avg_paged_message_bytes(&self) -> f64 {
        if self.messages_paged == 0 {
            0.0
        } else {
            self.bytes_paged as f64 / self.messages_paged as f64
        }
    }
}

impl PagingMetrics {
    pub fn record_paged(&self, bytes: u64) {
        self.messages_paged.fetch_add(1, Ordering::Relaxed);
        self.bytes_paged.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_paged_batch(&self, messages: u64, bytes: u64) {
        self.messages_paged.fetch_add(messages, Ordering::Relaxed);
        self.bytes_paged.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_depaged(&self) {
        self.messages_depaged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_page_created(&self) {
        self.pages_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_page_sealed(&self) {
        self.pages_sealed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_page_deleted(&self) {
        self.pages_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_page_delete_retry(&self) {
        self.page_delete_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_blocked(&self) {
        self.sends_blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tx_committed(&self) {
        self.tx_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tx_rolled_back(&self) {
        self.tx_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_torn_tail(&self) {
        self.torn_tails_truncated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_paged: self.messages_paged.load(Ordering::Relaxed),
            bytes_paged: self.bytes_paged.load(Ordering::Relaxed),
            messages_depaged: self.messages_depaged.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            pages_created: self.pages_created.load(Ordering::Relaxed),
            pages_sealed: self.pages_sealed.load(Ordering::Relaxed),
            pages_deleted: self.pages_deleted.load(Ordering::Relaxed),
            page_delete_retries: self.page_delete_retries.load(Ordering::Relaxed),
            sends_blocked: self.sends_blocked.load(Ordering::Relaxed),
            tx_committed: self.tx_committed.load(Ordering::Relaxed),
            tx_rolled_back: self.tx_rolled_back.load(Ordering::Relaxed),
            torn_tails_truncated: self.torn_tails_truncated.load(Ordering::Relaxed),
        }
    }
}
