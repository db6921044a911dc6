//! Typed errors of the storage layer (pages, readers, depaging cursor).
//!
//! Orchestration code (store, manager, recovery) works with `anyhow::Result`
//! and keeps these reachable through `downcast_ref::<PagingError>()`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PagingError {
    /// The record does not fit into a page that already holds messages.
    /// Recovered by the store: seal, roll to a new page, retry once.
    #[error("page {seq} full: {size} + {needed} bytes exceeds bound {bound}")]
    CapacityExceeded {
        seq: u64,
        size: u64,
        needed: u64,
        bound: u64,
    },

    #[error("message of {size} bytes exceeds max_message_bytes {max}")]
    MessageTooLarge { size: u64, max: u64 },

    #[error("page {seq} still has {readers} open reader(s)")]
    PageInUse { seq: u64, readers: usize },

    #[error("page {seq} is not sealed")]
    PageNotSealed { seq: u64 },

    #[error("page {seq} is sealed")]
    PageSealed { seq: u64 },

    #[error("corrupt page {} at offset {offset}: {reason}", path.display())]
    CorruptPage {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    #[error("page {} belongs to store {found:#x}, expected {expected:#x}", path.display())]
    ForeignPage {
        path: PathBuf,
        expected: u64,
        found: u64,
    },

    #[error("store for address '{address}' is failed: {reason}")]
    StoreFailed { address: String, reason: String },

    #[error("paging manager is shut down")]
    Shutdown,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PagingError {
    pub fn corrupt(path: impl Into<PathBuf>, offset: u64, reason: impl Into<String>) -> Self {
        PagingError::CorruptPage {
            path: path.into(),
            offset,
            reason: reason.into(),
        }
    }

    /// True for errors that must take the owning store out of service.
    pub fn is_fatal_for_store(&self) -> bool {
        matches!(
            self,
            PagingError::CorruptPage { .. } | PagingError::ForeignPage { .. }
        )
    }
}

pub type PagingResult<T> = std::result::Result<T, PagingError>;

/// Look through an `anyhow` chain for a typed paging error.
pub fn paging_error(err: &anyhow::Error) -> Option<&PagingError> {
    err.chain().find_map(|e| e.downcast_ref::<PagingError>())
}
