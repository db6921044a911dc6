//! manager: the paging manager, one context object owning every address store.
//!
//! Split by concern:
//! - core.rs: the `PagingManager` type, lookups, size queries, Drop.
//! - open.rs: init (lock + recovery), start_depaging, shutdown.
//! - send.rs: send / restore_resident / acknowledge / depage.
//! - txn.rs: prepare_send / prepare_delivery / commit / rollback.

pub mod core;
pub mod open;
pub mod send;
pub mod txn;

pub use self::core::{PagingManager, SendOutcome};
pub use self::txn::Transaction;
