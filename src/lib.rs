pub mod config;
pub mod consts;
pub mod cursor;
pub mod delivery;
pub mod error;
pub mod inspect;
pub mod lock;
pub mod manager;
pub mod message;
pub mod metrics;
pub mod page;
pub mod store;
pub mod util;

pub use config::{
    AddressSettings, AddressSettingsMap, FullPolicy, PagingConfig, PagingConfigBuilder,
    SettingsSource,
};
pub use cursor::{CursorEvent, DepageCursor, DepagedRecord};
pub use delivery::{Bindings, Delivery, DeliveryTarget, MessageQueue, Origin};
pub use error::{paging_error, PagingError, PagingResult};
pub use manager::{PagingManager, SendOutcome, Transaction};
pub use message::{Address, PagedMessage, PropertyValue};
pub use metrics::MetricsSnapshot;
pub use page::{Page, PageEntry, PageLimits, PageReader};
pub use store::AddressPageStore;
