use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};

use broker_paging::config::{
    AddressSettings, AddressSettingsMap, FullPolicy, PagingConfig, PagingConfigBuilder,
};
use broker_paging::delivery::{Bindings, MessageQueue};
use broker_paging::store::acks::LowWaterMark;
use broker_paging::util::store_dir_name;
use broker_paging::{Address, PagedMessage, PagingManager};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("bptest-builder-{prefix}-{pid}-{t}-{id}"))
}

#[test]
fn builder_overrides_defaults() {
    let root = unique_root("fields");
    let cfg = PagingConfigBuilder::from_default()
        .directory(&root)
        .global_max_size(Some(1 << 20))
        .global_watermark(1 << 16)
        .page_size(1 << 14)
        .max_message_bytes(1 << 12)
        .default_policy(FullPolicy::Block)
        .sync_on_append(false)
        .sync_acks(true)
        .build();

    assert_eq!(cfg.directory, root);
    assert_eq!(cfg.global_max_size, Some(1 << 20));
    assert_eq!(cfg.global_watermark, 1 << 16);
    assert_eq!(cfg.page_size, 1 << 14);
    assert_eq!(cfg.max_message_bytes, 1 << 12);
    assert_eq!(cfg.default_policy, FullPolicy::Block);
    assert!(!cfg.sync_on_append);
    assert!(cfg.sync_acks);

    let plain = PagingConfig::default();
    assert_eq!(plain.global_max_size, None);
    assert_eq!(plain.default_policy, FullPolicy::Page);
    assert!(plain.sync_on_append);
    assert!(!plain.sync_acks);
}

#[test]
fn full_policy_names() {
    assert_eq!("page".parse::<FullPolicy>(), Ok(FullPolicy::Page));
    assert_eq!("continue".parse::<FullPolicy>(), Ok(FullPolicy::Page));
    assert_eq!(" Drop ".parse::<FullPolicy>(), Ok(FullPolicy::Drop));
    assert_eq!("BLOCK".parse::<FullPolicy>(), Ok(FullPolicy::Block));
    assert!("fail".parse::<FullPolicy>().is_err());
    assert_eq!(FullPolicy::Block.to_string(), "block");
}

/// Acknowledged ordinals in the persisted low-water mark of the first page.
fn persisted_acks(root: &Path, address: &Address) -> Result<u64> {
    let lwm = LowWaterMark::load(&root.join(store_dir_name(address)))?
        .ok_or_else(|| anyhow!("no low-water mark for {address}"))?;
    let first = lwm
        .oldest_page
        .ok_or_else(|| anyhow!("low-water mark without pages"))?;
    Ok(lwm.acks(first).acked_count())
}

fn ack_one(sync_acks: bool) -> Result<u64> {
    let root = unique_root(if sync_acks { "sync-acks" } else { "lazy-acks" });
    let bindings = Bindings::new();
    let q = MessageQueue::new("q");
    bindings.bind("acks", q.clone());
    let settings = AddressSettingsMap::new().with_address(
        "acks",
        AddressSettings::default().with_max_size_bytes(Some(0)),
    );
    let cfg = PagingConfig::default()
        .with_directory(&root)
        .with_sync_acks(sync_acks);
    let m = PagingManager::start(cfg, Arc::new(settings), bindings)?;
    let addr = Address::new("acks");

    for i in 0..3u8 {
        m.send(&addr, PagedMessage::new(vec![i; 64]))?;
    }
    let d = q
        .receive(Duration::from_secs(1))
        .ok_or_else(|| anyhow!("expected a delivery"))?;
    m.acknowledge(&d)?;

    let acked = persisted_acks(&root, &addr)?;
    m.shutdown()?;
    // Shutdown always persists.
    assert_eq!(persisted_acks(&root, &addr)?, 1);
    Ok(acked)
}

#[test]
fn sync_acks_persists_every_acknowledgement() -> Result<()> {
    assert_eq!(ack_one(true)?, 1);
    assert_eq!(ack_one(false)?, 0);
    Ok(())
}

#[test]
fn address_watermark_limits_depaging() -> Result<()> {
    let bindings = Bindings::new();
    let q = MessageQueue::new("q");
    bindings.bind("wm", q.clone());
    let body = vec![7u8; 100];
    let size = PagedMessage::new(body.clone()).memory_size();
    let settings = AddressSettingsMap::new().with_address(
        "wm",
        AddressSettings::default()
            .with_max_size_bytes(Some(5 * size))
            .with_watermark(2 * size),
    );
    let cfg = PagingConfig::default()
        .with_directory(unique_root("watermark"))
        .with_sync_on_append(false);
    let m = PagingManager::start(cfg, Arc::new(settings), bindings)?;
    let addr = Address::new("wm");

    for _ in 0..10 {
        m.send(&addr, PagedMessage::new(body.clone()))?;
    }
    let store = m.get_page_store(&addr)?;
    assert_eq!(q.message_count(), 5);
    assert_eq!(store.paged_size(), 5 * size);

    // Depaging resumes only once resident size is back at the watermark.
    for expected_paged in [5, 5, 4] {
        let d = q
            .receive(Duration::from_secs(1))
            .ok_or_else(|| anyhow!("expected a delivery"))?;
        m.acknowledge(&d)?;
        assert_eq!(store.paged_size(), expected_paged * size);
    }
    assert_eq!(q.message_count(), 3);
    assert_eq!(store.resident_size(), 3 * size);
    Ok(())
}
