use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;

use broker_paging::config::{AddressSettings, AddressSettingsMap, PagingConfig};
use broker_paging::delivery::{Bindings, Delivery, MessageQueue};
use broker_paging::page::{list_pages, Page, PageLimits};
use broker_paging::util::store_dir_name;
use broker_paging::{paging_error, Address, PagedMessage, PagingError, PagingManager};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("bptest-recovery-{prefix}-{pid}-{t}-{id}"))
}

fn msg(i: u32) -> PagedMessage {
    let mut body = vec![b'x'; 1024];
    body[..6].copy_from_slice(format!("{:06}", i).as_bytes());
    PagedMessage::new(body)
}

fn index(d: &Delivery) -> u32 {
    std::str::from_utf8(&d.message.body[..6])
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(u32::MAX)
}

/// Receive, acknowledge and collect indexes until `n` arrived or the queue stays empty.
fn consume(m: &PagingManager, q: &MessageQueue, n: usize) -> Result<Vec<u32>> {
    let mut seen = Vec::new();
    while seen.len() < n {
        let Some(d) = q.receive(Duration::from_secs(2)) else {
            break;
        };
        seen.push(index(&d));
        m.acknowledge(&d)?;
    }
    Ok(seen)
}

fn bound(address: &str) -> (Arc<Bindings>, Arc<MessageQueue>) {
    let bindings = Bindings::new();
    let q = MessageQueue::new(format!("{address}-q"));
    bindings.bind(address, q.clone());
    (bindings, q)
}

fn limited(address: &str, max: u64) -> Arc<AddressSettingsMap> {
    Arc::new(AddressSettingsMap::new().with_address(
        address,
        AddressSettings::default().with_max_size_bytes(Some(max)),
    ))
}

fn page_files(root: &Path, address: &Address) -> Result<Vec<PathBuf>> {
    Ok(list_pages(&root.join(store_dir_name(address)))?
        .into_iter()
        .map(|(_, p)| p)
        .collect())
}

#[test]
fn paged_messages_survive_restart_in_order() -> Result<()> {
    let root = unique_root("restart");
    let addr = Address::new("orders");
    let settings = limited("orders", 10 * 1024);
    let cfg = PagingConfig::default()
        .with_directory(&root)
        .with_page_size(4096);
    let size = msg(0).memory_size();

    // First run: nothing is consumed, the broker "journals" its resident messages.
    let journal: Vec<PagedMessage>;
    let expected_paged: u64;
    {
        let (bindings, q) = bound("orders");
        let m = PagingManager::start(cfg.clone(), settings.clone(), bindings.clone())?;
        for i in 0..100 {
            assert!(m.send(&addr, msg(i))?.is_accepted());
        }
        assert!(m.is_paging(&addr));
        assert_eq!(m.get_global_size(), 100 * size);

        let pending = q.drain();
        journal = pending
            .iter()
            .filter(|d| !d.is_paged())
            .map(|d| (*d.message).clone())
            .collect();
        assert!(!journal.is_empty());
        expected_paged = (100 - journal.len() as u64) * size;
        m.shutdown()?;
        assert!(m.is_shutdown());
    }

    let (bindings, q) = bound("orders");
    let m = PagingManager::init(cfg, settings, bindings.clone())?;
    assert_eq!(m.get_global_size(), expected_paged);
    assert_eq!(m.get_address_size(&addr), expected_paged);
    assert!(m.is_paging(&addr));
    // Nothing is delivered before depaging starts.
    assert_eq!(q.message_count(), 0);

    for message in journal {
        m.restore_resident(&addr, message)?;
    }
    m.start_depaging()?;

    let seen = consume(&m, &q, 100)?;
    assert_eq!(seen, (0..100).collect::<Vec<_>>());
    assert_eq!(m.get_global_size(), 0);
    assert!(!m.is_paging(&addr));

    let store = m.get_page_store(&addr)?;
    assert_eq!(store.page_count(), 0, "fully acknowledged pages are reclaimed");
    assert!(m.metrics().pages_deleted > 0);
    Ok(())
}

#[test]
fn torn_tail_is_truncated_and_appends_continue() -> Result<()> {
    let root = unique_root("torn");
    let addr = Address::new("torn");
    // Every send is over the address limit, so everything is paged.
    let settings = limited("torn", 0);
    let cfg = PagingConfig::default().with_directory(&root);

    {
        let (bindings, _q) = bound("torn");
        let m = PagingManager::init(cfg.clone(), settings.clone(), bindings.clone())?;
        for i in 0..5 {
            m.send(&addr, msg(i))?;
        }
        assert_eq!(m.get_global_size(), 5 * msg(0).memory_size());
    }

    let files = page_files(&root, &addr)?;
    assert_eq!(files.len(), 1);
    let clean_len = fs::metadata(&files[0])?.len();
    {
        // Half of a record header: a crash in the middle of an append.
        let mut f = OpenOptions::new().append(true).open(&files[0])?;
        f.write_all(&[1u8, 0, 0, 0, 7, 7, 7])?;
        f.sync_all()?;
    }

    let (bindings, q) = bound("torn");
    let m = PagingManager::init(cfg, settings, bindings.clone())?;
    assert_eq!(m.metrics().torn_tails_truncated, 1);
    assert_eq!(fs::metadata(&files[0])?.len(), clean_len);
    assert_eq!(m.get_global_size(), 5 * msg(0).memory_size());

    m.send(&addr, msg(5))?;
    m.start_depaging()?;
    assert_eq!(consume(&m, &q, 6)?, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(m.get_global_size(), 0);
    Ok(())
}

#[test]
fn second_manager_on_locked_directory_fails() -> Result<()> {
    let root = unique_root("lock");
    let settings = Arc::new(AddressSettingsMap::new());
    let cfg = PagingConfig::default().with_directory(&root);

    let (b1, _q1) = bound("a");
    let m1 = PagingManager::init(cfg.clone(), settings.clone(), b1.clone())?;

    let (b2, _q2) = bound("a");
    assert!(PagingManager::init(cfg.clone(), settings.clone(), b2.clone()).is_err());

    m1.shutdown()?;
    let m3 = PagingManager::init(cfg, settings, b2.clone())?;
    assert!(!m3.is_shutdown());
    Ok(())
}

#[test]
fn corrupt_page_fails_only_its_store() -> Result<()> {
    let root = unique_root("corrupt");
    let bad = Address::new("bad");
    let good = Address::new("good");
    let settings = Arc::new(
        AddressSettingsMap::new()
            .with_default(AddressSettings::default().with_max_size_bytes(Some(0))),
    );
    let cfg = PagingConfig::default().with_directory(&root);

    {
        let bindings = Bindings::new();
        let m = PagingManager::init(cfg.clone(), settings.clone(), bindings.clone())?;
        for i in 0..3 {
            m.send(&bad, msg(i))?;
            m.send(&good, msg(i))?;
        }
    }

    // Flip a body byte of the first record; later records keep the file intact
    // beyond it, so this is interior corruption and not a torn tail.
    let files = page_files(&root, &bad)?;
    {
        let mut bytes = fs::read(&files[0])?;
        let body_byte = 24 + 20 + 8 + 1 + 4 + 10;
        bytes[body_byte] ^= 0xFF;
        fs::write(&files[0], &bytes)?;
    }

    let (bindings, q) = bound("good");
    let m = PagingManager::init(cfg, settings, bindings.clone())?;
    let failed = m.get_page_store(&bad)?;
    assert!(failed.failure().is_some());
    assert_eq!(failed.paged_size(), 0);
    assert_eq!(m.get_global_size(), 3 * msg(0).memory_size());

    let err = m.send(&bad, msg(9)).unwrap_err();
    assert!(matches!(
        paging_error(&err),
        Some(PagingError::StoreFailed { .. })
    ));

    m.start_depaging()?;
    assert_eq!(consume(&m, &q, 3)?, vec![0, 1, 2]);
    Ok(())
}

#[test]
fn damaged_record_length_fails_the_store_without_truncating() -> Result<()> {
    let root = unique_root("bad-length");
    let addr = Address::new("len");
    let settings = limited("len", 0);
    let cfg = PagingConfig::default().with_directory(&root);

    {
        let m = PagingManager::init(cfg.clone(), settings.clone(), Bindings::new())?;
        for i in 0..5 {
            m.send(&addr, PagedMessage::new(vec![i as u8; 100]))?;
        }
    }

    // High byte of the second record's length: the record now claims to run
    // far past the end of the file.
    let files = page_files(&root, &addr)?;
    let mut bytes = fs::read(&files[0])?;
    let second = 24 + PagedMessage::new(vec![0u8; 100]).memory_size() as usize;
    bytes[second + 12 + 3] = 0x7F;
    fs::write(&files[0], &bytes)?;
    let len_before = bytes.len() as u64;

    let (bindings, _q) = bound("len");
    let m = PagingManager::init(cfg, settings, bindings)?;
    let store = m.get_page_store(&addr)?;
    assert!(store.failure().is_some());
    assert_eq!(fs::metadata(&files[0])?.len(), len_before);
    assert_eq!(m.metrics().torn_tails_truncated, 0);
    Ok(())
}

#[test]
fn uncommitted_transaction_records_are_discarded_on_recovery() -> Result<()> {
    let root = unique_root("uncommitted");
    let addr = Address::new("tx");
    let dir = root.join(store_dir_name(&addr));
    fs::create_dir_all(&dir)?;
    let limits = PageLimits {
        page_size: 1 << 20,
        max_message_bytes: 1 << 20,
    };

    // A crash between the records of tx 7 and its commit marker; tx 8 finished.
    {
        let mut page = Page::create(&dir, 0xABCD, 1, limits)?;
        page.append(&msg(0), 0, true)?;
        page.append(&msg(1), 7, true)?;
        page.append(&msg(2), 7, true)?;
        page.append(&msg(3), 8, true)?;
        page.append_commit(8, true)?;
    }

    let (bindings, q) = bound("tx");
    let settings = limited("tx", 0);
    let cfg = PagingConfig::default().with_directory(&root);
    let m = PagingManager::init(cfg, settings, bindings.clone())?;
    assert_eq!(m.get_global_size(), 2 * msg(0).memory_size());

    // New transactions get ids past the ones on disk.
    let tx = m.begin_transaction();
    assert!(tx.id() > 8);
    m.rollback(tx);

    m.start_depaging()?;
    assert_eq!(consume(&m, &q, 2)?, vec![0, 3]);
    assert!(q.receive(Duration::from_millis(200)).is_none());
    assert_eq!(m.get_global_size(), 0);
    Ok(())
}
