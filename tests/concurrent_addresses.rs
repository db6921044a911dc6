use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};

use broker_paging::config::{AddressSettings, AddressSettingsMap, PagingConfig};
use broker_paging::delivery::{Bindings, Delivery, MessageQueue};
use broker_paging::{Address, PagedMessage, PagingManager};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("bptest-concurrent-{prefix}-{pid}-{t}-{id}"))
}

fn numbered(i: u32, len: usize) -> PagedMessage {
    let mut body = vec![b'c'; len.max(8)];
    body[..8].copy_from_slice(format!("{:08}", i).as_bytes());
    PagedMessage::new(body)
}

fn index(d: &Delivery) -> u32 {
    std::str::from_utf8(&d.message.body[..8])
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(u32::MAX)
}

#[test]
fn producers_and_consumers_on_many_addresses() -> Result<()> {
    const ADDRESSES: usize = 4;
    const PER_ADDRESS: u32 = 300;

    let bindings = Bindings::new();
    let mut queues = Vec::new();
    let mut settings = AddressSettingsMap::new();
    for a in 0..ADDRESSES {
        let name = format!("addr-{a}");
        let q = MessageQueue::new(name.clone());
        bindings.bind(name.as_str(), q.clone());
        queues.push(q);
        settings = settings.with_address(
            name.as_str(),
            AddressSettings::default().with_max_size_bytes(Some(8 * 1024)),
        );
    }
    let cfg = PagingConfig::default()
        .with_directory(unique_root("many"))
        .with_page_size(16 * 1024)
        .with_sync_on_append(false);
    let m = PagingManager::start(cfg, Arc::new(settings), bindings)?;

    // Deterministic per-address body sizes.
    let mut rng = oorandom::Rand32::new(0x5eed);
    let sizes: Vec<Vec<usize>> = (0..ADDRESSES)
        .map(|_| {
            (0..PER_ADDRESS)
                .map(|_| 8 + rng.rand_range(0..2048) as usize)
                .collect()
        })
        .collect();

    let received = thread::scope(|s| -> Result<Vec<Vec<u32>>> {
        let m = &m;
        let sizes = &sizes;
        let producers: Vec<_> = (0..ADDRESSES)
            .map(|a| {
                s.spawn(move || -> Result<()> {
                    let addr = Address::new(format!("addr-{a}"));
                    for i in 0..PER_ADDRESS {
                        let outcome = m.send(&addr, numbered(i, sizes[a][i as usize]))?;
                        if !outcome.is_accepted() {
                            return Err(anyhow!("message {i} to {addr} not accepted"));
                        }
                    }
                    Ok(())
                })
            })
            .collect();

        let consumers: Vec<_> = queues
            .iter()
            .map(|q| {
                s.spawn(move || -> Result<Vec<u32>> {
                    let mut seen = Vec::new();
                    while seen.len() < PER_ADDRESS as usize {
                        let d = q
                            .receive(Duration::from_secs(5))
                            .ok_or_else(|| anyhow!("{}: stalled after {}", q.name(), seen.len()))?;
                        seen.push(index(&d));
                        m.acknowledge(&d)?;
                    }
                    Ok(seen)
                })
            })
            .collect();

        for p in producers {
            p.join().map_err(|_| anyhow!("producer panicked"))??;
        }
        consumers
            .into_iter()
            .map(|c| c.join().map_err(|_| anyhow!("consumer panicked"))?)
            .collect()
    })?;

    for seen in received {
        assert_eq!(seen, (0..PER_ADDRESS).collect::<Vec<_>>());
    }
    assert_eq!(m.get_global_size(), 0);
    for a in 0..ADDRESSES {
        let addr = Address::new(format!("addr-{a}"));
        assert_eq!(m.get_address_size(&addr), 0);
        assert!(!m.is_paging(&addr));
    }
    assert!(m.metrics().messages_paged > 0);
    Ok(())
}

#[test]
fn transactions_interleaved_with_consumers() -> Result<()> {
    const TXS: u32 = 50;
    const PER_TX: u32 = 4;

    let bindings = Bindings::new();
    let q = MessageQueue::new("tx-q");
    bindings.bind("tx", q.clone());
    let settings = AddressSettingsMap::new().with_address(
        "tx",
        AddressSettings::default().with_max_size_bytes(Some(4 * 1024)),
    );
    let cfg = PagingConfig::default()
        .with_directory(unique_root("tx-interleaved"))
        .with_page_size(8 * 1024)
        .with_sync_on_append(false);
    let m = PagingManager::start(cfg, Arc::new(settings), bindings)?;
    let addr = Address::new("tx");

    let seen = thread::scope(|s| -> Result<Vec<u32>> {
        let m = &m;
        let addr = &addr;
        let producer = s.spawn(move || -> Result<()> {
            for t in 0..TXS {
                let mut tx = m.begin_transaction();
                for k in 0..PER_TX {
                    m.prepare_send(&mut tx, addr, numbered(t * PER_TX + k, 600))?;
                }
                // Every third transaction is abandoned.
                if t % 3 == 2 {
                    m.rollback(tx);
                } else {
                    m.commit(tx)?;
                }
            }
            Ok(())
        });

        let expected = (0..TXS).filter(|t| t % 3 != 2).count() * PER_TX as usize;
        let mut seen = Vec::new();
        while seen.len() < expected {
            let d = q
                .receive(Duration::from_secs(5))
                .ok_or_else(|| anyhow!("stalled after {}", seen.len()))?;
            seen.push(index(&d));
            m.acknowledge(&d)?;
        }
        producer.join().map_err(|_| anyhow!("producer panicked"))??;
        Ok(seen)
    })?;

    let expected: Vec<u32> = (0..TXS)
        .filter(|t| t % 3 != 2)
        .flat_map(|t| (0..PER_TX).map(move |k| t * PER_TX + k))
        .collect();
    assert_eq!(seen, expected);
    assert!(q.receive(Duration::from_millis(200)).is_none());
    assert_eq!(m.get_global_size(), 0);
    Ok(())
}

#[test]
fn global_size_never_underflows_under_concurrent_acks() -> Result<()> {
    const ADDRESSES: usize = 3;
    const PER_ADDRESS: u32 = 2_000;

    let bindings = Bindings::new();
    let mut queues = Vec::new();
    for a in 0..ADDRESSES {
        let name = format!("gs-{a}");
        let q = MessageQueue::new(name.clone());
        bindings.bind(name.as_str(), q.clone());
        queues.push(q);
    }
    let cfg = PagingConfig::default()
        .with_directory(unique_root("global-size"))
        .with_sync_on_append(false);
    let m = PagingManager::start(cfg, Arc::new(AddressSettingsMap::new()), bindings)?;
    let size = numbered(0, 64).memory_size();
    // Never more than everything that was ever sent.
    let ceiling = size * (ADDRESSES as u64) * u64::from(PER_ADDRESS);
    let done = AtomicBool::new(false);

    let peak = thread::scope(|s| -> Result<u64> {
        let m = &m;
        let done = &done;
        let watcher = s.spawn(move || {
            let mut peak = 0u64;
            while !done.load(Ordering::Acquire) {
                peak = peak.max(m.get_global_size());
            }
            peak
        });

        let workers: Vec<_> = queues
            .iter()
            .enumerate()
            .flat_map(|(a, q)| {
                let producer = s.spawn(move || -> Result<()> {
                    let addr = Address::new(format!("gs-{a}"));
                    for i in 0..PER_ADDRESS {
                        m.send(&addr, numbered(i, 64))?;
                    }
                    Ok(())
                });
                let consumer = s.spawn(move || -> Result<()> {
                    for _ in 0..PER_ADDRESS {
                        let d = q
                            .receive(Duration::from_secs(5))
                            .ok_or_else(|| anyhow!("{}: stalled", q.name()))?;
                        m.acknowledge(&d)?;
                    }
                    Ok(())
                });
                [producer, consumer]
            })
            .collect();

        let mut result = Ok(());
        for w in workers {
            if let Err(e) = w.join().map_err(|_| anyhow!("worker panicked")).and_then(|r| r) {
                result = Err(e);
            }
        }
        done.store(true, Ordering::Release);
        let peak = watcher.join().map_err(|_| anyhow!("watcher panicked"))?;
        result.map(|()| peak)
    })?;

    assert!(peak <= ceiling, "global size wrapped: {peak}");
    assert_eq!(m.get_global_size(), 0);
    Ok(())
}
