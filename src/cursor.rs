//! Depaging cursor: resumable, forward-only reader over all pages of one store.
//!
//! Emits messages in send order: every record of the oldest page, then the
//! next page, and so on. Ordinals already acknowledged in the low-water mark are
//! skipped. Records of a transaction without a known commit are reported as
//! `Discarded` and never emitted as messages.
//!
//! The cursor holds a reader (and so a `PageInUse` reference) only on the page
//! it is positioned in. `close()` drops the reader but keeps the position.

use std::collections::{BTreeMap, HashSet};

use crate::error::PagingResult;
use crate::message::PagedMessage;
use crate::page::{PageEntry, PageReader};
use crate::store::PageSlot;

/// A message read back from a page.
#[derive(Debug, Clone)]
pub struct DepagedRecord {
    pub page: u64,
    pub ordinal: u64,
    pub tx_id: u64,
    pub message: PagedMessage,
    /// Accounting size (full record length).
    pub size: u64,
}

#[derive(Debug)]
pub enum CursorEvent {
    Message(DepagedRecord),
    /// Record of an uncommitted transaction: never delivered.
    Discarded { page: u64, ordinal: u64, tx_id: u64 },
    /// Every record written so far has been read.
    EndOfStore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Position {
    page: u64,
    offset: u64,
    next_ordinal: u64,
    /// SEAL of `page` was read; continue with the next page.
    finished: bool,
}

#[derive(Default)]
pub struct DepageCursor {
    position: Option<Position>,
    reader: Option<PageReader>,
}

impl DepageCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Page the cursor is positioned in, if any.
    pub fn current_page(&self) -> Option<u64> {
        self.position.filter(|p| !p.finished).map(|p| p.page)
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Release the page reader; the position is kept.
    pub fn close(&mut self) {
        self.reader = None;
    }

    pub fn next(
        &mut self,
        pages: &BTreeMap<u64, PageSlot>,
        committed: &HashSet<u64>,
    ) -> PagingResult<CursorEvent> {
        loop {
            if self.reader.is_none() {
                let Some(seq) = self.target_page(pages) else {
                    return Ok(CursorEvent::EndOfStore);
                };
                let Some(slot) = pages.get(&seq) else {
                    return Ok(CursorEvent::EndOfStore);
                };
                let mut reader = slot.page.open_cursor()?;
                match self.position {
                    Some(p) if p.page == seq => reader.resume_at(p.offset, p.next_ordinal),
                    _ => {
                        self.position = Some(Position {
                            page: seq,
                            offset: reader.offset(),
                            next_ordinal: 0,
                            finished: false,
                        })
                    }
                }
                self.reader = Some(reader);
            }

            let Some(reader) = self.reader.as_mut() else {
                continue;
            };
            let seq = reader.seq();
            let entry = reader.next();
            let here = Position {
                page: seq,
                offset: reader.offset(),
                next_ordinal: reader.next_ordinal(),
                finished: reader.reached_seal(),
            };

            match entry {
                Some(Ok(PageEntry::Message {
                    ordinal,
                    tx_id,
                    message,
                    ..
                })) => {
                    self.position = Some(here);
                    if pages.get(&seq).is_some_and(|s| s.acks.is_acked(ordinal)) {
                        continue;
                    }
                    if tx_id != 0 && !committed.contains(&tx_id) {
                        return Ok(CursorEvent::Discarded {
                            page: seq,
                            ordinal,
                            tx_id,
                        });
                    }
                    let size = message.memory_size();
                    return Ok(CursorEvent::Message(DepagedRecord {
                        page: seq,
                        ordinal,
                        tx_id,
                        message,
                        size,
                    }));
                }
                Some(Ok(PageEntry::TxCommit { .. })) => {
                    self.position = Some(here);
                }
                Some(Ok(PageEntry::Seal { .. })) => {
                    self.position = Some(here);
                    self.reader = None;
                }
                Some(Err(e)) => {
                    self.reader = None;
                    return Err(e);
                }
                // End of an unsealed page: the writer has not appended more yet.
                None => return Ok(CursorEvent::EndOfStore),
            }
        }
    }

    fn target_page(&self, pages: &BTreeMap<u64, PageSlot>) -> Option<u64> {
        match self.position {
            None => pages.keys().next().copied(),
            Some(p) if !p.finished && pages.contains_key(&p.page) => Some(p.page),
            Some(p) => pages.range(p.page + 1..).next().map(|(seq, _)| *seq),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{Page, PageLimits};
    use crate::store::acks::PageAcks;
    use std::path::PathBuf;

    fn unique_dir(prefix: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "bp-cursor-{prefix}-{}-{}",
            std::process::id(),
            crate::util::now_millis()
        ));
        std::fs::create_dir_all(&dir).expect("create dir");
        dir
    }

    fn limits() -> PageLimits {
        PageLimits {
            page_size: 1 << 20,
            max_message_bytes: 1 << 20,
        }
    }

    fn slot(page: Page) -> PageSlot {
        PageSlot {
            page,
            acks: PageAcks::default(),
        }
    }

    fn body(ev: CursorEvent) -> Vec<u8> {
        match ev {
            CursorEvent::Message(r) => r.message.body,
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[test]
    fn walks_pages_in_order_and_resumes_after_close() {
        let dir = unique_dir("walk");
        let mut p1 = Page::create(&dir, 1, 1, limits()).expect("p1");
        p1.append(&PagedMessage::new(vec![1]), 0, false).expect("m1");
        p1.append(&PagedMessage::new(vec![2]), 0, false).expect("m2");
        p1.seal().expect("seal");
        let mut p2 = Page::create(&dir, 1, 2, limits()).expect("p2");
        p2.append(&PagedMessage::new(vec![3]), 0, false).expect("m3");

        let mut pages = BTreeMap::new();
        pages.insert(1, slot(p1));
        pages.insert(2, slot(p2));
        let committed = HashSet::new();

        let mut c = DepageCursor::new();
        assert_eq!(body(c.next(&pages, &committed).expect("next")), vec![1]);
        c.close();
        assert_eq!(body(c.next(&pages, &committed).expect("next")), vec![2]);
        assert_eq!(body(c.next(&pages, &committed).expect("next")), vec![3]);
        assert_eq!(c.current_page(), Some(2));
        assert!(matches!(
            c.next(&pages, &committed).expect("end"),
            CursorEvent::EndOfStore
        ));

        // Appends to the current page become visible to the open cursor.
        if let Some(s) = pages.get_mut(&2) {
            s.page
                .append(&PagedMessage::new(vec![4]), 0, false)
                .expect("m4");
        }
        assert_eq!(body(c.next(&pages, &committed).expect("next")), vec![4]);
    }

    #[test]
    fn skips_acked_and_discards_uncommitted() {
        let dir = unique_dir("filter");
        let mut p = Page::create(&dir, 1, 1, limits()).expect("page");
        p.append(&PagedMessage::new(vec![0]), 0, false).expect("m0");
        p.append(&PagedMessage::new(vec![1]), 7, false).expect("tx 7");
        p.append(&PagedMessage::new(vec![2]), 8, false).expect("tx 8");
        p.append_commit(8, false).expect("commit 8");
        p.append(&PagedMessage::new(vec![3]), 0, false).expect("m3");

        let mut s = slot(p);
        s.acks.ack(0);
        let mut pages = BTreeMap::new();
        pages.insert(1, s);
        let committed: HashSet<u64> = [8].into_iter().collect();

        let mut c = DepageCursor::new();
        assert!(matches!(
            c.next(&pages, &committed).expect("discard"),
            CursorEvent::Discarded { ordinal: 1, tx_id: 7, .. }
        ));
        assert_eq!(body(c.next(&pages, &committed).expect("next")), vec![2]);
        assert_eq!(body(c.next(&pages, &committed).expect("next")), vec![3]);
    }

    #[test]
    fn reader_is_released_after_seal() {
        let dir = unique_dir("release");
        let mut p = Page::create(&dir, 1, 1, limits()).expect("page");
        p.append(&PagedMessage::new(vec![0]), 0, false).expect("m0");
        p.seal().expect("seal");
        let mut pages = BTreeMap::new();
        pages.insert(1, slot(p));
        let committed = HashSet::new();

        let mut c = DepageCursor::new();
        body(c.next(&pages, &committed).expect("m0"));
        assert_eq!(pages[&1].page.readers(), 1);
        assert!(matches!(
            c.next(&pages, &committed).expect("end"),
            CursorEvent::EndOfStore
        ));
        assert_eq!(pages[&1].page.readers(), 0);
        assert_eq!(c.current_page(), None);
    }
}
