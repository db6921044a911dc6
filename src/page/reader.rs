//! page/reader: forward-only record reader over one page file.
//!
//! - Re-reads the file length on every step, so a reader over the current page
//!   observes records appended after it was opened.
//! - Stops silently at a torn tail: an incomplete trailing record with an intact
//!   header, a zero-filled tail, or a complete final record whose CRC does not
//!   match. `torn_tail()` reports its offset.
//! - A bad header check (a damaged length) over non-zero bytes, a bad CRC, an
//!   unknown record type or data after a SEAL record anywhere else is
//!   `CorruptPage`.
//!
//! Usage:
//!   let mut r = page.open_cursor()?;
//!   while let Some(entry) = r.next() { let entry = entry?; ... }

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use super::record::RecordHeader;
use crate::consts::{
    PAGE_HDR_OFF_SEQ, PAGE_HDR_OFF_STORE_ID, PAGE_HDR_SIZE, PAGE_MAGIC, REC_HDR_SIZE,
    REC_MESSAGE, REC_SEAL, REC_TX_COMMIT,
};
use crate::error::{PagingError, PagingResult};
use crate::message::PagedMessage;

/// One decoded record.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEntry {
    Message {
        ordinal: u64,
        offset: u64,
        tx_id: u64,
        message: PagedMessage,
    },
    TxCommit {
        offset: u64,
        tx_id: u64,
    },
    Seal {
        offset: u64,
    },
}

impl PageEntry {
    pub fn offset(&self) -> u64 {
        match self {
            PageEntry::Message { offset, .. }
            | PageEntry::TxCommit { offset, .. }
            | PageEntry::Seal { offset } => *offset,
        }
    }
}

/// Parsed page file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFileHeader {
    pub store_id: u64,
    pub seq: u64,
}

pub fn read_page_header(f: &mut File, path: &Path) -> PagingResult<PageFileHeader> {
    if f.metadata()?.len() < PAGE_HDR_SIZE as u64 {
        return Err(PagingError::corrupt(path, 0, "page file shorter than header"));
    }
    let mut hdr = [0u8; PAGE_HDR_SIZE];
    f.seek(SeekFrom::Start(0))?;
    f.read_exact(&mut hdr)?;
    if &hdr[..8] != PAGE_MAGIC {
        return Err(PagingError::corrupt(path, 0, "bad page magic"));
    }
    Ok(PageFileHeader {
        store_id: LittleEndian::read_u64(&hdr[PAGE_HDR_OFF_STORE_ID..PAGE_HDR_OFF_STORE_ID + 8]),
        seq: LittleEndian::read_u64(&hdr[PAGE_HDR_OFF_SEQ..PAGE_HDR_OFF_SEQ + 8]),
    })
}

/// Outcome of reading one frame at a position.
pub(crate) enum Frame {
    Complete {
        header: RecordHeader,
        payload: Vec<u8>,
        next: u64,
    },
    /// Clean end: no bytes after `pos`.
    End,
    /// Incomplete or unverifiable trailing record starting at `pos`.
    Torn,
}

pub(crate) fn read_frame(f: &mut File, path: &Path, pos: u64, file_len: u64) -> PagingResult<Frame> {
    if pos >= file_len {
        return Ok(Frame::End);
    }
    if pos + REC_HDR_SIZE as u64 > file_len {
        return Ok(Frame::Torn);
    }
    f.seek(SeekFrom::Start(pos))?;
    let mut raw = [0u8; REC_HDR_SIZE];
    f.read_exact(&mut raw)?;
    let header = RecordHeader::read(&raw);
    if !header.header_ok(&raw) {
        // Zeroes past the last write are what a crash leaves behind; anything
        // else means `len` and the records after it cannot be trusted.
        if zero_tail(f, pos, file_len)? {
            return Ok(Frame::Torn);
        }
        return Err(PagingError::corrupt(
            path,
            pos,
            format!("record header check mismatch (len={})", header.len),
        ));
    }
    let next = pos + header.total_len();
    if next > file_len {
        return Ok(Frame::Torn);
    }
    let mut payload = vec![0u8; header.len as usize];
    f.read_exact(&mut payload)?;

    let is_final = next == file_len;
    if !header.verify(&raw, &payload) {
        if is_final {
            return Ok(Frame::Torn);
        }
        return Err(PagingError::corrupt(
            path,
            pos,
            format!("record CRC mismatch (stored={})", header.crc32),
        ));
    }
    if !header.is_known_type() {
        if is_final {
            return Ok(Frame::Torn);
        }
        return Err(PagingError::corrupt(
            path,
            pos,
            format!("unknown record type {}", header.rec_type),
        ));
    }
    Ok(Frame::Complete {
        header,
        payload,
        next,
    })
}

/// True when every byte from `pos` to `file_len` is zero.
fn zero_tail(f: &mut File, pos: u64, file_len: u64) -> PagingResult<bool> {
    f.seek(SeekFrom::Start(pos))?;
    let mut left = file_len - pos;
    let mut buf = [0u8; 4096];
    while left > 0 {
        let n = left.min(buf.len() as u64) as usize;
        f.read_exact(&mut buf[..n])?;
        if buf[..n].iter().any(|&b| b != 0) {
            return Ok(false);
        }
        left -= n as u64;
    }
    Ok(true)
}

/// Decrements the owning page's reader count when dropped.
#[derive(Debug)]
pub(crate) struct ReaderGuard(Arc<AtomicUsize>);

impl ReaderGuard {
    pub(crate) fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        ReaderGuard(counter.clone())
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct PageReader {
    path: PathBuf,
    seq: u64,
    file: File,
    pos: u64,
    next_ordinal: u64,
    sealed: bool,
    failed: bool,
    torn_at: Option<u64>,
    _guard: Option<ReaderGuard>,
}

impl PageReader {
    pub(crate) fn open(path: &Path, guard: Option<ReaderGuard>) -> PagingResult<Self> {
        let mut file = File::open(path)?;
        let hdr = read_page_header(&mut file, path)?;
        Ok(Self {
            path: path.to_path_buf(),
            seq: hdr.seq,
            file,
            pos: PAGE_HDR_SIZE as u64,
            next_ordinal: 0,
            sealed: false,
            failed: false,
            torn_at: None,
            _guard: guard,
        })
    }

    /// Open a reader on a page file outside of any store (tools, verification).
    pub fn open_detached(path: &Path) -> PagingResult<Self> {
        Self::open(path, None)
    }

    /// Continue from a position previously taken from `offset()` and
    /// `next_ordinal()` of a reader over the same page.
    pub(crate) fn resume_at(&mut self, offset: u64, next_ordinal: u64) {
        self.pos = offset.max(PAGE_HDR_SIZE as u64);
        self.next_ordinal = next_ordinal;
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte offset of the next record to read.
    pub fn offset(&self) -> u64 {
        self.pos
    }

    /// Ordinal the next MESSAGE record will get.
    pub fn next_ordinal(&self) -> u64 {
        self.next_ordinal
    }

    /// True once the SEAL record was read: the reader is exhausted for good.
    pub fn reached_seal(&self) -> bool {
        self.sealed
    }

    /// Offset of a torn trailing record seen by the last step, if any.
    pub fn torn_tail(&self) -> Option<u64> {
        self.torn_at
    }

    fn step(&mut self) -> PagingResult<Option<PageEntry>> {
        let file_len = self.file.metadata()?.len();
        match read_frame(&mut self.file, &self.path, self.pos, file_len)? {
            Frame::End => {
                self.torn_at = None;
                Ok(None)
            }
            Frame::Torn => {
                self.torn_at = Some(self.pos);
                Ok(None)
            }
            Frame::Complete {
                header,
                payload,
                next,
            } => {
                let offset = self.pos;
                self.pos = next;
                self.torn_at = None;
                let entry = match header.rec_type {
                    REC_MESSAGE => {
                        let message = PagedMessage::decode(&payload).map_err(|e| {
                            PagingError::corrupt(&self.path, offset, format!("decode message: {}", e))
                        })?;
                        let ordinal = self.next_ordinal;
                        self.next_ordinal += 1;
                        PageEntry::Message {
                            ordinal,
                            offset,
                            tx_id: header.tx_id,
                            message,
                        }
                    }
                    REC_TX_COMMIT => PageEntry::TxCommit {
                        offset,
                        tx_id: header.tx_id,
                    },
                    REC_SEAL => {
                        self.sealed = true;
                        if next != file_len {
                            return Err(PagingError::corrupt(
                                &self.path,
                                next,
                                "data after SEAL record",
                            ));
                        }
                        PageEntry::Seal { offset }
                    }
                    other => {
                        return Err(PagingError::corrupt(
                            &self.path,
                            offset,
                            format!("unknown record type {}", other),
                        ))
                    }
                };
                Ok(Some(entry))
            }
        }
    }
}

impl Iterator for PageReader {
    type Item = PagingResult<PageEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.sealed || self.failed {
            return None;
        }
        match self.step() {
            Ok(Some(e)) => Some(Ok(e)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
