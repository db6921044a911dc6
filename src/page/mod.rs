//! page: one on-disk paging segment.
//!
//! File: <store_dir>/page-<seq:010>.page
//! [header 24B: magic "BPPAGE01" | store_id u64 | seq u64] then record frames
//! (see record.rs). A sealed page ends with a SEAL record and is never written again.
//!
//! Submodules:
//! - record.rs: frame encode/verify (CRC32C).
//! - reader.rs: forward-only reader with torn-tail tolerance.

pub mod reader;
pub mod record;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::consts::{
    PAGE_FILE_EXT, PAGE_FILE_PREFIX, PAGE_HDR_OFF_SEQ, PAGE_HDR_OFF_STORE_ID, PAGE_HDR_SIZE,
    PAGE_MAGIC, REC_HDR_SIZE, REC_MESSAGE, REC_SEAL, REC_TX_COMMIT, SEAL_RECORD_SIZE,
};
use crate::error::{PagingError, PagingResult};
use crate::message::PagedMessage;
use crate::util::fsync_dir;

pub use reader::{PageEntry, PageFileHeader, PageReader};
use reader::{read_frame, read_page_header, Frame, ReaderGuard};
use record::encode_frame;

pub fn page_file_name(seq: u64) -> String {
    format!("{}{:010}.{}", PAGE_FILE_PREFIX, seq, PAGE_FILE_EXT)
}

pub fn parse_page_file_name(name: &str) -> Option<u64> {
    name.strip_prefix(PAGE_FILE_PREFIX)?
        .strip_suffix(PAGE_FILE_EXT)?
        .strip_suffix('.')?
        .parse::<u64>()
        .ok()
}

/// Size bounds a page enforces on appends.
#[derive(Debug, Clone, Copy)]
pub struct PageLimits {
    /// Page-size bound (total file bytes, SEAL included).
    pub page_size: u64,
    /// Hard cap for a single record, even on an empty page.
    pub max_message_bytes: u64,
}

/// Message record summary produced by a recovery scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannedMessage {
    pub ordinal: u64,
    pub tx_id: u64,
    pub size: u64,
}

/// Everything recovery needs from one page, without holding message bodies.
#[derive(Debug, Clone, Default)]
pub struct PageScan {
    pub messages: Vec<ScannedMessage>,
    pub commits: Vec<u64>,
    pub sealed: bool,
    /// Offset a torn tail was truncated at.
    pub truncated_at: Option<u64>,
    pub max_message_id: u64,
}

#[derive(Debug)]
pub struct Page {
    seq: u64,
    store_id: u64,
    path: PathBuf,
    // Append handle; None once sealed.
    file: Option<File>,
    size: u64,
    limits: PageLimits,
    messages: u64,
    sealed: bool,
    readers: Arc<AtomicUsize>,
}

impl Page {
    /// Create an empty current page. Fails if the file already exists.
    pub fn create(dir: &Path, store_id: u64, seq: u64, limits: PageLimits) -> PagingResult<Self> {
        let path = dir.join(page_file_name(seq));
        let mut f = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let mut hdr = [0u8; PAGE_HDR_SIZE];
        hdr[..8].copy_from_slice(PAGE_MAGIC);
        LittleEndian::write_u64(&mut hdr[PAGE_HDR_OFF_STORE_ID..PAGE_HDR_OFF_STORE_ID + 8], store_id);
        LittleEndian::write_u64(&mut hdr[PAGE_HDR_OFF_SEQ..PAGE_HDR_OFF_SEQ + 8], seq);
        f.write_all(&hdr)?;
        f.sync_all()?;
        fsync_dir(&path)?;
        debug!("page {}: created {}", seq, path.display());

        Ok(Self {
            seq,
            store_id,
            path,
            file: Some(f),
            size: PAGE_HDR_SIZE as u64,
            limits,
            messages: 0,
            sealed: false,
            readers: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Open an existing page after a restart: verify every record, truncate a
    /// torn tail of an unsealed page and reopen it for appends.
    ///
    /// Interior corruption is returned as `CorruptPage`.
    pub fn recover(
        path: &Path,
        expected_store_id: Option<u64>,
        limits: PageLimits,
    ) -> PagingResult<(Self, PageScan)> {
        let mut f = OpenOptions::new().read(true).write(true).open(path)?;
        let hdr = read_page_header(&mut f, path)?;
        if let Some(expected) = expected_store_id {
            if hdr.store_id != expected {
                return Err(PagingError::ForeignPage {
                    path: path.to_path_buf(),
                    expected,
                    found: hdr.store_id,
                });
            }
        }

        let mut scan = PageScan::default();
        let mut pos = PAGE_HDR_SIZE as u64;
        let file_len = f.metadata()?.len();
        loop {
            match read_frame(&mut f, path, pos, file_len)? {
                Frame::End => break,
                Frame::Torn => {
                    scan.truncated_at = Some(pos);
                    break;
                }
                Frame::Complete {
                    header,
                    payload,
                    next,
                } => {
                    if scan.sealed {
                        return Err(PagingError::corrupt(path, pos, "data after SEAL record"));
                    }
                    match header.rec_type {
                        REC_MESSAGE => {
                            let msg = PagedMessage::decode(&payload).map_err(|e| {
                                PagingError::corrupt(path, pos, format!("decode message: {}", e))
                            })?;
                            scan.max_message_id = scan.max_message_id.max(msg.id);
                            scan.messages.push(ScannedMessage {
                                ordinal: scan.messages.len() as u64,
                                tx_id: header.tx_id,
                                size: header.total_len(),
                            });
                        }
                        REC_TX_COMMIT => scan.commits.push(header.tx_id),
                        REC_SEAL => scan.sealed = true,
                        _ => {}
                    }
                    pos = next;
                }
            }
        }

        if let Some(at) = scan.truncated_at {
            if scan.sealed {
                return Err(PagingError::corrupt(path, at, "torn data after SEAL record"));
            }
            warn!(
                "page {}: torn tail at offset {} ({} byte(s)), truncating",
                hdr.seq,
                at,
                file_len - at
            );
            f.set_len(at)?;
            f.sync_all()?;
        }

        let size = pos;
        let file = if scan.sealed {
            None
        } else {
            f.seek(SeekFrom::End(0))?;
            Some(f)
        };

        let page = Self {
            seq: hdr.seq,
            store_id: hdr.store_id,
            path: path.to_path_buf(),
            file,
            size,
            limits,
            messages: scan.messages.len() as u64,
            sealed: scan.sealed,
            readers: Arc::new(AtomicUsize::new(0)),
        };
        Ok((page, scan))
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn store_id(&self) -> u64 {
        self.store_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes on disk, header included.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of MESSAGE records.
    pub fn message_count(&self) -> u64 {
        self.messages
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn is_empty(&self) -> bool {
        self.messages == 0
    }

    pub fn readers(&self) -> usize {
        self.readers.load(Ordering::Acquire)
    }

    /// Append a message; returns its ordinal within the page.
    ///
    /// `CapacityExceeded` when the page already holds a message and the record
    /// (plus room for SEAL) would cross the page-size bound. An empty page takes
    /// any record up to `max_message_bytes`.
    pub fn append(&mut self, message: &PagedMessage, tx_id: u64, sync: bool) -> PagingResult<u64> {
        let payload = message.encode()?;
        let record_len = (REC_HDR_SIZE + payload.len()) as u64;
        if record_len > self.limits.max_message_bytes {
            return Err(PagingError::MessageTooLarge {
                size: record_len,
                max: self.limits.max_message_bytes,
            });
        }
        self.check_capacity(record_len)?;
        self.write_frame(REC_MESSAGE, tx_id, &payload, sync)?;
        let ordinal = self.messages;
        self.messages += 1;
        Ok(ordinal)
    }

    /// Append a transaction commit marker. Same capacity rule as messages.
    pub fn append_commit(&mut self, tx_id: u64, sync: bool) -> PagingResult<()> {
        self.check_capacity(REC_HDR_SIZE as u64)?;
        self.write_frame(REC_TX_COMMIT, tx_id, &[], sync)
    }

    fn check_capacity(&self, record_len: u64) -> PagingResult<()> {
        if self.sealed {
            return Err(PagingError::PageSealed { seq: self.seq });
        }
        if self.messages > 0 && self.size + record_len + SEAL_RECORD_SIZE > self.limits.page_size {
            return Err(PagingError::CapacityExceeded {
                seq: self.seq,
                size: self.size,
                needed: record_len,
                bound: self.limits.page_size,
            });
        }
        Ok(())
    }

    fn write_frame(&mut self, rec_type: u8, tx_id: u64, payload: &[u8], sync: bool) -> PagingResult<()> {
        let seq = self.seq;
        let f = self
            .file
            .as_mut()
            .ok_or(PagingError::PageSealed { seq })?;
        let frame = encode_frame(rec_type, tx_id, payload)?;
        let written = f.write_all(&frame).and_then(|()| if sync { f.sync_data() } else { Ok(()) });
        if let Err(e) = written {
            if let Err(undo) = self.discard_partial() {
                warn!(
                    "page {}: cannot cut back to {} bytes after failed write: {}",
                    seq, self.size, undo
                );
            }
            return Err(e.into());
        }
        self.size += frame.len() as u64;
        Ok(())
    }

    /// Drop whatever a failed write left past the last complete record and put
    /// the append position back there.
    fn discard_partial(&mut self) -> std::io::Result<()> {
        if let Some(f) = self.file.as_mut() {
            f.set_len(self.size)?;
            f.seek(SeekFrom::Start(self.size))?;
        }
        Ok(())
    }

    /// Close the page to further writes. Idempotent.
    pub fn seal(&mut self) -> PagingResult<()> {
        if self.sealed {
            return Ok(());
        }
        self.write_frame(REC_SEAL, 0, &[], false)?;
        if let Some(f) = self.file.take() {
            f.sync_all()?;
        }
        self.sealed = true;
        debug!(
            "page {}: sealed ({} message(s), {} bytes)",
            self.seq, self.messages, self.size
        );
        Ok(())
    }

    /// Flush appended bytes (shutdown path for the current page).
    pub fn sync(&mut self) -> PagingResult<()> {
        if let Some(f) = self.file.as_mut() {
            f.flush()?;
            f.sync_all()?;
        }
        Ok(())
    }

    /// Forward-only reader from the first record. Counts as an open reader
    /// until dropped.
    pub fn open_cursor(&self) -> PagingResult<PageReader> {
        PageReader::open(&self.path, Some(ReaderGuard::acquire(&self.readers)))
    }

    /// Remove the page file. The page must be sealed and have no open readers.
    pub fn delete(&self) -> PagingResult<()> {
        if !self.sealed {
            return Err(PagingError::PageNotSealed { seq: self.seq });
        }
        let readers = self.readers();
        if readers > 0 {
            return Err(PagingError::PageInUse {
                seq: self.seq,
                readers,
            });
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if let Err(e) = fsync_dir(&self.path) {
            warn!("page {}: fsync of store dir after delete failed: {}", self.seq, e);
        }
        debug!("page {}: deleted {}", self.seq, self.path.display());
        Ok(())
    }
}

/// List page sequence numbers present in a store directory, ascending.
pub fn list_pages(dir: &Path) -> std::io::Result<Vec<(u64, PathBuf)>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(seq) = name.to_str().and_then(parse_page_file_name) {
            out.push((seq, entry.path()));
        }
    }
    out.sort_by_key(|(seq, _)| *seq);
    Ok(out)
}

/// Read just the header of a page file.
pub fn read_header(path: &Path) -> PagingResult<PageFileHeader> {
    let mut f = File::open(path)?;
    read_page_header(&mut f, path)
}
