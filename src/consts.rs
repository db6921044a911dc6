//! On-disk format constants (page files, record frames, store directory layout).

// -------- Store directory --------
pub const LOCK_FILE: &str = "LOCK";
pub const STORE_DIR_PREFIX: &str = "addr-";
pub const LWM_FILE: &str = "depage.json";

// -------- Page files --------
pub const PAGE_FILE_PREFIX: &str = "page-";
pub const PAGE_FILE_EXT: &str = "page";

pub const PAGE_MAGIC: &[u8; 8] = b"BPPAGE01";

// Page file header:
// [magic 8][store_id u64][page_seq u64]
pub const PAGE_HDR_SIZE: usize = 24;
pub const PAGE_HDR_OFF_STORE_ID: usize = 8;
pub const PAGE_HDR_OFF_SEQ: usize = 16;

// Record frame layout:
// [type u8]
// [flags u8]
// [hdr_check u16]  -- low 16 bits of CRC32C over type, flags, tx_id, len
// [tx_id u64]       -- 0 for non-transactional records
// [len u32]         -- payload length
// [crc32c u32]      -- CRC over header (except crc field) + payload
//
// hdr_check lets a reader trust `len` before the payload is on disk: a frame
// running past the end of the file is a torn tail only when its header checks.
//
// Total header size = 1 + 1 + 2 + 8 + 4 + 4 = 20 bytes.
pub const REC_HDR_SIZE: usize = 20;

pub const REC_OFF_TYPE: usize = 0;
pub const REC_OFF_FLAGS: usize = 1;
pub const REC_OFF_HDR_CHECK: usize = 2;
pub const REC_OFF_TX_ID: usize = 4;
pub const REC_OFF_LEN: usize = 12;
pub const REC_OFF_CRC32: usize = 16;

// Record types
pub const REC_MESSAGE: u8 = 1;
pub const REC_TX_COMMIT: u8 = 2;
pub const REC_SEAL: u8 = 3;

/// Room a page must always keep free for its closing SEAL record.
pub const SEAL_RECORD_SIZE: u64 = REC_HDR_SIZE as u64;

// -------- Defaults --------
pub const DEFAULT_PAGE_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_GLOBAL_WATERMARK: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_MESSAGE_BYTES: u64 = 64 * 1024 * 1024;

/// Well-known property carrying the scheduled delivery time (epoch millis).
pub const PROP_SCHEDULED_DELIVERY: &str = "_BP_SCHED_DELIVERY";
