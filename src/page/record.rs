//! page/record: record frame codec, [header 20B][payload].
//!
//! Two checks per frame: a 16-bit header check over the fixed fields (so `len`
//! can be trusted on its own) and CRC32C over header[0..crc) + payload.

use byteorder::{ByteOrder, LittleEndian};
use std::io::{self, Write};

use crate::consts::{
    REC_HDR_SIZE, REC_MESSAGE, REC_OFF_CRC32, REC_OFF_FLAGS, REC_OFF_HDR_CHECK, REC_OFF_LEN,
    REC_OFF_TX_ID, REC_OFF_TYPE, REC_SEAL, REC_TX_COMMIT,
};

/// Incremental CRC32C over two slices without allocating.
#[inline]
pub fn crc32c_of_parts(head_without_crc: &[u8], payload: &[u8]) -> u32 {
    let c = crc32c::crc32c_append(0, head_without_crc);
    crc32c::crc32c_append(c, payload)
}

/// Header check: low 16 bits of CRC32C over every field but the two checks.
#[inline]
pub fn header_check_of(hdr: &[u8; REC_HDR_SIZE]) -> u16 {
    let c = crc32c::crc32c_append(0, &hdr[..REC_OFF_HDR_CHECK]);
    (crc32c::crc32c_append(c, &hdr[REC_OFF_TX_ID..REC_OFF_CRC32]) & 0xFFFF) as u16
}

/// Decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub rec_type: u8,
    pub flags: u8,
    pub hdr_check: u16,
    pub tx_id: u64,
    pub len: u32,
    pub crc32: u32,
}

impl RecordHeader {
    pub fn read(hdr: &[u8; REC_HDR_SIZE]) -> Self {
        Self {
            rec_type: hdr[REC_OFF_TYPE],
            flags: hdr[REC_OFF_FLAGS],
            hdr_check: LittleEndian::read_u16(&hdr[REC_OFF_HDR_CHECK..REC_OFF_HDR_CHECK + 2]),
            tx_id: LittleEndian::read_u64(&hdr[REC_OFF_TX_ID..REC_OFF_TX_ID + 8]),
            len: LittleEndian::read_u32(&hdr[REC_OFF_LEN..REC_OFF_LEN + 4]),
            crc32: LittleEndian::read_u32(&hdr[REC_OFF_CRC32..REC_OFF_CRC32 + 4]),
        }
    }

    pub fn total_len(&self) -> u64 {
        REC_HDR_SIZE as u64 + self.len as u64
    }

    pub fn is_known_type(&self) -> bool {
        matches!(self.rec_type, REC_MESSAGE | REC_TX_COMMIT | REC_SEAL)
    }

    /// Fixed fields (length included) are intact.
    pub fn header_ok(&self, raw_hdr: &[u8; REC_HDR_SIZE]) -> bool {
        header_check_of(raw_hdr) == self.hdr_check
    }

    pub fn verify(&self, raw_hdr: &[u8; REC_HDR_SIZE], payload: &[u8]) -> bool {
        crc32c_of_parts(&raw_hdr[..REC_OFF_CRC32], payload) == self.crc32
    }
}

/// Build a record header with the CRC filled in.
pub fn build_hdr_with_crc(rec_type: u8, tx_id: u64, payload: &[u8]) -> [u8; REC_HDR_SIZE] {
    let mut hdr = [0u8; REC_HDR_SIZE];
    hdr[REC_OFF_TYPE] = rec_type;
    hdr[REC_OFF_FLAGS] = 0;
    LittleEndian::write_u64(&mut hdr[REC_OFF_TX_ID..REC_OFF_TX_ID + 8], tx_id);
    LittleEndian::write_u32(
        &mut hdr[REC_OFF_LEN..REC_OFF_LEN + 4],
        payload.len() as u32,
    );
    let check = header_check_of(&hdr);
    LittleEndian::write_u16(&mut hdr[REC_OFF_HDR_CHECK..REC_OFF_HDR_CHECK + 2], check);

    let crc = crc32c_of_parts(&hdr[..REC_OFF_CRC32], payload);
    LittleEndian::write_u32(&mut hdr[REC_OFF_CRC32..REC_OFF_CRC32 + 4], crc);
    hdr
}

/// Encode a full frame into one buffer so it reaches the file in a single write.
pub fn encode_frame(rec_type: u8, tx_id: u64, payload: &[u8]) -> io::Result<Vec<u8>> {
    if payload.len() > u32::MAX as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "payload too large for page record: {} bytes (max {})",
                payload.len(),
                u32::MAX
            ),
        ));
    }
    let hdr = build_hdr_with_crc(rec_type, tx_id, payload);
    let mut frame = Vec::with_capacity(REC_HDR_SIZE + payload.len());
    frame.extend_from_slice(&hdr);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Write one frame at the writer's current position.
pub fn write_record<W: Write>(
    writer: &mut W,
    rec_type: u8,
    tx_id: u64,
    payload: &[u8],
) -> io::Result<u64> {
    let frame = encode_frame(rec_type, tx_id, payload)?;
    writer.write_all(&frame)?;
    Ok(frame.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip_and_crc() {
        let payload = b"payload bytes";
        let frame = encode_frame(REC_MESSAGE, 77, payload).expect("frame");
        assert_eq!(frame.len(), REC_HDR_SIZE + payload.len());

        let mut raw = [0u8; REC_HDR_SIZE];
        raw.copy_from_slice(&frame[..REC_HDR_SIZE]);
        let h = RecordHeader::read(&raw);
        assert_eq!(h.rec_type, REC_MESSAGE);
        assert_eq!(h.tx_id, 77);
        assert_eq!(h.len as usize, payload.len());
        assert!(h.header_ok(&raw));
        assert!(h.verify(&raw, payload));
        assert!(!h.verify(&raw, b"payload bytez"));
    }

    #[test]
    fn damaged_length_fails_the_header_check() {
        let frame = encode_frame(REC_MESSAGE, 3, b"abc").expect("frame");
        let mut raw = [0u8; REC_HDR_SIZE];
        raw.copy_from_slice(&frame[..REC_HDR_SIZE]);
        raw[REC_OFF_LEN + 3] = 0x7F;
        let h = RecordHeader::read(&raw);
        assert_eq!(h.total_len(), REC_HDR_SIZE as u64 + 0x7F00_0003);
        assert!(!h.header_ok(&raw));
    }

    #[test]
    fn empty_payload_frames() {
        let frame = encode_frame(REC_SEAL, 0, &[]).expect("frame");
        assert_eq!(frame.len(), REC_HDR_SIZE);
        let mut raw = [0u8; REC_HDR_SIZE];
        raw.copy_from_slice(&frame);
        let h = RecordHeader::read(&raw);
        assert!(h.is_known_type());
        assert!(h.verify(&raw, &[]));
    }
}
