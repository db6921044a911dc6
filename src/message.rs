//! Addresses and the paged message record.
//!
//! Payload layout (LE), stored as the body of a MESSAGE record:
//! [id u64][flags u8][body_len u32][body][prop_count u16]
//!   prop: [key_len u16][key utf8][tag u8][value]
//!   tags: 1=Bool(u8) 2=Int(i32) 3=Long(i64) 4=Str(u32 len + utf8) 5=Bytes(u32 len + raw)

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Cursor, Read};

use crate::consts::{PROP_SCHEDULED_DELIVERY, REC_HDR_SIZE};

const FLAG_DURABLE: u8 = 0x1;

const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_LONG: u8 = 3;
const TAG_STR: u8 = 4;
const TAG_BYTES: u8 = 5;

/// Named routing point. Owns exactly one address page store.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(String);

impl Address {
    pub fn new(name: impl Into<String>) -> Self {
        Address(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address(s.to_string())
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Address(s)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i32),
    Long(i64),
    Str(String),
    Bytes(Vec<u8>),
}

impl PropertyValue {
    fn encoded_len(&self) -> usize {
        1 + match self {
            PropertyValue::Bool(_) => 1,
            PropertyValue::Int(_) => 4,
            PropertyValue::Long(_) => 8,
            PropertyValue::Str(s) => 4 + s.len(),
            PropertyValue::Bytes(b) => 4 + b.len(),
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            PropertyValue::Long(v) => Some(*v),
            PropertyValue::Int(v) => Some(*v as i64),
            _ => None,
        }
    }
}

/// Fully serialized, immutable message record.
#[derive(Clone, Debug, PartialEq)]
pub struct PagedMessage {
    /// Assigned by the paging manager when left at 0.
    pub id: u64,
    pub durable: bool,
    pub properties: BTreeMap<String, PropertyValue>,
    pub body: Vec<u8>,
}

impl PagedMessage {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            id: 0,
            durable: true,
            properties: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn with_durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_scheduled_delivery(self, epoch_ms: u64) -> Self {
        self.with_property(PROP_SCHEDULED_DELIVERY, PropertyValue::Long(epoch_ms as i64))
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    /// Scheduled delivery time in epoch millis, if any.
    pub fn scheduled_delivery(&self) -> Option<u64> {
        self.properties
            .get(PROP_SCHEDULED_DELIVERY)
            .and_then(PropertyValue::as_long)
            .map(|v| v.max(0) as u64)
    }

    pub fn encoded_len(&self) -> usize {
        let props: usize = self
            .properties
            .iter()
            .map(|(k, v)| 2 + k.len() + v.encoded_len())
            .sum();
        8 + 1 + 4 + self.body.len() + 2 + props
    }

    /// Bytes this message accounts for: its full record length on a page.
    pub fn memory_size(&self) -> u64 {
        (REC_HDR_SIZE + self.encoded_len()) as u64
    }

    pub fn encode(&self) -> io::Result<Vec<u8>> {
        if self.body.len() > u32::MAX as usize || self.properties.len() > u16::MAX as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "message body or property map too large",
            ));
        }
        let mut out = Vec::with_capacity(self.encoded_len());
        out.write_u64::<LittleEndian>(self.id)?;
        out.write_u8(if self.durable { FLAG_DURABLE } else { 0 })?;
        out.write_u32::<LittleEndian>(self.body.len() as u32)?;
        out.extend_from_slice(&self.body);
        out.write_u16::<LittleEndian>(self.properties.len() as u16)?;
        for (key, value) in &self.properties {
            if key.len() > u16::MAX as usize {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("property key too long: {} bytes", key.len()),
                ));
            }
            out.write_u16::<LittleEndian>(key.len() as u16)?;
            out.extend_from_slice(key.as_bytes());
            match value {
                PropertyValue::Bool(b) => {
                    out.write_u8(TAG_BOOL)?;
                    out.write_u8(*b as u8)?;
                }
                PropertyValue::Int(v) => {
                    out.write_u8(TAG_INT)?;
                    out.write_i32::<LittleEndian>(*v)?;
                }
                PropertyValue::Long(v) => {
                    out.write_u8(TAG_LONG)?;
                    out.write_i64::<LittleEndian>(*v)?;
                }
                PropertyValue::Str(s) => {
                    out.write_u8(TAG_STR)?;
                    out.write_u32::<LittleEndian>(s.len() as u32)?;
                    out.extend_from_slice(s.as_bytes());
                }
                PropertyValue::Bytes(b) => {
                    out.write_u8(TAG_BYTES)?;
                    out.write_u32::<LittleEndian>(b.len() as u32)?;
                    out.extend_from_slice(b);
                }
            }
        }
        Ok(out)
    }

    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        let mut cur = Cursor::new(buf);
        let id = cur.read_u64::<LittleEndian>()?;
        let flags = cur.read_u8()?;
        let body = read_blob(&mut cur, buf.len())?;
        let count = cur.read_u16::<LittleEndian>()?;
        let mut properties = BTreeMap::new();
        for _ in 0..count {
            let key_len = cur.read_u16::<LittleEndian>()? as usize;
            let key = read_utf8(&mut cur, key_len)?;
            let value = match cur.read_u8()? {
                TAG_BOOL => PropertyValue::Bool(cur.read_u8()? != 0),
                TAG_INT => PropertyValue::Int(cur.read_i32::<LittleEndian>()?),
                TAG_LONG => PropertyValue::Long(cur.read_i64::<LittleEndian>()?),
                TAG_STR => {
                    let len = cur.read_u32::<LittleEndian>()? as usize;
                    PropertyValue::Str(read_utf8(&mut cur, len)?)
                }
                TAG_BYTES => PropertyValue::Bytes(read_blob(&mut cur, buf.len())?),
                other => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("unknown property tag {}", other),
                    ))
                }
            };
            properties.insert(key, value);
        }
        if cur.position() as usize != buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{} trailing byte(s) after message",
                    buf.len() - cur.position() as usize
                ),
            ));
        }
        Ok(Self {
            id,
            durable: flags & FLAG_DURABLE != 0,
            properties,
            body,
        })
    }
}

fn read_blob(cur: &mut Cursor<&[u8]>, total: usize) -> io::Result<Vec<u8>> {
    let len = cur.read_u32::<LittleEndian>()? as usize;
    if cur.position() as usize + len > total {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("blob of {} bytes runs past end of record", len),
        ));
    }
    let mut out = vec![0u8; len];
    cur.read_exact(&mut out)?;
    Ok(out)
}

fn read_utf8(cur: &mut Cursor<&[u8]>, len: usize) -> io::Result<String> {
    let mut raw = vec![0u8; len];
    cur.read_exact(&mut raw)?;
    String::from_utf8(raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_len_matches_encoding() {
        let m = PagedMessage::new(vec![7u8; 100])
            .with_property("id", PropertyValue::Int(42))
            .with_property("name", PropertyValue::Str("alpha".into()))
            .with_property("blob", PropertyValue::Bytes(vec![1, 2, 3]))
            .with_scheduled_delivery(1_700_000_000_000);
        let enc = m.encode().expect("encode");
        assert_eq!(enc.len(), m.encoded_len());
        assert_eq!(m.memory_size(), (REC_HDR_SIZE + enc.len()) as u64);

        let back = PagedMessage::decode(&enc).expect("decode");
        assert_eq!(back, m);
        assert_eq!(back.scheduled_delivery(), Some(1_700_000_000_000));
        assert_eq!(back.property("id").and_then(PropertyValue::as_int), Some(42));
    }

    #[test]
    fn decode_rejects_truncated_and_trailing() {
        let m = PagedMessage::new(b"hello".to_vec()).with_property("k", PropertyValue::Bool(true));
        let enc = m.encode().expect("encode");
        assert!(PagedMessage::decode(&enc[..enc.len() - 1]).is_err());

        let mut longer = enc.clone();
        longer.push(0);
        assert!(PagedMessage::decode(&longer).is_err());
    }

    #[test]
    fn one_kib_body_accounts_for_more_than_one_kib() {
        // 9 such messages fit under 10 KiB, 10 do not.
        let m = PagedMessage::new(vec![0u8; 1024]);
        assert!(m.memory_size() > 1024);
        assert!(m.memory_size() * 9 <= 10 * 1024);
        assert!(m.memory_size() * 10 > 10 * 1024);
    }
}
