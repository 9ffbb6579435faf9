//! Environment record codec.

use crate::error::{RecordError, RecordResult};
use flashenv_fal::{align_up, ERASED_BYTE};

/// Magic bytes opening every record header.
pub const RECORD_MAGIC: [u8; 4] = [0x56, 0x4E, 0x45, 0x52];

/// Size of the header that follows the status slot.
/// magic (4) + key_len (1) + reserved (3) + value_len (4) + crc32 (4) = 16
pub const RECORD_HEADER_SIZE: usize = 16;

/// Lifecycle of a record on flash.
///
/// Each state is a bit-subset of the previous one, so every transition is a
/// narrowing write on the status byte:
/// `erased 0xFF -> PreWrite 0xFE -> Written 0xFC -> Obsolete 0xF8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordStatus {
    /// Body programmed, commit flag not yet written. Never visible.
    PreWrite = 0xFE,
    /// Committed and visible to the index.
    Written = 0xFC,
    /// Superseded or deleted.
    Obsolete = 0xF8,
}

impl RecordStatus {
    /// Parses a status byte.
    #[must_use]
    pub const fn from_byte(b: u8) -> Option<Self> {
        match b {
            0xFE => Some(Self::PreWrite),
            0xFC => Some(Self::Written),
            0xF8 => Some(Self::Obsolete),
            _ => None,
        }
    }

    /// Returns the raw status byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Status at the time the record was read.
    pub status: RecordStatus,
    /// Key.
    pub key: String,
    /// Value bytes.
    pub value: Vec<u8>,
}

/// The fixed header of a record, decoded without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Status byte.
    pub status: RecordStatus,
    /// Key length in bytes.
    pub key_len: usize,
    /// Value length in bytes.
    pub value_len: usize,
    /// Stored checksum.
    pub crc: u32,
}

/// Encodes and decodes records for a given write granularity.
///
/// ## Record Format
///
/// ```text
/// | status slot (W) | magic (4) | key_len (1) | 0xFF x3 | value_len (4) | crc32 (4) | key | value | 0xFF fill |
/// ```
///
/// The status slot is a whole write unit so the status byte can be
/// rewritten on its own. The checksum covers the two length fields, the key
/// and the value; never the status byte, which is written in a second pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordCodec {
    write_size: usize,
    max_key_len: usize,
}

impl RecordCodec {
    /// Creates a codec for `write_size`-byte write units.
    #[must_use]
    pub fn new(write_size: u32, max_key_len: usize) -> Self {
        Self {
            write_size: write_size.max(1) as usize,
            max_key_len,
        }
    }

    /// Write granularity the codec pads to.
    #[must_use]
    pub fn write_size(&self) -> usize {
        self.write_size
    }

    /// Maximum key length.
    #[must_use]
    pub fn max_key_len(&self) -> usize {
        self.max_key_len
    }

    /// Bytes that must be read to decode a header.
    #[must_use]
    pub fn header_span(&self) -> usize {
        self.write_size + RECORD_HEADER_SIZE
    }

    /// Total on-flash size of a record with the given lengths.
    #[must_use]
    pub fn encoded_len(&self, key_len: usize, value_len: usize) -> usize {
        self.write_size + align_up(RECORD_HEADER_SIZE + key_len + value_len, self.write_size)
    }

    /// Smallest possible record (one-byte key, empty value).
    #[must_use]
    pub fn min_record_len(&self) -> usize {
        self.encoded_len(1, 0)
    }

    /// Checks that `key` can be stored.
    pub fn check_key(&self, key: &str) -> RecordResult<()> {
        if key.is_empty() {
            return Err(RecordError::EmptyKey);
        }
        if key.len() > self.max_key_len {
            return Err(RecordError::KeyTooLong {
                len: key.len(),
                max: self.max_key_len,
            });
        }
        Ok(())
    }

    /// Builds a status slot: one write unit with `status` in byte 0.
    #[must_use]
    pub fn status_slot(&self, status: RecordStatus) -> Vec<u8> {
        let mut slot = vec![ERASED_BYTE; self.write_size];
        slot[0] = status.as_byte();
        slot
    }

    /// Encodes a record in the `PreWrite` state, padded to the write size.
    pub fn encode(&self, key: &str, value: &[u8]) -> RecordResult<Vec<u8>> {
        self.check_key(key)?;

        let total = self.encoded_len(key.len(), value.len());
        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&self.status_slot(RecordStatus::PreWrite));

        buf.extend_from_slice(&RECORD_MAGIC);
        buf.push(key.len() as u8);
        buf.extend_from_slice(&[ERASED_BYTE; 3]);
        buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
        buf.extend_from_slice(&checksum(key.as_bytes(), value).to_le_bytes());
        buf.extend_from_slice(key.as_bytes());
        buf.extend_from_slice(value);

        buf.resize(total, ERASED_BYTE);
        Ok(buf)
    }

    /// Decodes the header at the start of `data`.
    ///
    /// `data` must hold at least [`RecordCodec::header_span`] bytes.
    pub fn decode_header(&self, data: &[u8]) -> RecordResult<RecordHeader> {
        let span = self.header_span();
        if data.len() < span {
            return Err(RecordError::Truncated {
                needed: span,
                available: data.len(),
            });
        }

        let status_byte = data[0];
        let header = &data[self.write_size..span];

        let magic = [header[0], header[1], header[2], header[3]];
        if magic != RECORD_MAGIC {
            return Err(RecordError::BadMagic { found: magic });
        }

        let status = RecordStatus::from_byte(status_byte)
            .ok_or(RecordError::InvalidStatus(status_byte))?;
        let key_len = header[4] as usize;
        let value_len = u32::from_le_bytes([header[8], header[9], header[10], header[11]]) as usize;
        let crc = u32::from_le_bytes([header[12], header[13], header[14], header[15]]);

        if key_len == 0 {
            return Err(RecordError::EmptyKey);
        }

        Ok(RecordHeader {
            status,
            key_len,
            value_len,
            crc,
        })
    }

    /// Decodes a complete record from the start of `data`.
    pub fn decode(&self, data: &[u8]) -> RecordResult<Record> {
        let header = self.decode_header(data)?;
        let body_start = self.header_span();
        let body_end = body_start + header.key_len + header.value_len;
        if data.len() < body_end {
            return Err(RecordError::Truncated {
                needed: body_end,
                available: data.len(),
            });
        }

        let key = &data[body_start..body_start + header.key_len];
        let value = &data[body_start + header.key_len..body_end];

        let actual = checksum(key, value);
        if actual != header.crc {
            return Err(RecordError::ChecksumMismatch {
                expected: header.crc,
                actual,
            });
        }

        let key = String::from_utf8(key.to_vec()).map_err(|_| RecordError::KeyNotUtf8)?;

        Ok(Record {
            status: header.status,
            key,
            value: value.to_vec(),
        })
    }
}

/// CRC-32 over the length fields, the key and the value.
fn checksum(key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[key.len() as u8]);
    hasher.update(&(value.len() as u32).to_le_bytes());
    hasher.update(key);
    hasher.update(value);
    hasher.finalize()
}
