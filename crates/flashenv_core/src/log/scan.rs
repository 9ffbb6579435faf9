//! Sector scanning.
//!
//! A scan walks a sector record by record from the end of its header and
//! stops at the first erased run, the first record that does not decode, or
//! the sector end. The same walk rebuilds the index at mount time and
//! produces verification reports.

use flashenv_fal::ERASED_BYTE;

use super::engine::LogEngine;
use super::record::RecordStatus;
use super::sector::SectorState;
use crate::error::{EnvResult, RecordError};

/// One record found by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordInfo {
    /// Partition offset of the record.
    pub offset: u32,
    /// Encoded length, including status slot and fill.
    pub len: u32,
    /// Status at scan time.
    pub status: RecordStatus,
    /// Key.
    pub key: String,
    /// Value length in bytes.
    pub value_len: usize,
}

/// Why a scan stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStop {
    /// The log ends in erased flash at this sector offset.
    Erased {
        /// Sector offset of the first erased byte.
        offset: u32,
    },
    /// The bytes at this sector offset are not a readable record.
    Corrupt {
        /// Sector offset of the unreadable bytes.
        offset: u32,
        /// What was wrong.
        reason: String,
    },
    /// Too few bytes remain for another record header.
    SectorEnd {
        /// Sector offset where the scan stopped.
        offset: u32,
    },
}

impl ScanStop {
    /// Whether the scan ended cleanly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        !matches!(self, Self::Corrupt { .. })
    }
}

impl std::fmt::Display for ScanStop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Erased { offset } => write!(f, "erased from {offset:#x}"),
            Self::Corrupt { offset, reason } => write!(f, "unreadable at {offset:#x}: {reason}"),
            Self::SectorEnd { offset } => write!(f, "sector end at {offset:#x}"),
        }
    }
}

/// The result of walking one sector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorReport {
    /// Sector index, 0 or 1.
    pub index: usize,
    /// Partition offset of the sector.
    pub offset: u32,
    /// Decoded header state, `None` if the sector is not formatted.
    pub state: Option<SectorState>,
    /// Records in offset order, every status included.
    pub records: Vec<RecordInfo>,
    /// Why the walk stopped.
    pub stop: ScanStop,
}

impl SectorReport {
    /// Records that currently read WRITTEN.
    pub fn written(&self) -> impl Iterator<Item = &RecordInfo> {
        self.records
            .iter()
            .filter(|r| r.status == RecordStatus::Written)
    }
}

impl LogEngine {
    /// Walks the records of sector `index`.
    pub(super) fn scan_sector(&self, index: usize) -> EnvResult<SectorReport> {
        let sector = self.sectors[index];
        let span = self.codec.header_span();
        let header = self.partition.read_vec(sector.offset, self.header.size())?;

        let mut records = Vec::new();
        let mut cursor = self.header.size() as u32;

        let stop = loop {
            let remaining = sector.size - cursor;
            if (remaining as usize) < span {
                break ScanStop::SectorEnd { offset: cursor };
            }

            let addr = sector.offset + cursor;
            let head = self.partition.read_vec(addr, span)?;
            if head.iter().all(|&b| b == ERASED_BYTE) {
                if self.partition.is_erased(addr, remaining)? {
                    break ScanStop::Erased { offset: cursor };
                }
                break ScanStop::Corrupt {
                    offset: cursor,
                    reason: "programmed bytes after the end of the log".to_string(),
                };
            }

            let record_header = match self.codec.decode_header(&head) {
                Ok(h) => h,
                Err(err) => {
                    break ScanStop::Corrupt {
                        offset: cursor,
                        reason: err.to_string(),
                    }
                }
            };

            let body = record_header.key_len + record_header.value_len;
            let len = if body > remaining as usize {
                None
            } else {
                Some(self.codec.encoded_len(record_header.key_len, record_header.value_len))
            };
            let len = match len {
                Some(len) if len <= remaining as usize => len,
                _ => {
                    break ScanStop::Corrupt {
                        offset: cursor,
                        reason: RecordError::Truncated {
                            needed: span + body,
                            available: remaining as usize,
                        }
                        .to_string(),
                    }
                }
            };

            let bytes = self.partition.read_vec(addr, len)?;
            match self.codec.decode(&bytes) {
                Ok(record) => records.push(RecordInfo {
                    offset: addr,
                    len: len as u32,
                    status: record.status,
                    key: record.key,
                    value_len: record.value.len(),
                }),
                Err(err) => {
                    break ScanStop::Corrupt {
                        offset: cursor,
                        reason: err.to_string(),
                    }
                }
            }
            cursor += len as u32;
        };

        Ok(SectorReport {
            index,
            offset: sector.offset,
            state: self.header.decode(&header),
            records,
            stop,
        })
    }

    /// Walks both sectors without changing anything.
    pub(crate) fn verify(&self) -> EnvResult<[SectorReport; 2]> {
        Ok([self.scan_sector(0)?, self.scan_sector(1)?])
    }
}
