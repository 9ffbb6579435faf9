//! Environment log.
//!
//! The log lives in two equally sized sectors of one partition. Exactly one
//! sector is active and receives appends; the other is the standby target of
//! the next compaction.
//!
//! ## Sector layout
//!
//! ```text
//! | header | record | record | ... | 0xFF ... |
//! ```
//!
//! ## Invariants
//!
//! - A record is visible only once its status slot reads WRITTEN
//! - Records are never rewritten except by narrowing their status
//! - Later records shadow earlier records with the same key
//! - Only the sector marked ACTIVE is authoritative; the standby sector is
//!   provisional until compaction retires the old one

mod compaction;
mod engine;
mod record;
mod scan;
mod sector;

pub use compaction::CompactionReport;
pub(crate) use engine::LogEngine;
pub use engine::{EngineState, IndexEntry, MountReport, SetOutcome};
pub use record::{Record, RecordCodec, RecordHeader, RecordStatus, RECORD_HEADER_SIZE, RECORD_MAGIC};
pub use scan::{RecordInfo, ScanStop, SectorReport};
pub use sector::{Sector, SectorHeader, SectorState, SectorTag, FORMAT_VERSION, SECTOR_MAGIC};
