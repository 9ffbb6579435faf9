//! # flashenv Core
//!
//! Power-loss safe key-value environment for NOR flash partitions.
//!
//! The environment is an append-only log of records spread over two sectors
//! of one partition. Updates append a new record and mark the old one
//! obsolete; when the active sector fills up, the live records are rotated
//! into the other sector.
//!
//! ## Architecture
//!
//! - [`EnvStore`] - The public API: `init`, `get`, `set`, `delete`, `flush`
//! - `log` - Record codec, sector headers, scan, append and compaction
//! - [`version`] - The reserved version record and the init policy
//! - [`SharedEnvStore`] - Caller-side lock for multi-threaded use
//!
//! ## Power loss
//!
//! Every state change on flash is a narrowing write, so an interrupted write
//! leaves either the old state or the new one. A record becomes visible only
//! once its status reads WRITTEN, and a compaction takes effect only once the
//! old sector is marked RETIRED. Init repairs whatever an interruption left
//! behind; it never fails because of flash contents.
//!
//! ## Example
//!
//! ```rust
//! use flashenv_core::{EnvConfig, EnvStore};
//! use flashenv_fal::{Fal, FlashGeometry, InMemoryFlash, PartitionEntry, PartitionTable};
//!
//! let geometry = FlashGeometry::new(8192, 4096, 64).unwrap();
//! let table = PartitionTable::new(geometry, vec![PartitionEntry::new("env", 0, 8192)]).unwrap();
//! let fal = Fal::new(Box::new(InMemoryFlash::new(geometry)), table).unwrap();
//!
//! let mut env = EnvStore::open(&fal, EnvConfig::new().default_env("boot_times", "0")).unwrap();
//! env.init().unwrap();
//!
//! let boots: u32 = env.get_string("boot_times").unwrap().parse().unwrap();
//! env.set("boot_times", (boots + 1).to_string()).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod log;
mod shared;
mod stats;
mod store;
pub mod version;

pub use config::{DefaultEnv, EnvConfig, DEFAULT_PARTITION, KEY_LEN_LIMIT};
pub use error::{EnvError, EnvResult, RecordError, RecordResult};
pub use log::{
    CompactionReport, EngineState, IndexEntry, MountReport, Record, RecordCodec, RecordHeader,
    RecordInfo, RecordStatus, ScanStop, Sector, SectorHeader, SectorReport, SectorState,
    SectorTag, SetOutcome, FORMAT_VERSION, RECORD_HEADER_SIZE, RECORD_MAGIC, SECTOR_MAGIC,
};
pub use shared::SharedEnvStore;
pub use stats::{EnvStats, EnvUsage};
pub use store::EnvStore;
pub use version::{InitReport, VersionAction, VERSION_KEY};
