//! # flashenv FAL
//!
//! Flash abstraction layer for flashenv.
//!
//! This crate is the lowest layer of the environment store. It knows about
//! flash physics (erase-before-write, write and erase granularity) and
//! partitions, but nothing about environment records.
//!
//! ## Design Principles
//!
//! - Devices are raw NOR flash: narrowing `program`, block `erase`, `read`
//! - The partition table is an explicit value, validated once, never global
//! - Partition handles bound every access and reject misaligned writes
//!   instead of padding or truncating
//!
//! ## Available Devices
//!
//! - [`InMemoryFlash`] - For testing; emulates narrowing writes by AND-ing
//! - [`FileFlash`] - Raw flash image file on the host
//!
//! ## Example
//!
//! ```rust
//! use flashenv_fal::{Fal, FlashGeometry, InMemoryFlash, PartitionEntry, PartitionTable};
//!
//! let geometry = FlashGeometry::new(8192, 4096, 64).unwrap();
//! let table = PartitionTable::new(geometry, vec![PartitionEntry::new("env", 0, 8192)]).unwrap();
//! let fal = Fal::new(Box::new(InMemoryFlash::new(geometry)), table).unwrap();
//!
//! let env = fal.partition("env").unwrap();
//! env.write(0, &[0x5A; 64]).unwrap();
//! assert_eq!(env.read_vec(0, 2).unwrap(), vec![0x5A, 0x5A]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod device;
mod error;
mod file;
mod memory;
mod partition;
mod table;

pub use device::{align_up, is_aligned, FlashDevice, FlashGeometry, ERASED_BYTE};
pub use error::{FalError, FalResult};
pub use file::FileFlash;
pub use memory::InMemoryFlash;
pub use partition::{Fal, Partition, SharedDevice};
pub use table::{PartitionEntry, PartitionTable, MAX_PARTITION_NAME};
#[cfg(feature = "table-in-flash")]
pub use table::{ENTRY_SIZE, PARTITION_MAGIC};
