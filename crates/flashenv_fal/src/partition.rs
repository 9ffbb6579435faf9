//! Partition-level flash access.

use crate::device::{is_aligned, FlashDevice, FlashGeometry, ERASED_BYTE};
use crate::error::{FalError, FalResult};
use crate::table::{PartitionEntry, PartitionTable};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// A flash device shared between partitions.
pub type SharedDevice = Arc<Mutex<Box<dyn FlashDevice>>>;

/// The flash abstraction layer.
///
/// Owns the device and the partition table and hands out [`Partition`]
/// handles by name.
///
/// # Example
///
/// ```rust
/// use flashenv_fal::{Fal, FlashGeometry, InMemoryFlash, PartitionEntry, PartitionTable};
///
/// let geometry = FlashGeometry::new(16 * 1024, 4096, 64).unwrap();
/// let table = PartitionTable::new(geometry, vec![PartitionEntry::new("env", 8192, 8192)]).unwrap();
/// let fal = Fal::new(Box::new(InMemoryFlash::new(geometry)), table).unwrap();
///
/// let env = fal.partition("env").unwrap();
/// assert_eq!(env.len(), 8192);
/// ```
pub struct Fal {
    device: SharedDevice,
    table: PartitionTable,
}

impl Fal {
    /// Creates the abstraction layer over `device`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTable` if the table was built for a different
    /// geometry than the device reports.
    pub fn new(device: Box<dyn FlashDevice>, table: PartitionTable) -> FalResult<Self> {
        if device.geometry() != table.geometry() {
            return Err(FalError::invalid_table(format!(
                "table geometry {:?} does not match device geometry {:?}",
                table.geometry(),
                device.geometry()
            )));
        }
        Ok(Self {
            device: Arc::new(Mutex::new(device)),
            table,
        })
    }

    /// Returns the partition table.
    #[must_use]
    pub fn table(&self) -> &PartitionTable {
        &self.table
    }

    /// Returns a handle to the named partition.
    ///
    /// # Errors
    ///
    /// Returns `PartitionNotFound` if the table has no such partition.
    pub fn partition(&self, name: &str) -> FalResult<Partition> {
        let entry = self.table.lookup(name)?.clone();
        debug!(
            partition = %entry.name,
            offset = entry.offset,
            len = entry.len,
            "opened partition"
        );
        Ok(Partition {
            device: Arc::clone(&self.device),
            geometry: self.table.geometry(),
            entry,
        })
    }
}

impl std::fmt::Debug for Fal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fal")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

/// A bounded view of one partition.
///
/// All offsets are relative to the start of the partition. Writes must be
/// aligned to the write granularity and erases to the erase granularity;
/// nothing is silently padded or truncated.
#[derive(Clone)]
pub struct Partition {
    device: SharedDevice,
    geometry: FlashGeometry,
    entry: PartitionEntry,
}

impl Partition {
    /// Creates a partition handle directly over a shared device.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTable` if the entry does not fit the device or is not
    /// erase-aligned.
    pub fn new(device: SharedDevice, entry: PartitionEntry) -> FalResult<Self> {
        let geometry = device.lock().geometry();
        PartitionTable::new(geometry, vec![entry.clone()])?;
        Ok(Self {
            device,
            geometry,
            entry,
        })
    }

    /// Partition name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    /// Partition length in bytes.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.entry.len
    }

    /// Returns true if the partition has no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entry.len == 0
    }

    /// Absolute device offset of the partition.
    #[must_use]
    pub fn base(&self) -> u32 {
        self.entry.offset
    }

    /// Erase granularity in bytes.
    #[must_use]
    pub fn erase_size(&self) -> u32 {
        self.geometry.erase_size
    }

    /// Write granularity in bytes.
    #[must_use]
    pub fn write_size(&self) -> u32 {
        self.geometry.write_size
    }

    fn check_bounds(&self, offset: u32, len: usize) -> FalResult<()> {
        let end = u64::from(offset) + len as u64;
        if end > u64::from(self.entry.len) {
            return Err(FalError::OutOfBounds {
                offset,
                len,
                size: self.entry.len,
            });
        }
        Ok(())
    }

    /// Reads into `buf` starting at `offset`. No alignment is required.
    ///
    /// # Errors
    ///
    /// Returns `OutOfBounds` if the range leaves the partition.
    pub fn read(&self, offset: u32, buf: &mut [u8]) -> FalResult<()> {
        self.check_bounds(offset, buf.len())?;
        self.device.lock().read(self.entry.offset + offset, buf)
    }

    /// Reads `len` bytes starting at `offset` into a new buffer.
    ///
    /// # Errors
    ///
    /// Returns `OutOfBounds` if the range leaves the partition.
    pub fn read_vec(&self, offset: u32, len: usize) -> FalResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read(offset, &mut buf)?;
        Ok(buf)
    }

    /// Programs `data` at `offset`.
    ///
    /// Both `offset` and `data.len()` must be multiples of the write size;
    /// callers pad their data.
    ///
    /// # Errors
    ///
    /// Returns `OutOfBounds` if the range leaves the partition and
    /// `Misaligned` if offset or length is not write-aligned.
    pub fn write(&self, offset: u32, data: &[u8]) -> FalResult<()> {
        self.check_bounds(offset, data.len())?;
        let write_size = u64::from(self.geometry.write_size);
        if !is_aligned(u64::from(offset), write_size) || !is_aligned(data.len() as u64, write_size)
        {
            return Err(FalError::Misaligned {
                offset,
                len: data.len(),
                granularity: self.geometry.write_size,
            });
        }
        self.device.lock().program(self.entry.offset + offset, data)
    }

    /// Erases `len` bytes at `offset`, leaving them all `0xFF`.
    ///
    /// # Errors
    ///
    /// Returns `OutOfBounds` if the range leaves the partition and
    /// `Misaligned` if offset or length is not erase-aligned.
    pub fn erase(&self, offset: u32, len: u32) -> FalResult<()> {
        self.check_bounds(offset, len as usize)?;
        let erase_size = u64::from(self.geometry.erase_size);
        if !is_aligned(u64::from(offset), erase_size) || !is_aligned(u64::from(len), erase_size) {
            return Err(FalError::Misaligned {
                offset,
                len: len as usize,
                granularity: self.geometry.erase_size,
            });
        }
        self.device.lock().erase(self.entry.offset + offset, len)
    }

    /// Erases the single erase block starting at `sector_offset`.
    ///
    /// # Errors
    ///
    /// See [`Partition::erase`].
    pub fn erase_sector(&self, sector_offset: u32) -> FalResult<()> {
        self.erase(sector_offset, self.geometry.erase_size)
    }

    /// Returns true if every byte of the range reads as erased.
    ///
    /// # Errors
    ///
    /// Returns `OutOfBounds` if the range leaves the partition.
    pub fn is_erased(&self, offset: u32, len: u32) -> FalResult<bool> {
        self.check_bounds(offset, len as usize)?;
        const CHUNK: u32 = 256;
        let mut buf = [0u8; CHUNK as usize];
        let mut pos = 0;
        while pos < len {
            let n = CHUNK.min(len - pos);
            let chunk = &mut buf[..n as usize];
            self.read(offset + pos, chunk)?;
            if chunk.iter().any(|&b| b != ERASED_BYTE) {
                return Ok(false);
            }
            pos += n;
        }
        Ok(true)
    }

    /// Waits until previous writes are durable.
    ///
    /// # Errors
    ///
    /// Returns the device error if syncing fails.
    pub fn sync(&self) -> FalResult<()> {
        self.device.lock().sync()
    }
}

impl std::fmt::Debug for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition")
            .field("entry", &self.entry)
            .field("geometry", &self.geometry)
            .finish_non_exhaustive()
    }
}
