//! Partition table.
//!
//! The table maps partition names to `(offset, len)` ranges of the flash
//! address space. It is an explicit, immutable value: it is validated once
//! against the device geometry and then handed to [`crate::Fal`].
//!
//! With the `table-in-flash` feature the table can also be stored in flash
//! and discovered at startup. Each entry then occupies 64 bytes:
//!
//! ```text
//! | magic (4) | name (24, NUL padded) | device (24, NUL padded) | offset (4) | len (4) | reserved (4) |
//! ```

use crate::device::{is_aligned, FlashGeometry};
use crate::error::{FalError, FalResult};

/// Longest partition name, in bytes, that fits the flash entry format.
pub const MAX_PARTITION_NAME: usize = 23;

/// One row of the partition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    /// Partition name.
    pub name: String,
    /// Byte offset of the partition within the device.
    pub offset: u32,
    /// Length of the partition in bytes.
    pub len: u32,
}

impl PartitionEntry {
    /// Creates a new entry.
    pub fn new(name: impl Into<String>, offset: u32, len: u32) -> Self {
        Self {
            name: name.into(),
            offset,
            len,
        }
    }

    /// Returns the first byte past the end of the partition.
    #[must_use]
    pub fn end(&self) -> u64 {
        u64::from(self.offset) + u64::from(self.len)
    }
}

/// A validated partition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTable {
    geometry: FlashGeometry,
    entries: Vec<PartitionEntry>,
}

impl PartitionTable {
    /// Creates a table and validates it against the device geometry.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTable` if:
    /// - a name is empty, too long or duplicated
    /// - an offset or length is not erase-aligned, or a length is zero
    /// - a partition extends beyond the device
    /// - two partitions overlap
    pub fn new(geometry: FlashGeometry, entries: Vec<PartitionEntry>) -> FalResult<Self> {
        geometry.validate()?;

        let erase_size = u64::from(geometry.erase_size);
        for (i, entry) in entries.iter().enumerate() {
            if entry.name.is_empty() || entry.name.len() > MAX_PARTITION_NAME {
                return Err(FalError::invalid_table(format!(
                    "partition name {:?} must be 1..={} bytes",
                    entry.name, MAX_PARTITION_NAME
                )));
            }
            if entry.name.contains('\0') {
                return Err(FalError::invalid_table(format!(
                    "partition name {:?} contains NUL",
                    entry.name
                )));
            }
            if entries[..i].iter().any(|other| other.name == entry.name) {
                return Err(FalError::invalid_table(format!(
                    "duplicate partition name {:?}",
                    entry.name
                )));
            }
            if entry.len == 0 {
                return Err(FalError::invalid_table(format!(
                    "partition {:?} is empty",
                    entry.name
                )));
            }
            if !is_aligned(u64::from(entry.offset), erase_size)
                || !is_aligned(u64::from(entry.len), erase_size)
            {
                return Err(FalError::invalid_table(format!(
                    "partition {:?} ({:#x}+{:#x}) is not aligned to erase size {:#x}",
                    entry.name, entry.offset, entry.len, geometry.erase_size
                )));
            }
            if entry.end() > u64::from(geometry.size) {
                return Err(FalError::invalid_table(format!(
                    "partition {:?} ends at {:#x}, beyond device size {:#x}",
                    entry.name,
                    entry.end(),
                    geometry.size
                )));
            }
            if let Some(other) = entries[..i]
                .iter()
                .find(|other| u64::from(entry.offset) < other.end() && u64::from(other.offset) < entry.end())
            {
                return Err(FalError::invalid_table(format!(
                    "partition {:?} overlaps {:?}",
                    entry.name, other.name
                )));
            }
        }

        Ok(Self { geometry, entries })
    }

    /// Looks up a partition by name.
    ///
    /// # Errors
    ///
    /// Returns `PartitionNotFound` if no partition has this name.
    pub fn lookup(&self, name: &str) -> FalResult<&PartitionEntry> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| FalError::PartitionNotFound {
                name: name.to_string(),
            })
    }

    /// Returns the entries in table order.
    #[must_use]
    pub fn entries(&self) -> &[PartitionEntry] {
        &self.entries
    }

    /// Returns the geometry the table was validated against.
    #[must_use]
    pub fn geometry(&self) -> FlashGeometry {
        self.geometry
    }
}

#[cfg(feature = "table-in-flash")]
mod stored {
    use super::*;
    use crate::device::{align_up, FlashDevice, ERASED_BYTE};
    use tracing::debug;

    /// Magic word tagging a stored partition entry ("EP10").
    pub const PARTITION_MAGIC: u32 = 0x4550_3130;
    /// Size of one stored entry.
    pub const ENTRY_SIZE: usize = 64;
    const NAME_FIELD: usize = 24;
    const DEVICE_NAME: &str = "norflash0";

    fn put_name(buf: &mut [u8], name: &str) {
        buf[..NAME_FIELD].fill(0);
        buf[..name.len()].copy_from_slice(name.as_bytes());
    }

    fn get_name(buf: &[u8]) -> FalResult<String> {
        let end = buf[..NAME_FIELD].iter().position(|&b| b == 0).unwrap_or(NAME_FIELD);
        String::from_utf8(buf[..end].to_vec())
            .map_err(|_| FalError::invalid_table("stored partition name is not UTF-8"))
    }

    fn le_u32(buf: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
    }

    impl PartitionTable {
        /// Serializes the table into its flash representation.
        #[must_use]
        pub fn to_bytes(&self) -> Vec<u8> {
            let mut out = Vec::with_capacity(self.entries.len() * ENTRY_SIZE);
            for entry in &self.entries {
                let mut raw = [0u8; ENTRY_SIZE];
                raw[0..4].copy_from_slice(&PARTITION_MAGIC.to_le_bytes());
                put_name(&mut raw[4..28], &entry.name);
                put_name(&mut raw[28..52], DEVICE_NAME);
                raw[52..56].copy_from_slice(&entry.offset.to_le_bytes());
                raw[56..60].copy_from_slice(&entry.len.to_le_bytes());
                raw[60..64].fill(ERASED_BYTE);
                out.extend_from_slice(&raw);
            }
            out
        }

        /// Programs the table into flash at `addr`.
        ///
        /// The region must be erased and `addr` aligned to the write size.
        ///
        /// # Errors
        ///
        /// Returns `Misaligned` for a bad address, or a device error.
        pub fn store_to(&self, device: &mut dyn FlashDevice, addr: u32) -> FalResult<()> {
            let write_size = device.geometry().write_size;
            let mut bytes = self.to_bytes();
            if !is_aligned(u64::from(addr), u64::from(write_size)) {
                return Err(FalError::Misaligned {
                    offset: addr,
                    len: bytes.len(),
                    granularity: write_size,
                });
            }
            bytes.resize(align_up(bytes.len(), write_size as usize), ERASED_BYTE);
            device.program(addr, &bytes)
        }

        /// Searches `start..end` for a stored table and validates it.
        ///
        /// The search steps through the range at write-size granularity and
        /// reads consecutive entries from the first magic word found.
        ///
        /// # Errors
        ///
        /// Returns `InvalidTable` if no table is found or the stored table
        /// does not validate.
        pub fn discover(device: &dyn FlashDevice, start: u32, end: u32) -> FalResult<Self> {
            let geometry = device.geometry();
            let end = end.min(geometry.size);
            let step = geometry.write_size.max(4);

            let mut addr = start;
            while u64::from(addr) + ENTRY_SIZE as u64 <= u64::from(end) {
                let mut magic = [0u8; 4];
                device.read(addr, &mut magic)?;
                if u32::from_le_bytes(magic) == PARTITION_MAGIC {
                    debug!(addr, "found partition table");
                    return Self::read_entries(device, addr, end);
                }
                addr += step;
            }

            Err(FalError::invalid_table(format!(
                "no partition table found in {start:#x}..{end:#x}"
            )))
        }

        fn read_entries(device: &dyn FlashDevice, mut addr: u32, end: u32) -> FalResult<Self> {
            let mut entries = Vec::new();
            while u64::from(addr) + ENTRY_SIZE as u64 <= u64::from(end) {
                let mut raw = [0u8; ENTRY_SIZE];
                device.read(addr, &mut raw)?;
                if le_u32(&raw, 0) != PARTITION_MAGIC {
                    break;
                }
                entries.push(PartitionEntry {
                    name: get_name(&raw[4..28])?,
                    offset: le_u32(&raw, 52),
                    len: le_u32(&raw, 56),
                });
                addr += ENTRY_SIZE as u32;
            }
            Self::new(device.geometry(), entries)
        }
    }
}

#[cfg(feature = "table-in-flash")]
pub use stored::{ENTRY_SIZE, PARTITION_MAGIC};

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> FlashGeometry {
        FlashGeometry::new(64 * 1024, 4096, 64).unwrap()
    }

    #[test]
    fn table_lookup_finds_entry() {
        let table = PartitionTable::new(
            geometry(),
            vec![
                PartitionEntry::new("bl", 0, 16 * 1024),
                PartitionEntry::new("env", 16 * 1024, 8192),
            ],
        )
        .unwrap();

        let env = table.lookup("env").unwrap();
        assert_eq!(env.offset, 16 * 1024);
        assert_eq!(env.len, 8192);
        assert_eq!(table.entries().len(), 2);
    }

    #[test]
    fn table_lookup_missing_fails() {
        let table = PartitionTable::new(geometry(), vec![]).unwrap();
        assert!(matches!(
            table.lookup("env"),
            Err(FalError::PartitionNotFound { .. })
        ));
    }

    #[test]
    fn table_rejects_misaligned_length() {
        let result = PartitionTable::new(geometry(), vec![PartitionEntry::new("env", 0, 5000)]);
        assert!(matches!(result, Err(FalError::InvalidTable(_))));
    }

    #[test]
    fn table_rejects_overflowing_partition() {
        let result = PartitionTable::new(
            geometry(),
            vec![PartitionEntry::new("env", 60 * 1024, 8192)],
        );
        assert!(result.is_err());
    }

    #[test]
    fn table_rejects_overlap() {
        let result = PartitionTable::new(
            geometry(),
            vec![
                PartitionEntry::new("a", 0, 8192),
                PartitionEntry::new("b", 4096, 8192),
            ],
        );
        assert!(result.is_err());
    }

    #[test]
    fn table_rejects_duplicate_names() {
        let result = PartitionTable::new(
            geometry(),
            vec![
                PartitionEntry::new("env", 0, 4096),
                PartitionEntry::new("env", 4096, 4096),
            ],
        );
        assert!(result.is_err());
    }

    #[test]
    fn table_rejects_long_name() {
        let result = PartitionTable::new(
            geometry(),
            vec![PartitionEntry::new("a".repeat(24), 0, 4096)],
        );
        assert!(result.is_err());
    }

    #[cfg(feature = "table-in-flash")]
    #[test]
    fn table_store_and_discover() {
        use crate::memory::InMemoryFlash;

        let table = PartitionTable::new(
            geometry(),
            vec![
                PartitionEntry::new("fdt", 4096, 4096),
                PartitionEntry::new("env", 8192, 8192),
            ],
        )
        .unwrap();

        let mut flash = InMemoryFlash::new(geometry());
        table.store_to(&mut flash, 128).unwrap();

        let found = PartitionTable::discover(&flash, 0, 4096).unwrap();
        assert_eq!(found, table);
    }

    #[cfg(feature = "table-in-flash")]
    #[test]
    fn table_discover_in_blank_flash_fails() {
        use crate::memory::InMemoryFlash;

        let flash = InMemoryFlash::new(geometry());
        assert!(matches!(
            PartitionTable::discover(&flash, 0, 4096),
            Err(FalError::InvalidTable(_))
        ));
    }
}
