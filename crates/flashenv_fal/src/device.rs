//! Flash device trait definition.

use crate::error::{FalError, FalResult};

/// Value of every byte in an erased flash region.
pub const ERASED_BYTE: u8 = 0xFF;

/// Physical layout constants of a flash device.
///
/// These are declared per device and are caller-visible constraints, not
/// something negotiated at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashGeometry {
    /// Total device size in bytes.
    pub size: u32,
    /// Smallest erasable unit in bytes.
    pub erase_size: u32,
    /// Smallest programmable unit in bytes.
    pub write_size: u32,
}

impl FlashGeometry {
    /// Creates a geometry and validates it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTable` if:
    /// - `write_size` is zero
    /// - `erase_size` is not a non-zero multiple of `write_size`
    /// - `erase_size` is not a power of two
    /// - `size` is not a multiple of `erase_size`
    pub fn new(size: u32, erase_size: u32, write_size: u32) -> FalResult<Self> {
        let geometry = Self {
            size,
            erase_size,
            write_size,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    /// Checks the internal consistency of the geometry.
    pub fn validate(&self) -> FalResult<()> {
        if self.write_size == 0 {
            return Err(FalError::invalid_table("write size must be non-zero"));
        }
        if self.erase_size == 0 || self.erase_size % self.write_size != 0 {
            return Err(FalError::invalid_table(format!(
                "erase size {} is not a multiple of write size {}",
                self.erase_size, self.write_size
            )));
        }
        if !self.erase_size.is_power_of_two() {
            return Err(FalError::invalid_table(format!(
                "erase size {} is not a power of two",
                self.erase_size
            )));
        }
        if self.size % self.erase_size != 0 {
            return Err(FalError::invalid_table(format!(
                "device size {} is not a multiple of erase size {}",
                self.size, self.erase_size
            )));
        }
        Ok(())
    }

    /// Number of erase blocks on the device.
    #[must_use]
    pub const fn erase_blocks(&self) -> u32 {
        self.size / self.erase_size
    }
}

/// Rounds `n` up to the next multiple of `granularity`.
#[must_use]
pub const fn align_up(n: usize, granularity: usize) -> usize {
    n.div_ceil(granularity) * granularity
}

/// Returns true if `n` is a multiple of `granularity`.
#[must_use]
pub const fn is_aligned(n: u64, granularity: u64) -> bool {
    n % granularity == 0
}

/// A raw NOR flash device.
///
/// Devices are **opaque byte stores** with flash semantics. They know nothing
/// about partitions or environment records.
///
/// # Invariants
///
/// - `program` is a narrowing write: each stored byte becomes
///   `stored & data`. Bits can only be cleared, never set.
/// - `erase` sets the whole region to [`ERASED_BYTE`].
/// - `read` returns exactly the bytes currently stored.
///
/// Devices are not required to check write alignment; the partition layer
/// enforces granularity before calling down.
pub trait FlashDevice: Send + Sync {
    /// Returns the device geometry.
    fn geometry(&self) -> FlashGeometry;

    /// Reads `buf.len()` bytes starting at `addr`.
    ///
    /// # Errors
    ///
    /// Returns `OutOfBounds` if the range leaves the device, or a device
    /// error if the driver fails.
    fn read(&self, addr: u32, buf: &mut [u8]) -> FalResult<()>;

    /// Programs `data` at `addr` with narrowing semantics.
    ///
    /// # Errors
    ///
    /// Returns `OutOfBounds` if the range leaves the device, or a device
    /// error if the driver fails.
    fn program(&mut self, addr: u32, data: &[u8]) -> FalResult<()>;

    /// Erases `len` bytes starting at `addr`.
    ///
    /// Both `addr` and `len` must be multiples of the erase size.
    ///
    /// # Errors
    ///
    /// Returns `Misaligned` or `OutOfBounds` for a bad range, or a device
    /// error if the driver fails.
    fn erase(&mut self, addr: u32, len: u32) -> FalResult<()>;

    /// Waits until all previous operations are durable.
    ///
    /// Most NOR devices complete every operation synchronously, so the
    /// default implementation does nothing.
    fn sync(&mut self) -> FalResult<()> {
        Ok(())
    }
}

/// Checks that `addr..addr + len` lies inside a device of `size` bytes.
pub(crate) fn check_range(addr: u32, len: usize, size: u32) -> FalResult<()> {
    let end = u64::from(addr) + len as u64;
    if end > u64::from(size) {
        return Err(FalError::OutOfBounds {
            offset: addr,
            len,
            size,
        });
    }
    Ok(())
}

/// Checks that an erase request is aligned to the erase size and in range.
pub(crate) fn check_erase(geometry: &FlashGeometry, addr: u32, len: u32) -> FalResult<()> {
    let erase_size = u64::from(geometry.erase_size);
    if !is_aligned(u64::from(addr), erase_size) || !is_aligned(u64::from(len), erase_size) {
        return Err(FalError::Misaligned {
            offset: addr,
            len: len as usize,
            granularity: geometry.erase_size,
        });
    }
    check_range(addr, len as usize, geometry.size)
}
