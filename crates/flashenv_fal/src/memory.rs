//! In-memory flash device for testing.

use crate::device::{check_erase, check_range, FlashDevice, FlashGeometry, ERASED_BYTE};
use crate::error::FalResult;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug)]
struct MemoryCells {
    bytes: Vec<u8>,
    erase_counts: Vec<u32>,
}

/// A flash device backed by ordinary memory.
///
/// Programming is emulated by AND-ing new bytes into the stored ones, so a
/// second write to the same location can only clear bits, exactly like NOR
/// flash. Erasing resets a block to `0xFF`.
///
/// Clones share the same memory. Tests keep a clone to take snapshots after
/// the original has been handed to a partition.
///
/// # Example
///
/// ```rust
/// use flashenv_fal::{FlashDevice, FlashGeometry, InMemoryFlash};
///
/// let geometry = FlashGeometry::new(8192, 4096, 1).unwrap();
/// let mut flash = InMemoryFlash::new(geometry);
/// flash.program(0, &[0xF0]).unwrap();
/// flash.program(0, &[0x0F]).unwrap();
///
/// let mut buf = [0u8; 1];
/// flash.read(0, &mut buf).unwrap();
/// assert_eq!(buf[0], 0x00);
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryFlash {
    geometry: FlashGeometry,
    cells: Arc<RwLock<MemoryCells>>,
}

impl InMemoryFlash {
    /// Creates a fully erased device.
    #[must_use]
    pub fn new(geometry: FlashGeometry) -> Self {
        let blocks = geometry.erase_blocks() as usize;
        Self {
            geometry,
            cells: Arc::new(RwLock::new(MemoryCells {
                bytes: vec![ERASED_BYTE; geometry.size as usize],
                erase_counts: vec![0; blocks],
            })),
        }
    }

    /// Creates a device holding a copy of `image`.
    ///
    /// Useful for restarting a store from a captured snapshot. The image is
    /// padded with erased bytes or truncated to the device size.
    #[must_use]
    pub fn from_image(geometry: FlashGeometry, image: &[u8]) -> Self {
        let device = Self::new(geometry);
        {
            let mut cells = device.cells.write();
            let len = image.len().min(cells.bytes.len());
            cells.bytes[..len].copy_from_slice(&image[..len]);
        }
        device
    }

    /// Returns a copy of the whole device contents.
    #[must_use]
    pub fn snapshot(&self) -> Vec<u8> {
        self.cells.read().bytes.clone()
    }

    /// Returns how often each erase block has been erased.
    #[must_use]
    pub fn erase_counts(&self) -> Vec<u32> {
        self.cells.read().erase_counts.clone()
    }

    /// Overwrites bytes without flash semantics.
    ///
    /// This can set bits, which real flash cannot do. It exists to inject
    /// corruption in tests.
    pub fn corrupt(&self, addr: u32, data: &[u8]) {
        let mut cells = self.cells.write();
        let start = addr as usize;
        let end = (start + data.len()).min(cells.bytes.len());
        if start < end {
            cells.bytes[start..end].copy_from_slice(&data[..end - start]);
        }
    }
}

impl FlashDevice for InMemoryFlash {
    fn geometry(&self) -> FlashGeometry {
        self.geometry
    }

    fn read(&self, addr: u32, buf: &mut [u8]) -> FalResult<()> {
        check_range(addr, buf.len(), self.geometry.size)?;
        let cells = self.cells.read();
        let start = addr as usize;
        buf.copy_from_slice(&cells.bytes[start..start + buf.len()]);
        Ok(())
    }

    fn program(&mut self, addr: u32, data: &[u8]) -> FalResult<()> {
        check_range(addr, data.len(), self.geometry.size)?;
        let mut cells = self.cells.write();
        let start = addr as usize;
        for (cell, byte) in cells.bytes[start..start + data.len()].iter_mut().zip(data) {
            *cell &= *byte;
        }
        Ok(())
    }

    fn erase(&mut self, addr: u32, len: u32) -> FalResult<()> {
        check_erase(&self.geometry, addr, len)?;
        let mut cells = self.cells.write();
        let start = addr as usize;
        cells.bytes[start..start + len as usize].fill(ERASED_BYTE);

        let first = addr / self.geometry.erase_size;
        let last = (addr + len) / self.geometry.erase_size;
        for block in first..last {
            cells.erase_counts[block as usize] += 1;
        }
        Ok(())
    }
}
