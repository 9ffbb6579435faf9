//! File-backed flash device for raw flash images.

use crate::device::{check_erase, check_range, FlashDevice, FlashGeometry, ERASED_BYTE};
use crate::error::{FalError, FalResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A flash device stored in a raw image file.
///
/// The file holds exactly `geometry.size` bytes, one per flash byte. This is
/// the format produced by flash dump tools, so the same image can be
/// inspected offline and written back to a device.
///
/// Programming performs a read-modify-write that AND-s the new bytes into
/// the old ones, preserving narrowing-write semantics.
///
/// # Durability
///
/// - `program` and `erase` write through to the OS immediately
/// - `sync()` calls `File::sync_all()` to ensure data is on disk
///
/// # Example
///
/// ```no_run
/// use flashenv_fal::{FileFlash, FlashDevice, FlashGeometry};
/// use std::path::Path;
///
/// let geometry = FlashGeometry::new(8192, 4096, 64).unwrap();
/// let mut flash = FileFlash::create(Path::new("env.img"), geometry).unwrap();
/// flash.program(0, &[0xFE; 64]).unwrap();
/// flash.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileFlash {
    path: PathBuf,
    geometry: FlashGeometry,
    file: Mutex<File>,
}

impl FileFlash {
    /// Creates a new, fully erased image, replacing any existing file.
    ///
    /// # Errors
    ///
    /// Returns an error if the geometry is invalid or the file cannot be
    /// created.
    pub fn create(path: &Path, geometry: FlashGeometry) -> FalResult<Self> {
        geometry.validate()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let block = vec![ERASED_BYTE; geometry.erase_size as usize];
        for _ in 0..geometry.erase_blocks() {
            file.write_all(&block)?;
        }
        file.flush()?;

        Ok(Self {
            path: path.to_path_buf(),
            geometry,
            file: Mutex::new(file),
        })
    }

    /// Opens an existing image.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its length does not
    /// match the geometry.
    pub fn open(path: &Path, geometry: FlashGeometry) -> FalResult<Self> {
        geometry.validate()?;
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len != u64::from(geometry.size) {
            return Err(FalError::device(format!(
                "image {} is {} bytes, expected {}",
                path.display(),
                len,
                geometry.size
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            geometry,
            file: Mutex::new(file),
        })
    }

    /// Opens an image if it exists, otherwise creates an erased one.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open_or_create(path: &Path, geometry: FlashGeometry) -> FalResult<Self> {
        if path.exists() {
            Self::open(path, geometry)
        } else {
            Self::create(path, geometry)
        }
    }

    /// Returns the path to the image file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FlashDevice for FileFlash {
    fn geometry(&self) -> FlashGeometry {
        self.geometry
    }

    fn read(&self, addr: u32, buf: &mut [u8]) -> FalResult<()> {
        check_range(addr, buf.len(), self.geometry.size)?;
        if buf.is_empty() {
            return Ok(());
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(u64::from(addr)))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn program(&mut self, addr: u32, data: &[u8]) -> FalResult<()> {
        check_range(addr, data.len(), self.geometry.size)?;
        if data.is_empty() {
            return Ok(());
        }

        let mut file = self.file.lock();
        let mut current = vec![0u8; data.len()];
        file.seek(SeekFrom::Start(u64::from(addr)))?;
        file.read_exact(&mut current)?;

        for (cell, byte) in current.iter_mut().zip(data) {
            *cell &= *byte;
        }

        file.seek(SeekFrom::Start(u64::from(addr)))?;
        file.write_all(&current)?;
        file.flush()?;
        Ok(())
    }

    fn erase(&mut self, addr: u32, len: u32) -> FalResult<()> {
        check_erase(&self.geometry, addr, len)?;

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(u64::from(addr)))?;
        file.write_all(&vec![ERASED_BYTE; len as usize])?;
        file.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> FalResult<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}
