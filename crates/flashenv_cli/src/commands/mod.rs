//! CLI command implementations.

pub mod compact;
pub mod env;
pub mod format;
pub mod inspect;
pub mod verify;

use std::path::PathBuf;

use flashenv_core::{EnvConfig, EnvError, EnvStore, InitReport};
use flashenv_fal::{Fal, FalError, FileFlash, FlashGeometry, PartitionEntry, PartitionTable};
use thiserror::Error;
use tracing::debug;

/// Name of the environment partition inside the image.
pub const PARTITION: &str = "env";

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The image or its layout is unusable.
    #[error("flash error: {0}")]
    Flash(#[from] FalError),

    /// The environment store failed.
    #[error(transparent)]
    Env(#[from] EnvError),

    /// Output could not be written.
    #[error("output error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON output could not be produced.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Where the image lives and how the environment partition is laid out.
#[derive(Debug, Clone)]
pub struct ImageArgs {
    /// Path to the raw flash image.
    pub path: PathBuf,
    /// Image size in bytes.
    pub size: u32,
    /// Erase granularity.
    pub erase_size: u32,
    /// Write granularity.
    pub write_size: u32,
    /// Start of the environment partition.
    pub partition_offset: u32,
    /// Length of the environment partition; the rest of the image if unset.
    pub partition_len: Option<u32>,
}

impl ImageArgs {
    /// Validated device geometry.
    pub fn geometry(&self) -> CliResult<FlashGeometry> {
        Ok(FlashGeometry::new(self.size, self.erase_size, self.write_size)?)
    }

    /// Partition table holding the environment partition.
    pub fn table(&self) -> CliResult<PartitionTable> {
        let geometry = self.geometry()?;
        let len = self
            .partition_len
            .unwrap_or_else(|| self.size.saturating_sub(self.partition_offset));
        Ok(PartitionTable::new(
            geometry,
            vec![PartitionEntry::new(PARTITION, self.partition_offset, len)],
        )?)
    }

    fn fal(&self, device: FileFlash) -> CliResult<Fal> {
        Ok(Fal::new(Box::new(device), self.table()?)?)
    }

    /// Opens the image and boots the environment on it.
    ///
    /// Booting applies the same recovery a device would, so the image may
    /// be repaired or formatted.
    pub fn open(&self) -> CliResult<(EnvStore, InitReport)> {
        let device = FileFlash::open(&self.path, self.geometry()?)?;
        self.boot(device)
    }

    /// Replaces the image with erased flash and boots a fresh environment.
    pub fn create(&self) -> CliResult<(EnvStore, InitReport)> {
        let device = FileFlash::create(&self.path, self.geometry()?)?;
        self.boot(device)
    }

    fn boot(&self, device: FileFlash) -> CliResult<(EnvStore, InitReport)> {
        let fal = self.fal(device)?;
        let mut store = EnvStore::open(&fal, EnvConfig::new().partition(PARTITION))?;
        let report = store.init()?;
        debug!(path = %self.path.display(), ?report, "booted environment");
        Ok((store, report))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn image_args(dir: &TempDir) -> ImageArgs {
        ImageArgs {
            path: dir.path().join("flash.bin"),
            size: 16 * 1024,
            erase_size: 4096,
            write_size: 64,
            partition_offset: 8192,
            partition_len: None,
        }
    }

    pub(crate) fn output(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn partition_defaults_to_rest_of_image() {
        let dir = TempDir::new().unwrap();
        let table = image_args(&dir).table().unwrap();
        let entry = table.lookup(PARTITION).unwrap();
        assert_eq!((entry.offset, entry.len), (8192, 8192));
    }

    #[test]
    fn bad_geometry_is_reported() {
        let dir = TempDir::new().unwrap();
        let mut args = image_args(&dir);
        args.erase_size = 1000;
        assert!(matches!(args.geometry(), Err(CliError::Flash(_))));
    }

    #[test]
    fn open_missing_image_fails() {
        let dir = TempDir::new().unwrap();
        assert!(image_args(&dir).open().is_err());
    }
}
