//! Test fixtures and store helpers.
//!
//! Provides ready-made geometries and environment stores over in-memory
//! and file-backed flash.

use std::path::{Path, PathBuf};

use flashenv_core::{EnvConfig, EnvStore, InitReport};
use flashenv_fal::{
    Fal, FileFlash, FlashDevice, FlashGeometry, InMemoryFlash, PartitionEntry, PartitionTable,
};
use tempfile::TempDir;

/// Two 4 KiB sectors with a 64-byte write granule.
pub fn small_geometry() -> FlashGeometry {
    FlashGeometry::new(8192, 4096, 64).expect("small geometry")
}

/// Two 1 KiB sectors with an 8-byte write granule.
///
/// Small enough to exhaust quickly in crash and capacity tests.
pub fn tiny_geometry() -> FlashGeometry {
    FlashGeometry::new(2048, 1024, 8).expect("tiny geometry")
}

/// A table with one partition named `name` spanning the whole device.
pub fn whole_device_table(geometry: FlashGeometry, name: &str) -> PartitionTable {
    PartitionTable::new(geometry, vec![PartitionEntry::new(name, 0, geometry.size)])
        .expect("partition table")
}

/// Builds the abstraction layer over `device`.
pub fn fal_over(device: Box<dyn FlashDevice>, table: PartitionTable) -> Fal {
    Fal::new(device, table).expect("fal")
}

/// An initialized environment over in-memory flash.
///
/// The flash handle is shared with the store, so the image can be captured
/// at any point and reopened as if the device had rebooted.
pub struct TestEnv {
    /// The store.
    pub env: EnvStore,
    /// Report from the last `init`.
    pub report: InitReport,
    flash: InMemoryFlash,
    config: EnvConfig,
}

impl TestEnv {
    /// Blank flash with the small geometry.
    pub fn new(config: EnvConfig) -> Self {
        Self::with_flash(InMemoryFlash::new(small_geometry()), config)
    }

    /// Blank flash with the tiny geometry.
    pub fn tiny(config: EnvConfig) -> Self {
        Self::with_flash(InMemoryFlash::new(tiny_geometry()), config)
    }

    /// Opens and initializes a store over `flash`.
    ///
    /// The environment partition spans the whole device.
    pub fn with_flash(flash: InMemoryFlash, config: EnvConfig) -> Self {
        let table = whole_device_table(flash.geometry(), &config.partition);
        let fal = fal_over(Box::new(flash.clone()), table);
        let mut env = EnvStore::open(&fal, config.clone()).expect("open environment");
        let report = env.init().expect("init environment");
        Self {
            env,
            report,
            flash,
            config,
        }
    }

    /// Current flash image.
    pub fn snapshot(&self) -> Vec<u8> {
        self.flash.snapshot()
    }

    /// The flash shared with the store.
    pub fn flash(&self) -> &InMemoryFlash {
        &self.flash
    }

    /// Simulates a reboot: a fresh store over a copy of the current image.
    pub fn reopen(&self) -> Self {
        self.reopen_with(self.config.clone())
    }

    /// Reboots with a different configuration.
    pub fn reopen_with(&self, config: EnvConfig) -> Self {
        let flash = InMemoryFlash::from_image(self.flash.geometry(), &self.flash.snapshot());
        Self::with_flash(flash, config)
    }
}

impl std::ops::Deref for TestEnv {
    type Target = EnvStore;

    fn deref(&self) -> &Self::Target {
        &self.env
    }
}

impl std::ops::DerefMut for TestEnv {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.env
    }
}

/// An initialized environment over a flash image file.
pub struct FileEnv {
    /// The store.
    pub env: EnvStore,
    /// Report from the last `init`.
    pub report: InitReport,
    geometry: FlashGeometry,
    config: EnvConfig,
    path: PathBuf,
    _temp_dir: TempDir,
}

impl FileEnv {
    /// Creates a blank image file with the small geometry.
    pub fn new(config: EnvConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("flash.bin");
        let geometry = small_geometry();
        let (env, report) = Self::open_store(&path, geometry, &config);
        Self {
            env,
            report,
            geometry,
            config,
            path,
            _temp_dir: temp_dir,
        }
    }

    fn open_store(
        path: &Path,
        geometry: FlashGeometry,
        config: &EnvConfig,
    ) -> (EnvStore, InitReport) {
        let flash = FileFlash::open_or_create(path, geometry).expect("open flash image");
        let table = whole_device_table(geometry, &config.partition);
        let fal = fal_over(Box::new(flash), table);
        let mut env = EnvStore::open(&fal, config.clone()).expect("open environment");
        let report = env.init().expect("init environment");
        (env, report)
    }

    /// Path of the image file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes, drops the store and opens the image file again.
    pub fn reopen(self) -> Self {
        self.env.flush().expect("flush");
        let Self {
            env,
            geometry,
            config,
            path,
            _temp_dir,
            ..
        } = self;
        drop(env);
        let (env, report) = Self::open_store(&path, geometry, &config);
        Self {
            env,
            report,
            geometry,
            config,
            path,
            _temp_dir,
        }
    }
}

impl std::ops::Deref for FileEnv {
    type Target = EnvStore;

    fn deref(&self) -> &Self::Target {
        &self.env
    }
}

impl std::ops::DerefMut for FileEnv {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.env
    }
}

/// Runs a test with an initialized in-memory environment.
///
/// # Example
///
/// ```rust,ignore
/// use flashenv_testkit::with_test_env;
///
/// with_test_env(EnvConfig::new(), |env| {
///     env.set("ipaddr", "192.168.1.2").unwrap();
/// });
/// ```
pub fn with_test_env<F, R>(config: EnvConfig, f: F) -> R
where
    F: FnOnce(&mut TestEnv) -> R,
{
    let mut env = TestEnv::new(config);
    f(&mut env)
}
