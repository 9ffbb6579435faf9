//! Power-loss simulation for flashenv.
//!
//! [`CrashableFlash`] wraps an [`InMemoryFlash`] and cuts the power after a
//! budget of work units. Every programmed byte costs one unit and every
//! erase costs one unit. The operation that exhausts the budget is applied
//! partially: a program writes only the bytes that fit, an erase leaves the
//! first half of its range erased and the rest untouched.
//!
//! [`CrashHarness`] replays an operation from a fixed flash image with the
//! power cut at every unit, reopens the store on what is left and hands it
//! to a checker.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use flashenv_testkit::crash::CrashHarness;
//!
//! let harness = CrashHarness::new(tiny_geometry(), EnvConfig::new());
//! let image = harness.prepare(|env| env.set("k", "old"))?;
//! harness.crash_everywhere(&image, false, |env| env.set("k", "new"), |_, env| {
//!     let value = env.get("k").unwrap();
//!     assert!(value == b"old" || value == b"new");
//! })?;
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use flashenv_core::{EnvConfig, EnvResult, EnvStore};
use flashenv_fal::{
    FalError, FalResult, FlashDevice, FlashGeometry, InMemoryFlash, Partition, ERASED_BYTE,
};

use crate::fixtures::{fal_over, whole_device_table};

/// A flash device that loses power after a budget of work units.
///
/// Clones share the budget, so a test can keep a handle while the store
/// owns the boxed device.
#[derive(Clone)]
pub struct CrashableFlash {
    inner: InMemoryFlash,
    budget: Arc<AtomicUsize>,
    used: Arc<AtomicUsize>,
    crashed: Arc<AtomicBool>,
}

impl CrashableFlash {
    /// Wraps `inner` with an unlimited budget.
    pub fn new(inner: InMemoryFlash) -> Self {
        Self {
            inner,
            budget: Arc::new(AtomicUsize::new(usize::MAX)),
            used: Arc::new(AtomicUsize::new(0)),
            crashed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cuts the power once `units` more units have been spent.
    pub fn crash_after(&self, units: usize) {
        let used = self.used.load(Ordering::SeqCst);
        self.budget
            .store(used.saturating_add(units), Ordering::SeqCst);
    }

    /// Units spent so far.
    pub fn units_used(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }

    /// Whether the power has been cut.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// The underlying memory, as left by the crash.
    pub fn memory(&self) -> &InMemoryFlash {
        &self.inner
    }

    /// Spends up to `units` and returns how many were granted.
    fn spend(&self, units: usize) -> FalResult<usize> {
        if self.has_crashed() {
            return Err(FalError::device("power lost"));
        }
        let used = self.used.fetch_add(units, Ordering::SeqCst);
        let budget = self.budget.load(Ordering::SeqCst);
        let granted = budget.saturating_sub(used).min(units);
        if granted < units {
            self.crashed.store(true, Ordering::SeqCst);
        }
        Ok(granted)
    }
}

impl FlashDevice for CrashableFlash {
    fn geometry(&self) -> FlashGeometry {
        self.inner.geometry()
    }

    fn read(&self, addr: u32, buf: &mut [u8]) -> FalResult<()> {
        if self.has_crashed() {
            return Err(FalError::device("power lost"));
        }
        self.inner.read(addr, buf)
    }

    fn program(&mut self, addr: u32, data: &[u8]) -> FalResult<()> {
        let granted = self.spend(data.len())?;
        if granted > 0 {
            self.inner.program(addr, &data[..granted])?;
        }
        if granted < data.len() {
            return Err(FalError::device("power lost during program"));
        }
        Ok(())
    }

    fn erase(&mut self, addr: u32, len: u32) -> FalResult<()> {
        if self.spend(1)? == 0 {
            self.inner
                .corrupt(addr, &vec![ERASED_BYTE; len as usize / 2]);
            return Err(FalError::device("power lost during erase"));
        }
        self.inner.erase(addr, len)
    }
}

/// Replays store operations with the power cut at every possible point.
#[derive(Debug, Clone)]
pub struct CrashHarness {
    geometry: FlashGeometry,
    config: EnvConfig,
}

impl CrashHarness {
    /// Creates a harness. The environment partition spans the whole device.
    pub fn new(geometry: FlashGeometry, config: EnvConfig) -> Self {
        Self { geometry, config }
    }

    /// Device geometry.
    pub fn geometry(&self) -> FlashGeometry {
        self.geometry
    }

    /// Store configuration.
    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    fn partition(&self, device: Box<dyn FlashDevice>) -> Partition {
        let table = whole_device_table(self.geometry, &self.config.partition);
        fal_over(device, table)
            .partition(&self.config.partition)
            .expect("partition")
    }

    /// Opens a store over `device` without initializing it.
    pub fn open_uninit(&self, device: Box<dyn FlashDevice>) -> EnvResult<EnvStore> {
        EnvStore::with_partition(self.partition(device), self.config.clone())
    }

    /// Opens and initializes a store over a copy of `image`.
    pub fn reopen(&self, image: &[u8]) -> EnvResult<EnvStore> {
        let flash = InMemoryFlash::from_image(self.geometry, image);
        let mut store = self.open_uninit(Box::new(flash))?;
        store.init()?;
        Ok(store)
    }

    /// Runs `setup` on blank flash and returns the resulting image.
    pub fn prepare<S>(&self, setup: S) -> EnvResult<Vec<u8>>
    where
        S: FnOnce(&mut EnvStore) -> EnvResult<()>,
    {
        let flash = InMemoryFlash::new(self.geometry);
        let mut store = self.open_uninit(Box::new(flash.clone()))?;
        store.init()?;
        setup(&mut store)?;
        Ok(flash.snapshot())
    }

    /// Units `op` spends when it runs to completion from `image`.
    ///
    /// With `during_init` the count includes `init`.
    pub fn measure<F>(&self, image: &[u8], during_init: bool, op: F) -> EnvResult<usize>
    where
        F: Fn(&mut EnvStore) -> EnvResult<()>,
    {
        let device = CrashableFlash::new(InMemoryFlash::from_image(self.geometry, image));
        let mut store = self.open_uninit(Box::new(device.clone()))?;
        if !during_init {
            store.init()?;
        }
        let start = device.units_used();
        if during_init {
            store.init()?;
        }
        op(&mut store)?;
        Ok(device.units_used() - start)
    }

    /// Runs `op` from `image` with the power cut after `units`, and returns
    /// the image left behind.
    pub fn crash_image<F>(&self, image: &[u8], units: usize, during_init: bool, op: F) -> Vec<u8>
    where
        F: Fn(&mut EnvStore) -> EnvResult<()>,
    {
        let device = CrashableFlash::new(InMemoryFlash::from_image(self.geometry, image));
        // The run is expected to fail once the power is cut.
        let _ = (|| -> EnvResult<()> {
            let mut store = self.open_uninit(Box::new(device.clone()))?;
            if !during_init {
                store.init()?;
            }
            device.crash_after(units);
            if during_init {
                store.init()?;
            }
            op(&mut store)
        })();
        device.memory().snapshot()
    }

    /// Cuts the power at every unit `op` spends, reopens the store on the
    /// image left behind and calls `check(units, &store)`.
    ///
    /// With `during_init` the budget also covers `init` itself.
    ///
    /// Returns the number of crash points tried.
    ///
    /// # Errors
    ///
    /// Returns the first error from the uninterrupted run or from reopening
    /// a crashed image. Reopening must always succeed.
    pub fn crash_everywhere<F, C>(
        &self,
        image: &[u8],
        during_init: bool,
        op: F,
        mut check: C,
    ) -> EnvResult<usize>
    where
        F: Fn(&mut EnvStore) -> EnvResult<()>,
        C: FnMut(usize, &EnvStore),
    {
        let total = self.measure(image, during_init, &op)?;
        for units in 0..total {
            let crashed = self.crash_image(image, units, during_init, &op);
            let store = self.reopen(&crashed)?;
            check(units, &store);

            // Recovery itself must leave a stable image.
            let again = self.reopen(&crashed_after_recovery(self, &crashed)?)?;
            assert_eq!(
                again.iter().collect::<EnvResult<Vec<_>>>()?,
                store.iter().collect::<EnvResult<Vec<_>>>()?,
                "second recovery after crash at unit {units} changed the environment"
            );
        }
        Ok(total)
    }
}

/// Image after one recovery pass over `image`.
fn crashed_after_recovery(harness: &CrashHarness, image: &[u8]) -> EnvResult<Vec<u8>> {
    let flash = InMemoryFlash::from_image(harness.geometry, image);
    let mut store = harness.open_uninit(Box::new(flash.clone()))?;
    store.init()?;
    Ok(flash.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> FlashGeometry {
        FlashGeometry::new(2048, 1024, 8).unwrap()
    }

    #[test]
    fn crashable_program_writes_prefix() {
        let flash = InMemoryFlash::new(geometry());
        let mut device = CrashableFlash::new(flash.clone());
        device.crash_after(3);

        assert!(device.program(0, &[0u8; 8]).is_err());
        assert!(device.has_crashed());
        assert_eq!(&flash.snapshot()[..8], &[0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn crashable_device_is_dead_after_crash() {
        let flash = InMemoryFlash::new(geometry());
        let mut device = CrashableFlash::new(flash);
        device.crash_after(0);

        assert!(device.program(0, &[0u8; 8]).is_err());
        assert!(device.program(8, &[0u8; 8]).is_err());
        let mut buf = [0u8; 4];
        assert!(device.read(0, &mut buf).is_err());
    }

    #[test]
    fn crashable_erase_is_partial() {
        let flash = InMemoryFlash::new(geometry());
        let mut device = CrashableFlash::new(flash.clone());
        device.program(0, &[0u8; 1024]).unwrap();
        device.crash_after(0);

        assert!(device.erase(0, 1024).is_err());
        let image = flash.snapshot();
        assert!(image[..512].iter().all(|&b| b == 0xFF));
        assert!(image[512..1024].iter().all(|&b| b == 0x00));
    }

    #[test]
    fn units_count_bytes_and_erases() {
        let flash = InMemoryFlash::new(geometry());
        let mut device = CrashableFlash::new(flash);
        device.program(0, &[0u8; 16]).unwrap();
        device.erase(0, 1024).unwrap();
        assert_eq!(device.units_used(), 17);
        assert!(!device.has_crashed());
    }

    #[test]
    fn harness_measures_set() {
        let harness = CrashHarness::new(geometry(), EnvConfig::new());
        let image = harness.prepare(|_| Ok(())).unwrap();

        // One record of 8 + align8(16 + 1 + 1) = 32 bytes plus an 8-byte commit.
        let units = harness
            .measure(&image, false, |env| env.set("k", "v"))
            .unwrap();
        assert_eq!(units, 40);
    }
}
