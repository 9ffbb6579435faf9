//! Thread-safe store handle.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::EnvResult;
use crate::stats::{EnvStats, EnvUsage};
use crate::store::EnvStore;

/// A cloneable handle that serializes every call to one [`EnvStore`].
///
/// The engine assumes a single writer. This wrapper is the caller-side lock
/// that makes the store safe to share between threads.
///
/// # Example
///
/// ```rust,ignore
/// let shared = SharedEnvStore::new(store);
/// let worker = shared.clone();
/// std::thread::spawn(move || worker.set("boot_times", "1"));
/// ```
#[derive(Clone, Debug)]
pub struct SharedEnvStore {
    inner: Arc<Mutex<EnvStore>>,
}

impl SharedEnvStore {
    /// Wraps an initialized store.
    #[must_use]
    pub fn new(store: EnvStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Runs `f` with exclusive access to the store.
    pub fn with<R>(&self, f: impl FnOnce(&mut EnvStore) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// See [`EnvStore::get`].
    pub fn get(&self, key: &str) -> EnvResult<Vec<u8>> {
        self.inner.lock().get(key)
    }

    /// See [`EnvStore::set`].
    pub fn set(&self, key: &str, value: impl AsRef<[u8]>) -> EnvResult<()> {
        self.inner.lock().set(key, value)
    }

    /// See [`EnvStore::delete`].
    pub fn delete(&self, key: &str) -> EnvResult<()> {
        self.inner.lock().delete(key)
    }

    /// See [`EnvStore::flush`].
    pub fn flush(&self) -> EnvResult<()> {
        self.inner.lock().flush()
    }

    /// See [`EnvStore::contains`].
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().contains(key)
    }

    /// See [`EnvStore::keys`].
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().keys()
    }

    /// See [`EnvStore::stats`].
    #[must_use]
    pub fn stats(&self) -> EnvStats {
        self.inner.lock().stats()
    }

    /// See [`EnvStore::usage`].
    #[must_use]
    pub fn usage(&self) -> EnvUsage {
        self.inner.lock().usage()
    }

    /// Unwraps the store if this is the last handle.
    ///
    /// # Errors
    ///
    /// Returns the handle unchanged if other clones are alive.
    pub fn try_into_inner(self) -> Result<EnvStore, Self> {
        Arc::try_unwrap(self.inner)
            .map(Mutex::into_inner)
            .map_err(|inner| Self { inner })
    }
}
