//! The environment store API.

use flashenv_fal::{Fal, Partition};
use tracing::{debug, info};

use crate::config::{EnvConfig, KEY_LEN_LIMIT};
use crate::error::{EnvError, EnvResult};
use crate::log::{CompactionReport, EngineState, LogEngine, SectorReport, SetOutcome};
use crate::stats::{EnvStats, EnvUsage};
use crate::version::{self, InitReport, VersionAction, VERSION_KEY};

/// A key-value environment stored in one flash partition.
///
/// `EnvStore` is the public surface over the log engine. It validates keys,
/// hides the reserved version record and applies the version policy at
/// [`EnvStore::init`].
///
/// Methods take `&mut self` for writes and do no locking. Wrap the store in
/// a [`crate::SharedEnvStore`] to call it from several threads.
///
/// # Example
///
/// ```rust
/// use flashenv_core::{EnvConfig, EnvStore};
/// use flashenv_fal::{Fal, FlashGeometry, InMemoryFlash, PartitionEntry, PartitionTable};
///
/// let geometry = FlashGeometry::new(8192, 4096, 64).unwrap();
/// let table = PartitionTable::new(geometry, vec![PartitionEntry::new("env", 0, 8192)]).unwrap();
/// let fal = Fal::new(Box::new(InMemoryFlash::new(geometry)), table).unwrap();
///
/// let config = EnvConfig::new().default_env("boot_times", "0");
/// let mut env = EnvStore::open(&fal, config).unwrap();
/// env.init().unwrap();
///
/// env.set("boot_times", "1").unwrap();
/// assert_eq!(env.get("boot_times").unwrap(), b"1");
/// ```
pub struct EnvStore {
    engine: LogEngine,
    config: EnvConfig,
    version: Option<u32>,
}

impl EnvStore {
    /// Opens the store on the partition named by `config.partition`.
    ///
    /// The store is not usable until [`EnvStore::init`] succeeds.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the partition does not exist or the
    /// configuration does not fit it.
    pub fn open(fal: &Fal, config: EnvConfig) -> EnvResult<Self> {
        let partition = fal
            .partition(&config.partition)
            .map_err(|err| EnvError::config(err.to_string()))?;
        Self::with_partition(partition, config)
    }

    /// Opens the store on an explicit partition handle.
    ///
    /// # Errors
    ///
    /// Returns `Config` for an invalid key length limit, an invalid default
    /// key or sectors that do not fit the partition.
    pub fn with_partition(partition: Partition, config: EnvConfig) -> EnvResult<Self> {
        if config.max_key_len == 0 || config.max_key_len > KEY_LEN_LIMIT {
            return Err(EnvError::config(format!(
                "max_key_len {} must be in 1..={KEY_LEN_LIMIT}",
                config.max_key_len
            )));
        }
        if VERSION_KEY.len() > config.max_key_len {
            return Err(EnvError::config(format!(
                "max_key_len {} is shorter than the version key",
                config.max_key_len
            )));
        }
        for default in &config.defaults {
            check_key(&default.key, config.max_key_len)
                .map_err(|err| EnvError::config(format!("default environment: {err}")))?;
        }

        let engine = LogEngine::new(partition, config.sector_size, config.max_key_len)?;
        Ok(Self {
            engine,
            config,
            version: None,
        })
    }

    /// Mounts the partition and applies the version policy.
    ///
    /// Flash corruption never fails init: torn writes are dropped and an
    /// unformatted partition is formatted and filled with the defaults.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the default environment does not fit a sector and
    /// `Flash` if the device fails.
    pub fn init(&mut self) -> EnvResult<InitReport> {
        let mount = self.engine.mount()?;

        let stored = match self.engine.get(VERSION_KEY) {
            Ok(value) => value.as_deref().and_then(version::decode_version),
            Err(EnvError::Integrity(_)) => None,
            Err(err) => return Err(err),
        };
        let action = version::plan(stored, self.config.version, self.config.auto_update);
        let mut added_keys = Vec::new();

        match action {
            VersionAction::Keep => {}
            VersionAction::Reset => {
                info!(
                    stored = ?stored,
                    configured = self.config.version,
                    "resetting environment to defaults"
                );
                self.write_defaults().map_err(full_is_config)?;
            }
            VersionAction::Migrate { from, to } => {
                info!(from, to, "migrating environment");
                added_keys = self.migrate(to).map_err(full_is_config)?;
            }
        }

        self.version = Some(self.config.version);
        Ok(InitReport {
            stored_version: stored,
            version: self.config.version,
            action,
            added_keys,
            formatted: mount.formatted,
            torn_tail: mount.torn_tail,
        })
    }

    fn write_defaults(&mut self) -> EnvResult<CompactionReport> {
        let mut entries: Vec<(String, Vec<u8>)> = self
            .config
            .defaults
            .iter()
            .map(|d| (d.key.clone(), d.value.clone()))
            .collect();
        entries.push((
            VERSION_KEY.to_string(),
            version::encode_version(self.config.version),
        ));
        self.engine.compact_with(entries)
    }

    fn migrate(&mut self, to: u32) -> EnvResult<Vec<String>> {
        let missing: Vec<_> = self
            .config
            .defaults
            .iter()
            .filter(|d| !self.engine.index().contains_key(&d.key))
            .cloned()
            .collect();

        let mut added = Vec::with_capacity(missing.len());
        for default in missing {
            self.engine.set(&default.key, &default.value)?;
            debug!(key = %default.key, "added default key");
            added.push(default.key);
        }
        self.engine.set(VERSION_KEY, &version::encode_version(to))?;
        Ok(added)
    }

    /// Replaces the whole environment with the configured defaults.
    ///
    /// The reset is one compaction, so power loss leaves either the old
    /// environment or the defaults.
    ///
    /// # Errors
    ///
    /// Returns `StoreFull` if the defaults do not fit a sector.
    pub fn reset_to_defaults(&mut self) -> EnvResult<()> {
        self.engine.ensure_ready()?;
        info!("resetting environment to defaults");
        self.write_defaults()?;
        self.version = Some(self.config.version);
        Ok(())
    }

    fn check_key(&self, key: &str) -> EnvResult<()> {
        check_key(key, self.config.max_key_len)
    }

    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the key is absent and `InvalidKey` for
    /// reserved or malformed keys.
    pub fn get(&self, key: &str) -> EnvResult<Vec<u8>> {
        self.check_key(key)?;
        let value = self
            .engine
            .get(key)?
            .ok_or_else(|| EnvError::key_not_found(key))?;
        self.engine.stats().record_get();
        Ok(value)
    }

    /// Copies the value stored under `key` into `buf` and returns its length.
    ///
    /// # Errors
    ///
    /// Returns `BufferTooSmall` if `buf` is shorter than the value.
    pub fn get_into(&self, key: &str, buf: &mut [u8]) -> EnvResult<usize> {
        let value = self.get(key)?;
        if buf.len() < value.len() {
            return Err(EnvError::BufferTooSmall {
                needed: value.len(),
                available: buf.len(),
            });
        }
        buf[..value.len()].copy_from_slice(&value);
        Ok(value.len())
    }

    /// Returns the value stored under `key` as text.
    ///
    /// Invalid UTF-8 sequences are replaced with `U+FFFD`.
    ///
    /// # Errors
    ///
    /// See [`EnvStore::get`].
    pub fn get_string(&self, key: &str) -> EnvResult<String> {
        let value = self.get(key)?;
        Ok(String::from_utf8_lossy(&value).into_owned())
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// Storing the value that is already present writes nothing.
    ///
    /// # Errors
    ///
    /// Returns `StoreFull` if the record does not fit even after compaction
    /// and `InvalidKey` for reserved or malformed keys.
    pub fn set(&mut self, key: &str, value: impl AsRef<[u8]>) -> EnvResult<()> {
        self.check_key(key)?;
        match self.engine.set(key, value.as_ref())? {
            SetOutcome::Unchanged => self.engine.stats().record_noop_set(),
            SetOutcome::Appended | SetOutcome::Compacted => self.engine.stats().record_set(),
        }
        Ok(())
    }

    /// Removes `key`.
    ///
    /// # Errors
    ///
    /// Returns `KeyNotFound` if the key is absent.
    pub fn delete(&mut self, key: &str) -> EnvResult<()> {
        self.check_key(key)?;
        self.engine.delete(key)?;
        self.engine.stats().record_delete();
        Ok(())
    }

    /// Waits until every write is durable.
    ///
    /// Writes reach flash before each call returns, so this only matters for
    /// devices that buffer, such as image files.
    ///
    /// # Errors
    ///
    /// Returns `Flash` if the device fails to sync.
    pub fn flush(&self) -> EnvResult<()> {
        self.engine.ensure_ready()?;
        self.engine.partition().sync()?;
        Ok(())
    }

    /// Whether `key` holds a value. Reserved and malformed keys never do.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.check_key(key).is_ok() && self.engine.index().contains_key(key)
    }

    /// Returns every user key, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.user_keys().cloned().collect()
    }

    /// Iterates over user keys and values, sorted by key.
    ///
    /// Each value is read from flash as the iterator advances.
    pub fn iter(&self) -> impl Iterator<Item = EnvResult<(String, Vec<u8>)>> + '_ {
        self.user_keys().map(move |key| -> EnvResult<(String, Vec<u8>)> {
            let value = self
                .engine
                .get(key)?
                .ok_or_else(|| EnvError::key_not_found(key.as_str()))?;
            Ok((key.clone(), value))
        })
    }

    fn user_keys(&self) -> impl Iterator<Item = &String> + '_ {
        self.engine
            .index()
            .keys()
            .filter(|key| !version::is_reserved(key))
    }

    /// Number of user keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.user_keys().count()
    }

    /// Whether the store holds no user keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Compacts the active sector now.
    ///
    /// # Errors
    ///
    /// Returns `Flash` if the device fails. The old sector stays
    /// authoritative in that case.
    pub fn compact(&mut self) -> EnvResult<CompactionReport> {
        self.engine.compact()
    }

    /// Walks both sectors and reports every record found.
    ///
    /// # Errors
    ///
    /// Returns `Flash` if the device fails.
    pub fn verify(&self) -> EnvResult<[SectorReport; 2]> {
        self.engine.verify()
    }

    /// Space usage of the active sector.
    #[must_use]
    pub fn usage(&self) -> EnvUsage {
        self.engine.usage()
    }

    /// Operation counters since the store was opened.
    #[must_use]
    pub fn stats(&self) -> EnvStats {
        self.engine.stats().snapshot()
    }

    /// Engine state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.engine.state()
    }

    /// Environment version, once initialized.
    #[must_use]
    pub fn version(&self) -> Option<u32> {
        self.version
    }

    /// The configuration the store was opened with.
    #[must_use]
    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    /// Largest value that fits a sector for a key of `key_len` bytes.
    #[must_use]
    pub fn max_value_len(&self, key_len: usize) -> usize {
        let codec = self.engine.codec();
        let capacity = self.engine.capacity();
        let fixed = codec.encoded_len(key_len, 0);
        if fixed > capacity {
            return 0;
        }
        // capacity and the status slot are both write-aligned
        capacity - codec.write_size() - crate::log::RECORD_HEADER_SIZE - key_len
    }
}

impl std::fmt::Debug for EnvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvStore")
            .field("engine", &self.engine)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

fn check_key(key: &str, max_key_len: usize) -> EnvResult<()> {
    if version::is_reserved(key) {
        return Err(EnvError::invalid_key(key, "reserved for internal use"));
    }
    if key.is_empty() {
        return Err(EnvError::invalid_key(key, "key is empty"));
    }
    if key.len() > max_key_len {
        return Err(EnvError::invalid_key(
            key,
            format!("key is {} bytes, maximum is {max_key_len}", key.len()),
        ));
    }
    if key.contains('\0') {
        return Err(EnvError::invalid_key(key, "key contains NUL"));
    }
    Ok(())
}

/// Default environments that cannot be written are a configuration problem.
fn full_is_config(err: EnvError) -> EnvError {
    match err {
        EnvError::StoreFull { needed, available } => EnvError::config(format!(
            "default environment needs {needed} bytes, sector holds {available}"
        )),
        other => other,
    }
}
