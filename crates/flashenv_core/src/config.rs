//! Environment store configuration.

/// Hard upper bound on key length, fixed by the one-byte length field.
pub const KEY_LEN_LIMIT: usize = 255;

/// Default partition name for the environment.
pub const DEFAULT_PARTITION: &str = "env";

/// One entry of the factory default environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultEnv {
    /// Key.
    pub key: String,
    /// Initial value.
    pub value: Vec<u8>,
}

impl DefaultEnv {
    /// Creates a default entry.
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Configuration for opening an environment store.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// Name of the partition holding the environment.
    pub partition: String,

    /// Size of each of the two log sectors. `None` uses half the partition,
    /// rounded down to the erase size.
    pub sector_size: Option<u32>,

    /// Environment version expected by the firmware.
    pub version: u32,

    /// Whether a version increase migrates by adding new defaults instead
    /// of resetting the environment.
    pub auto_update: bool,

    /// Maximum key length in bytes.
    pub max_key_len: usize,

    /// Factory default environment.
    pub defaults: Vec<DefaultEnv>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            partition: DEFAULT_PARTITION.to_string(),
            sector_size: None,
            version: 0,
            auto_update: false,
            max_key_len: 64,
            defaults: Vec::new(),
        }
    }
}

impl EnvConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the partition name.
    #[must_use]
    pub fn partition(mut self, name: impl Into<String>) -> Self {
        self.partition = name.into();
        self
    }

    /// Sets an explicit sector size.
    #[must_use]
    pub const fn sector_size(mut self, size: u32) -> Self {
        self.sector_size = Some(size);
        self
    }

    /// Sets the expected environment version.
    #[must_use]
    pub const fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Sets whether version increases migrate instead of resetting.
    #[must_use]
    pub const fn auto_update(mut self, value: bool) -> Self {
        self.auto_update = value;
        self
    }

    /// Sets the maximum key length.
    #[must_use]
    pub const fn max_key_len(mut self, len: usize) -> Self {
        self.max_key_len = len;
        self
    }

    /// Adds a factory default entry.
    #[must_use]
    pub fn default_env(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.defaults.push(DefaultEnv::new(key, value));
        self
    }

    /// Replaces the factory default environment.
    #[must_use]
    pub fn defaults(mut self, defaults: Vec<DefaultEnv>) -> Self {
        self.defaults = defaults;
        self
    }
}
