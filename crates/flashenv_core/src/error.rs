//! Error types for the environment store.

use flashenv_fal::FalError;
use thiserror::Error;

/// Result type for environment store operations.
pub type EnvResult<T> = Result<T, EnvError>;

/// Result type for record codec operations.
pub type RecordResult<T> = Result<T, RecordError>;

/// Errors produced while encoding or decoding a single record.
///
/// During a startup scan these are recovered locally: the scan stops and
/// the rest of the sector is treated as unreadable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// Fewer bytes are available than the record requires.
    #[error("record truncated: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// The stored checksum does not match the record contents.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the record header.
        expected: u32,
        /// Checksum computed over the record contents.
        actual: u32,
    },

    /// The record header does not start with the record magic.
    #[error("bad record magic {found:02x?}")]
    BadMagic {
        /// The bytes found where the magic was expected.
        found: [u8; 4],
    },

    /// The status byte holds none of the defined values.
    #[error("invalid record status byte {0:#04x}")]
    InvalidStatus(u8),

    /// The key is longer than allowed.
    #[error("key is {len} bytes, maximum is {max}")]
    KeyTooLong {
        /// Length of the key.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },

    /// The key is empty.
    #[error("key is empty")]
    EmptyKey,

    /// The stored key is not valid UTF-8.
    #[error("key is not valid UTF-8")]
    KeyNotUtf8,
}

/// Errors that can occur in environment store operations.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The store configuration or partition table is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// The flash device or partition layer failed.
    #[error("flash error: {0}")]
    Flash(#[from] FalError),

    /// A record indexed as live no longer decodes.
    #[error("integrity error: {0}")]
    Integrity(#[from] RecordError),

    /// The key is not present.
    #[error("key not found: {key}")]
    KeyNotFound {
        /// The key that was looked up.
        key: String,
    },

    /// There is not enough space for the record, even after compaction.
    #[error("store full: need {needed} bytes, {available} available")]
    StoreFull {
        /// Encoded size of the rejected record.
        needed: usize,
        /// Bytes that could be made available.
        available: usize,
    },

    /// The key cannot be used through the public API.
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey {
        /// The offending key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The caller's buffer cannot hold the value.
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Length of the stored value.
        needed: usize,
        /// Length of the caller's buffer.
        available: usize,
    },

    /// The engine has not finished initialization.
    #[error("environment is not initialized")]
    NotReady,
}

impl EnvError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates a key not found error.
    pub fn key_not_found(key: impl Into<String>) -> Self {
        Self::KeyNotFound { key: key.into() }
    }

    /// Creates an invalid key error.
    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Returns true for the expected, recoverable "no such key" outcome.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::KeyNotFound { .. })
    }
}
