//! Error types for flash abstraction operations.

use std::io;
use thiserror::Error;

/// Result type for flash abstraction operations.
pub type FalResult<T> = Result<T, FalError>;

/// Errors that can occur while accessing flash through the abstraction layer.
#[derive(Debug, Error)]
pub enum FalError {
    /// An I/O error occurred in a file-backed device.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// No partition with the requested name exists in the table.
    #[error("partition not found: {name}")]
    PartitionNotFound {
        /// The requested partition name.
        name: String,
    },

    /// The access would leave the bounds of the partition or device.
    #[error("access out of bounds: offset {offset}, len {len}, size {size}")]
    OutOfBounds {
        /// Offset of the access.
        offset: u32,
        /// Length of the access.
        len: usize,
        /// Size of the addressed region.
        size: u32,
    },

    /// Offset or length is not a multiple of the required granularity.
    #[error("misaligned access: offset {offset}, len {len}, granularity {granularity}")]
    Misaligned {
        /// Offset of the access.
        offset: u32,
        /// Length of the access.
        len: usize,
        /// Required granularity in bytes.
        granularity: u32,
    },

    /// The partition table or device geometry is invalid.
    #[error("invalid partition table: {0}")]
    InvalidTable(String),

    /// The flash driver reported a failure.
    #[error("flash device error: {0}")]
    Device(String),
}

impl FalError {
    /// Creates an invalid table error.
    pub fn invalid_table(message: impl Into<String>) -> Self {
        Self::InvalidTable(message.into())
    }

    /// Creates a device error.
    pub fn device(message: impl Into<String>) -> Self {
        Self::Device(message.into())
    }

    /// Returns true if this error describes a configuration problem rather
    /// than a failed flash operation.
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::InvalidTable(_) | Self::PartitionNotFound { .. }
        )
    }
}
