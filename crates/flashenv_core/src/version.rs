//! Environment versioning.
//!
//! The firmware declares the environment version it expects. At init the
//! stored version record is compared against it:
//!
//! - **Missing**: the environment was never initialized; reset to defaults
//! - **Equal**: nothing to do
//! - **Older, auto-update on**: add the defaults that are missing, keep
//!   every existing value, then store the new version
//! - **Anything else**: reset to defaults (downgrades are never migrated)

/// Reserved key holding the environment version as `u32` LE.
pub const VERSION_KEY: &str = "__ver_num__";

/// Whether `key` is reserved for internal use.
#[must_use]
pub fn is_reserved(key: &str) -> bool {
    key == VERSION_KEY
}

/// Encodes a version record value.
#[must_use]
pub fn encode_version(version: u32) -> Vec<u8> {
    version.to_le_bytes().to_vec()
}

/// Decodes a version record value. Values of the wrong width are treated
/// as missing.
#[must_use]
pub fn decode_version(value: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = value.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

/// What init does about the stored version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionAction {
    /// The stored version matches.
    Keep,
    /// Replace the environment with the defaults.
    Reset,
    /// Add missing defaults and store the new version.
    Migrate {
        /// Stored version.
        from: u32,
        /// Configured version.
        to: u32,
    },
}

/// Decides the init action for a stored and a configured version.
#[must_use]
pub fn plan(stored: Option<u32>, configured: u32, auto_update: bool) -> VersionAction {
    match stored {
        None => VersionAction::Reset,
        Some(v) if v == configured => VersionAction::Keep,
        Some(v) if auto_update && v < configured => VersionAction::Migrate {
            from: v,
            to: configured,
        },
        Some(_) => VersionAction::Reset,
    }
}

/// Outcome of init.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitReport {
    /// Version found in flash, if any.
    pub stored_version: Option<u32>,
    /// Version the store now carries.
    pub version: u32,
    /// Action taken.
    pub action: VersionAction,
    /// Default keys added by a migration.
    pub added_keys: Vec<String>,
    /// Flash was unformatted and has been formatted.
    pub formatted: bool,
    /// The active sector ended in unreadable bytes.
    pub torn_tail: bool,
}
