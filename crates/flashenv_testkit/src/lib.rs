//! # flashenv Testkit
//!
//! Test utilities for flashenv.
//!
//! This crate provides:
//! - Store fixtures over in-memory and file-backed flash
//! - Power-loss simulation that cuts the power at every write unit
//! - Property-based test generators and a reference model
//! - Fuzz testing harnesses
//!
//! ## Usage
//!
//! ```rust,ignore
//! use flashenv_testkit::prelude::*;
//!
//! #[test]
//! fn boot_counter() {
//!     let mut env = TestEnv::new(EnvConfig::new().default_env("boot_times", "0"));
//!     env.set("boot_times", "1").unwrap();
//!     assert_eq!(env.reopen().get("boot_times").unwrap(), b"1");
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod fuzz;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::fuzz::*;
    pub use crate::generators::*;
    pub use flashenv_core::{EnvConfig, EnvError, EnvResult, EnvStore};
}

pub use crash::*;
pub use fixtures::*;
pub use fuzz::*;
pub use generators::*;
