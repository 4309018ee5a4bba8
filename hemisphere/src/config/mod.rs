//! Configuration module for the Hemisphere session runtime
//!
//! Runtime tunables (prefetch window, retry policy, storage keys) are loaded
//! from TOML; every field has a default so an empty file is a valid config.

pub mod types;

pub use types::*;
