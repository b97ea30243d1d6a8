//! # polaris-settings
//!
//! Layered configuration for the Polaris message pipeline.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** from [`PolarisSettings::default()`]
//! 2. **User file** at `~/.polaris/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** with `POLARIS_*` overrides (highest priority)
//!
//! The loaded value is passed explicitly to whatever needs it.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
