//! # cupid-settings
//!
//! Configuration for the Cupid connection hub, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`CupidSettings::default()`]
//! 2. **Settings file**: `~/.cupid/settings.json` or an explicit path
//! 3. **Environment variables**: `CUPID_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{AuthSettings, CupidSettings, HubSettings, LoggingSettings, ServerSettings};
