//! # jiral-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`JiralSettings::default()`]
//! 2. **User file** — `~/.jiral/settings.json` or an explicit path
//! 3. **Environment variables** — `JIRAL_*` and `JIRA_*` overrides
//!
//! Command-line flags are applied on top by the binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
