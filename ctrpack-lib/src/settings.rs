//! Engine settings (output directory, buffer size, key material locations).
//!
//! Settings live in `~/.config/ctrpack/settings.toml`:
//!
//! ```toml
//! output_dir = "/home/user/ctrpack-out"
//! buffer_size = 1048576
//! keyring = "/home/user/.config/ctrpack/keys.toml"
//! tickets_dir = "/home/user/.config/ctrpack/tickets"
//! ```

use std::path::{Path, PathBuf};

use ctrpack_core::{CtrError, Result};
use ctrpack_formats::MEDIA_UNIT;
use serde::Deserialize;

/// Default scratch buffer size: 1 MiB.
pub const DEFAULT_BUFFER_SIZE: usize = 0x10_0000;

/// Canonical path to the settings file: `~/.config/ctrpack/settings.toml`.
pub fn settings_path() -> PathBuf {
    let config = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    config.join("ctrpack").join("settings.toml")
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Where non-in-place results are written.
    pub output_dir: PathBuf,
    /// Scratch buffer size in bytes, a multiple of 0x200.
    pub buffer_size: usize,
    /// Keyring TOML file.
    pub keyring: Option<PathBuf>,
    /// Directory of `.tik` files (and optionally `certs.bin`).
    pub tickets_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("ctrpack-out"),
            buffer_size: DEFAULT_BUFFER_SIZE,
            keyring: None,
            tickets_dir: None,
        }
    }
}

impl Settings {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(contents).map_err(|e| CtrError::format(format!("settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Load the shared settings file, falling back to defaults if it does
    /// not exist.
    pub fn load() -> Result<Self> {
        let path = settings_path();
        if path.exists() {
            log::debug!("Loading settings from {}", path.display());
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 || self.buffer_size as u64 % MEDIA_UNIT != 0 {
            return Err(CtrError::format(format!(
                "settings: buffer_size {} is not a positive multiple of 0x{:X}",
                self.buffer_size, MEDIA_UNIT
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/settings_tests.rs"]
mod tests;
