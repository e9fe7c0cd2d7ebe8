//! Key material and the 3DS hardware key scrambler.
//!
//! The console never stores NCCH or CIA keys directly: a "normal key" is
//! derived from a per-slot key-X (console secret) and a key-Y (from the
//! content header, a common-key index or a seed). [`Keyring`] holds the
//! secrets the engine cannot derive itself and is usually loaded from a
//! TOML file:
//!
//! ```toml
//! fixed_system_key = "00112233445566778899AABBCCDDEEFF"
//!
//! [key_x]
//! 0x2C = "..."
//! 0x25 = "..."
//!
//! [common_key_y]
//! 0 = "..."
//! 1 = "..."
//!
//! [seeds]
//! 0004000000ABCDEF = "..."
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use ctrpack_core::util::parse_hex;
use ctrpack_core::{CtrError, Result};
use serde::Deserialize;

/// Key slot used for NCCH ExtHeader, ExeFS header and non-code ExeFS files.
pub const NCCH_PRIMARY_SLOT: u8 = 0x2C;

/// Key slot used for ticket title-key decryption.
pub const COMMON_KEY_SLOT: u8 = 0x3D;

/// Number of common key-Y entries addressable from a ticket.
pub const COMMON_KEY_COUNT: u8 = 6;

const SCRAMBLER_C: u128 = 0x1FF9E9AAC5FE0408024591DC5D52768A;

/// 3DS key scrambler: `normal = ror128((rol128(key_x, 2) ^ key_y) + C, 41)`.
pub fn scramble_key(key_x: &[u8; 16], key_y: &[u8; 16]) -> [u8; 16] {
    let x = u128::from_be_bytes(*key_x);
    let y = u128::from_be_bytes(*key_y);
    (x.rotate_left(2) ^ y)
        .wrapping_add(SCRAMBLER_C)
        .rotate_right(41)
        .to_be_bytes()
}

/// Key material supplied by the user.
#[derive(Debug, Clone, Default)]
pub struct Keyring {
    key_x: HashMap<u8, [u8; 16]>,
    common_key_y: HashMap<u8, [u8; 16]>,
    fixed_system_key: Option<[u8; 16]>,
    seeds: HashMap<u64, [u8; 16]>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KeyringFile {
    key_x: BTreeMap<String, String>,
    common_key_y: BTreeMap<String, String>,
    fixed_system_key: Option<String>,
    seeds: BTreeMap<String, String>,
}

fn parse_key(name: &str, value: &str) -> Result<[u8; 16]> {
    parse_hex::<16>(value)
        .ok_or_else(|| CtrError::format(format!("keyring: {} is not a 16-byte hex key", name)))
}

fn parse_slot(name: &str) -> Result<u8> {
    let digits = name.trim_start_matches("0x").trim_start_matches("0X");
    u8::from_str_radix(digits, 16)
        .map_err(|_| CtrError::format(format!("keyring: bad key slot '{}'", name)))
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key_x(mut self, slot: u8, key: [u8; 16]) -> Self {
        self.key_x.insert(slot, key);
        self
    }

    pub fn with_common_key_y(mut self, index: u8, key: [u8; 16]) -> Self {
        self.common_key_y.insert(index, key);
        self
    }

    pub fn with_fixed_system_key(mut self, key: [u8; 16]) -> Self {
        self.fixed_system_key = Some(key);
        self
    }

    pub fn with_seed(mut self, title_id: u64, seed: [u8; 16]) -> Self {
        self.seeds.insert(title_id, seed);
        self
    }

    pub fn key_x(&self, slot: u8) -> Option<&[u8; 16]> {
        self.key_x.get(&slot)
    }

    pub fn seed(&self, title_id: u64) -> Option<&[u8; 16]> {
        self.seeds.get(&title_id)
    }

    pub fn fixed_system_key(&self) -> Option<&[u8; 16]> {
        self.fixed_system_key.as_ref()
    }

    /// Derive the normal key for `slot` from its key-X and the given key-Y.
    pub fn normal_key(&self, slot: u8, key_y: &[u8; 16]) -> Result<[u8; 16]> {
        let key_x = self
            .key_x(slot)
            .ok_or_else(|| CtrError::crypto(format!("key-X for slot 0x{:02X} not available", slot)))?;
        Ok(scramble_key(key_x, key_y))
    }

    /// Normal key used to decrypt ticket title keys with common key `index`.
    pub fn common_key(&self, index: u8) -> Result<[u8; 16]> {
        if index >= COMMON_KEY_COUNT {
            return Err(CtrError::crypto(format!("common key index {} out of range", index)));
        }
        let key_y = self
            .common_key_y
            .get(&index)
            .ok_or_else(|| CtrError::crypto(format!("common key-Y {} not available", index)))?;
        self.normal_key(COMMON_KEY_SLOT, key_y)
    }

    /// Parse a keyring from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: KeyringFile = toml::from_str(contents)
            .map_err(|e| CtrError::format(format!("keyring: {}", e)))?;

        let mut keyring = Keyring::new();
        for (slot, value) in &file.key_x {
            keyring.key_x.insert(parse_slot(slot)?, parse_key(slot, value)?);
        }
        for (index, value) in &file.common_key_y {
            let idx: u8 = index
                .parse()
                .map_err(|_| CtrError::format(format!("keyring: bad common key index '{}'", index)))?;
            keyring.common_key_y.insert(idx, parse_key(index, value)?);
        }
        if let Some(value) = &file.fixed_system_key {
            keyring.fixed_system_key = Some(parse_key("fixed_system_key", value)?);
        }
        for (title_id, value) in &file.seeds {
            let tid = u64::from_str_radix(title_id, 16)
                .map_err(|_| CtrError::format(format!("keyring: bad title id '{}'", title_id)))?;
            keyring.seeds.insert(tid, parse_key(title_id, value)?);
        }

        log::debug!(
            "keyring: {} key-X slot(s), {} common key(s), {} seed(s)",
            keyring.key_x.len(),
            keyring.common_key_y.len(),
            keyring.seeds.len()
        );
        Ok(keyring)
    }

    /// Load a keyring file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}

#[cfg(test)]
#[path = "tests/keys_tests.rs"]
mod tests;
