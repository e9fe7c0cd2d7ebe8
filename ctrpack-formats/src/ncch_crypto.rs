//! NCCH region encryption (AES-128-CTR).
//!
//! An NCCH uses up to two normal keys: the primary key (slot 0x2C) for the
//! extended header, the ExeFS header and every ExeFS file except `.code`,
//! and the secondary key (selected by the crypto method) for `.code` and the
//! RomFS. Each region has its own counter, and any byte range can be
//! processed independently by seeking the keystream.

use std::ops::Range;

use ctrpack_core::{CtrError, Result};
use sha2::{Digest, Sha256};

use crate::crypto::ctr_apply;
use crate::exefs::{EXEFS_HEADER_SIZE, ExeFsHeader};
use crate::keys::{Keyring, NCCH_PRIMARY_SLOT};
use crate::ncch::{NCCH_EXHEADER_FULL_SIZE, NCCH_EXHEADER_OFFSET, NcchCrypto, NcchHeader};
use crate::MEDIA_UNIT;

const SECTION_EXHEADER: u8 = 1;
const SECTION_EXEFS: u8 = 2;
const SECTION_ROMFS: u8 = 3;

/// Program ids with this bit set are system titles.
const SYSTEM_TITLE_BIT: u64 = 0x10 << 32;

/// Initial counter of an NCCH section.
fn section_counter(header: &NcchHeader, section: u8, region_offset: u64) -> [u8; 16] {
    let mut ctr = [0u8; 16];
    if header.ncch_version == 1 {
        ctr[..8].copy_from_slice(&header.partition_id.to_le_bytes());
        ctr[12..].copy_from_slice(&(region_offset as u32).to_be_bytes());
    } else {
        ctr[..8].copy_from_slice(&header.partition_id.to_be_bytes());
        ctr[8] = section;
    }
    ctr
}

/// XOR the part of `buf` (which starts at `buf_offset`) that falls inside
/// `region` with the keystream whose byte 0 sits at `stream_base`.
fn xor_region(
    buf: &mut [u8],
    buf_offset: u64,
    region: Range<u64>,
    stream_base: u64,
    key: &[u8; 16],
    counter: &[u8; 16],
) {
    let lo = region.start.max(buf_offset);
    let hi = region.end.min(buf_offset + buf.len() as u64);
    if lo >= hi {
        return;
    }
    let slice = &mut buf[(lo - buf_offset) as usize..(hi - buf_offset) as usize];
    ctr_apply(key, counter, lo - stream_base, slice);
}

fn seed_key_y(header: &NcchHeader, keyring: &Keyring) -> Result<[u8; 16]> {
    let seed = keyring.seed(header.program_id).ok_or_else(|| {
        CtrError::crypto(format!("seed for {:016X} not available", header.program_id))
    })?;

    let mut check = Sha256::new();
    check.update(seed);
    check.update(header.program_id.to_le_bytes());
    if check.finalize()[..4] != header.seed_check {
        return Err(CtrError::crypto(format!(
            "seed for {:016X} does not match the NCCH seed check",
            header.program_id
        )));
    }

    let mut hasher = Sha256::new();
    hasher.update(header.key_y);
    hasher.update(seed);
    let digest = hasher.finalize();
    let mut key_y = [0u8; 16];
    key_y.copy_from_slice(&digest[..16]);
    Ok(key_y)
}

fn fixed_key(header: &NcchHeader, keyring: &Keyring) -> Result<[u8; 16]> {
    if header.program_id & SYSTEM_TITLE_BIT != 0 {
        keyring
            .fixed_system_key()
            .copied()
            .ok_or_else(|| CtrError::crypto("fixed system key not available"))
    } else {
        Ok([0u8; 16])
    }
}

/// Keys, counters and region layout for one NCCH under one crypto setting.
#[derive(Clone)]
pub struct NcchCipher {
    key0: [u8; 16],
    key1: [u8; 16],
    exheader: Option<Range<u64>>,
    exefs: Option<Range<u64>>,
    romfs: Option<Range<u64>>,
    ctr_exheader: [u8; 16],
    ctr_exefs: [u8; 16],
    ctr_romfs: [u8; 16],
    exefs_known: bool,
    code: Option<Range<u64>>,
}

impl NcchCipher {
    /// Set up the cipher for `header`'s layout encrypted as `crypto`
    /// (which need not be the header's own crypto). Returns `None` for
    /// [`NcchCrypto::None`].
    pub fn new(
        header: &NcchHeader,
        crypto: NcchCrypto,
        exefs: Option<&ExeFsHeader>,
        keyring: &Keyring,
    ) -> Result<Option<Self>> {
        let (key0, key1) = match crypto {
            NcchCrypto::None => return Ok(None),
            NcchCrypto::FixedKey => {
                let key = fixed_key(header, keyring)?;
                (key, key)
            }
            NcchCrypto::Standard(method) => (
                keyring.normal_key(NCCH_PRIMARY_SLOT, &header.key_y)?,
                keyring.normal_key(method.key_slot(), &header.key_y)?,
            ),
            NcchCrypto::Seed(method) => {
                let key_y1 = seed_key_y(header, keyring)?;
                (
                    keyring.normal_key(NCCH_PRIMARY_SLOT, &header.key_y)?,
                    keyring.normal_key(method.key_slot(), &key_y1)?,
                )
            }
        };

        let exheader = header
            .has_exheader()
            .then(|| NCCH_EXHEADER_OFFSET..NCCH_EXHEADER_OFFSET + NCCH_EXHEADER_FULL_SIZE);
        let exefs_range =
            (header.exefs_size_mu > 0).then(|| header.exefs_offset()..header.exefs_offset() + header.exefs_size());
        let romfs =
            (header.romfs_size_mu > 0).then(|| header.romfs_offset()..header.romfs_offset() + header.romfs_size());

        let mut cipher = Self {
            key0,
            key1,
            exheader,
            exefs: exefs_range,
            romfs,
            ctr_exheader: section_counter(header, SECTION_EXHEADER, NCCH_EXHEADER_OFFSET),
            ctr_exefs: section_counter(header, SECTION_EXEFS, header.exefs_offset()),
            ctr_romfs: section_counter(header, SECTION_ROMFS, header.romfs_offset()),
            exefs_known: false,
            code: None,
        };
        if let Some(exefs) = exefs {
            cipher.set_exefs(exefs);
        }
        Ok(Some(cipher))
    }

    /// Record the ExeFS file table so `.code` can get the secondary key.
    pub fn set_exefs(&mut self, exefs: &ExeFsHeader) {
        self.exefs_known = true;
        self.code = match (&self.exefs, exefs.find(".code")) {
            (Some(region), Some(code)) => {
                let start = region.start + EXEFS_HEADER_SIZE as u64 + code.offset as u64;
                let size = (code.size as u64).div_ceil(MEDIA_UNIT) * MEDIA_UNIT;
                Some(start.min(region.end)..(start + size).min(region.end))
            }
            _ => None,
        };
    }

    pub fn uses_single_key(&self) -> bool {
        self.key0 == self.key1
    }

    /// Encrypt or decrypt `buf`, which holds NCCH bytes starting at
    /// `offset` (relative to the NCCH start). Bytes outside the encrypted
    /// regions are left untouched.
    pub fn apply(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        if let Some(region) = &self.exheader {
            xor_region(buf, offset, region.clone(), region.start, &self.key0, &self.ctr_exheader);
        }
        if let Some(region) = &self.exefs {
            self.apply_exefs(buf, offset, region.clone())?;
        }
        if let Some(region) = &self.romfs {
            xor_region(buf, offset, region.clone(), region.start, &self.key1, &self.ctr_romfs);
        }
        Ok(())
    }

    fn apply_exefs(&self, buf: &mut [u8], offset: u64, region: Range<u64>) -> Result<()> {
        let end = offset + buf.len() as u64;
        let header_end = region.start + EXEFS_HEADER_SIZE as u64;
        if !self.exefs_known && !self.uses_single_key() && offset < region.end && end > header_end {
            return Err(CtrError::crypto(
                "ExeFS file table unknown, cannot select the .code key",
            ));
        }

        let base = region.start;
        match &self.code {
            Some(code) if !self.uses_single_key() => {
                xor_region(buf, offset, base..code.start, base, &self.key0, &self.ctr_exefs);
                xor_region(buf, offset, code.clone(), base, &self.key1, &self.ctr_exefs);
                xor_region(buf, offset, code.end..region.end, base, &self.key0, &self.ctr_exefs);
            }
            _ => xor_region(buf, offset, region, base, &self.key0, &self.ctr_exefs),
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/ncch_crypto_tests.rs"]
mod tests;
