//! NCCH partition header parsing and the crypto flag model.

use std::io::SeekFrom;

use ctrpack_core::util::{read_ascii, read_hash, read_u16_le, read_u32_le, read_u64_le};
use ctrpack_core::{CtrError, ReadSeek, Result};

use crate::exefs::{EXEFS_HEADER_SIZE, ExeFsHeader};
use crate::keys::Keyring;
use crate::ncch_crypto::NcchCipher;
use crate::{MAX_MEDIA_UNIT_EXPONENT, MEDIA_UNIT, NCCH_MAGIC};

pub const NCCH_HEADER_SIZE: usize = 0x200;

/// The extended header directly follows the NCCH header.
pub const NCCH_EXHEADER_OFFSET: u64 = 0x200;

/// Hashed part of the extended header (the size stored in the header).
pub const NCCH_EXHEADER_SIZE: u64 = 0x400;

/// Extended header plus access descriptor; the whole span is encrypted.
pub const NCCH_EXHEADER_FULL_SIZE: u64 = 0x800;

// flags[7] option bits
pub const FLAG_FIXED_KEY: u8 = 0x01;
pub const FLAG_NO_CRYPTO: u8 = 0x04;
pub const FLAG_SEED: u8 = 0x20;

// ---------------------------------------------------------------------------
// Crypto model
// ---------------------------------------------------------------------------

/// Secondary key selection from NCCH flags[3].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoMethod {
    /// 0x00, original (secondary key = primary key)
    Original,
    /// 0x01, firmware 7.0
    Secure2,
    /// 0x0A, New 3DS 9.3
    Secure3,
    /// 0x0B, New 3DS 9.6
    Secure4,
}

impl CryptoMethod {
    pub fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            0x00 => Some(Self::Original),
            0x01 => Some(Self::Secure2),
            0x0A => Some(Self::Secure3),
            0x0B => Some(Self::Secure4),
            _ => None,
        }
    }

    pub fn flag(self) -> u8 {
        match self {
            Self::Original => 0x00,
            Self::Secure2 => 0x01,
            Self::Secure3 => 0x0A,
            Self::Secure4 => 0x0B,
        }
    }

    /// Key-X slot of the secondary key.
    pub fn key_slot(self) -> u8 {
        match self {
            Self::Original => 0x2C,
            Self::Secure2 => 0x25,
            Self::Secure3 => 0x18,
            Self::Secure4 => 0x1B,
        }
    }
}

/// How an NCCH is (or should be) encrypted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NcchCrypto {
    None,
    Standard(CryptoMethod),
    /// Zero key, or the fixed system key for system titles.
    FixedKey,
    /// Secondary key-Y derived from a per-title seed.
    Seed(CryptoMethod),
}

impl NcchCrypto {
    pub fn is_encrypted(self) -> bool {
        self != Self::None
    }
}

// ---------------------------------------------------------------------------
// NCCH header
// ---------------------------------------------------------------------------

/// NCCH header, raw bytes plus parsed fields. Offsets and sizes of regions
/// are in media units relative to the start of the NCCH.
#[derive(Debug, Clone)]
pub struct NcchHeader {
    raw: [u8; NCCH_HEADER_SIZE],
    /// First 16 bytes of the signature.
    pub key_y: [u8; 16],
    pub content_size_mu: u32,
    pub partition_id: u64,
    pub seed_check: [u8; 4],
    pub ncch_version: u16,
    pub program_id: u64,
    pub product_code: String,
    pub exheader_hash: [u8; 32],
    pub exheader_size: u32,
    pub flags: [u8; 8],
    pub plain_offset_mu: u32,
    pub plain_size_mu: u32,
    pub logo_offset_mu: u32,
    pub logo_size_mu: u32,
    pub exefs_offset_mu: u32,
    pub exefs_size_mu: u32,
    pub exefs_hash_size_mu: u32,
    pub romfs_offset_mu: u32,
    pub romfs_size_mu: u32,
    pub romfs_hash_size_mu: u32,
    pub exefs_hash: [u8; 32],
    pub romfs_hash: [u8; 32],
}

impl NcchHeader {
    /// Parse and validate an NCCH header from its 0x200 raw bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < NCCH_HEADER_SIZE {
            return Err(CtrError::format("NCCH header truncated"));
        }
        if buf[0x100..0x104] != NCCH_MAGIC {
            return Err(CtrError::format("Missing NCCH magic at 0x100"));
        }

        let mut raw = [0u8; NCCH_HEADER_SIZE];
        raw.copy_from_slice(&buf[..NCCH_HEADER_SIZE]);

        let mut key_y = [0u8; 16];
        key_y.copy_from_slice(&raw[0x000..0x010]);
        let mut seed_check = [0u8; 4];
        seed_check.copy_from_slice(&raw[0x114..0x118]);
        let mut flags = [0u8; 8];
        flags.copy_from_slice(&raw[0x188..0x190]);

        let header = Self {
            key_y,
            content_size_mu: read_u32_le(&raw, 0x104),
            partition_id: read_u64_le(&raw, 0x108),
            seed_check,
            ncch_version: read_u16_le(&raw, 0x112),
            program_id: read_u64_le(&raw, 0x118),
            product_code: read_ascii(&raw[0x150..0x160]),
            exheader_hash: read_hash(&raw, 0x160),
            exheader_size: read_u32_le(&raw, 0x180),
            flags,
            plain_offset_mu: read_u32_le(&raw, 0x190),
            plain_size_mu: read_u32_le(&raw, 0x194),
            logo_offset_mu: read_u32_le(&raw, 0x198),
            logo_size_mu: read_u32_le(&raw, 0x19C),
            exefs_offset_mu: read_u32_le(&raw, 0x1A0),
            exefs_size_mu: read_u32_le(&raw, 0x1A4),
            exefs_hash_size_mu: read_u32_le(&raw, 0x1A8),
            romfs_offset_mu: read_u32_le(&raw, 0x1B0),
            romfs_size_mu: read_u32_le(&raw, 0x1B4),
            romfs_hash_size_mu: read_u32_le(&raw, 0x1B8),
            exefs_hash: read_hash(&raw, 0x1C0),
            romfs_hash: read_hash(&raw, 0x1E0),
            raw,
        };
        header.validate()?;
        Ok(header)
    }

    /// Read the header at the reader's cursor.
    pub fn read(reader: &mut dyn ReadSeek) -> Result<Self> {
        let mut buf = [0u8; NCCH_HEADER_SIZE];
        reader
            .read_exact(&mut buf)
            .map_err(|e| CtrError::from_read(e, "NCCH header"))?;
        Self::from_bytes(&buf)
    }

    fn validate(&self) -> Result<()> {
        if self.flags[6] > MAX_MEDIA_UNIT_EXPONENT {
            return Err(CtrError::format(format!(
                "NCCH media unit exponent {} unsupported",
                self.flags[6]
            )));
        }
        if self.exheader_size != 0 && self.exheader_size as u64 != NCCH_EXHEADER_SIZE {
            return Err(CtrError::format(format!(
                "NCCH extended header size 0x{:X} unsupported",
                self.exheader_size
            )));
        }
        if self.exefs_hash_size_mu > self.exefs_size_mu || self.romfs_hash_size_mu > self.romfs_size_mu {
            return Err(CtrError::format("NCCH hash region larger than its region"));
        }

        let unit = self.media_unit();
        let mut end = if self.exheader_size > 0 {
            (NCCH_EXHEADER_OFFSET + NCCH_EXHEADER_FULL_SIZE) / unit
        } else {
            1
        };
        let regions = [
            ("logo", self.logo_offset_mu, self.logo_size_mu),
            ("plain", self.plain_offset_mu, self.plain_size_mu),
            ("ExeFS", self.exefs_offset_mu, self.exefs_size_mu),
            ("RomFS", self.romfs_offset_mu, self.romfs_size_mu),
        ];
        for (name, offset, size) in regions {
            if size == 0 {
                continue;
            }
            if (offset as u64) < end {
                return Err(CtrError::format(format!("NCCH {} region overlaps preceding data", name)));
            }
            end = offset as u64 + size as u64;
        }
        if end > self.content_size_mu as u64 {
            return Err(CtrError::format(format!(
                "NCCH regions end at 0x{:X} units, content size is 0x{:X}",
                end, self.content_size_mu
            )));
        }
        Ok(())
    }

    /// The header exactly as stored.
    pub fn raw(&self) -> &[u8; NCCH_HEADER_SIZE] {
        &self.raw
    }

    pub fn media_unit(&self) -> u64 {
        MEDIA_UNIT << self.flags[6]
    }

    pub fn content_size(&self) -> u64 {
        self.content_size_mu as u64 * self.media_unit()
    }

    pub fn has_exheader(&self) -> bool {
        self.exheader_size > 0
    }

    pub fn exefs_offset(&self) -> u64 {
        self.exefs_offset_mu as u64 * self.media_unit()
    }

    pub fn exefs_size(&self) -> u64 {
        self.exefs_size_mu as u64 * self.media_unit()
    }

    pub fn exefs_hash_size(&self) -> u64 {
        self.exefs_hash_size_mu as u64 * self.media_unit()
    }

    pub fn romfs_offset(&self) -> u64 {
        self.romfs_offset_mu as u64 * self.media_unit()
    }

    pub fn romfs_size(&self) -> u64 {
        self.romfs_size_mu as u64 * self.media_unit()
    }

    pub fn romfs_hash_size(&self) -> u64 {
        self.romfs_hash_size_mu as u64 * self.media_unit()
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags[7] & FLAG_NO_CRYPTO == 0
    }

    /// Decode the crypto flags.
    pub fn crypto(&self) -> Result<NcchCrypto> {
        let options = self.flags[7];
        if options & FLAG_NO_CRYPTO != 0 {
            return Ok(NcchCrypto::None);
        }
        if options & FLAG_FIXED_KEY != 0 {
            return Ok(NcchCrypto::FixedKey);
        }
        let method = CryptoMethod::from_flag(self.flags[3]).ok_or_else(|| {
            CtrError::crypto(format!("unknown NCCH crypto method 0x{:02X}", self.flags[3]))
        })?;
        if options & FLAG_SEED != 0 {
            Ok(NcchCrypto::Seed(method))
        } else {
            Ok(NcchCrypto::Standard(method))
        }
    }

    /// Copy of this header with its crypto flags rewritten for `crypto`.
    /// Everything else, including the signature and key-Y, is kept.
    pub fn with_crypto(&self, crypto: NcchCrypto) -> Self {
        let mut flags = self.flags;
        match crypto {
            NcchCrypto::None => {
                flags[7] = (flags[7] | FLAG_NO_CRYPTO) & !(FLAG_FIXED_KEY | FLAG_SEED);
                flags[3] = 0;
            }
            NcchCrypto::Standard(method) => {
                flags[7] &= !(FLAG_NO_CRYPTO | FLAG_FIXED_KEY | FLAG_SEED);
                flags[3] = method.flag();
            }
            NcchCrypto::FixedKey => {
                flags[7] = (flags[7] | FLAG_FIXED_KEY) & !(FLAG_NO_CRYPTO | FLAG_SEED);
                flags[3] = 0;
            }
            NcchCrypto::Seed(method) => {
                flags[7] = (flags[7] | FLAG_SEED) & !(FLAG_NO_CRYPTO | FLAG_FIXED_KEY);
                flags[3] = method.flag();
            }
        }
        let mut header = self.clone();
        header.flags = flags;
        header.raw[0x188..0x190].copy_from_slice(&flags);
        header
    }
}

/// Read the NCCH header at the reader's cursor and, if `with_exefs` is set
/// and the NCCH has an ExeFS, its decrypted and validated ExeFS header.
pub fn read_ncch_headers(
    reader: &mut dyn ReadSeek,
    keyring: &Keyring,
    with_exefs: bool,
) -> Result<(NcchHeader, Option<ExeFsHeader>)> {
    let ncch_offset = reader.stream_position()?;
    let header = NcchHeader::read(reader)?;
    if !with_exefs || header.exefs_size_mu == 0 {
        return Ok((header, None));
    }

    reader.seek(SeekFrom::Start(ncch_offset + header.exefs_offset()))?;
    let mut buf = [0u8; EXEFS_HEADER_SIZE];
    reader
        .read_exact(&mut buf)
        .map_err(|e| CtrError::from_read(e, "ExeFS header"))?;
    if let Some(cipher) = NcchCipher::new(&header, header.crypto()?, None, keyring)? {
        cipher.apply(&mut buf, header.exefs_offset())?;
    }

    let exefs = ExeFsHeader::from_bytes(&buf)?;
    exefs.validate(header.exefs_size())?;
    log::debug!(
        "NCCH {:016X} at 0x{:X}: {} ExeFS file(s)",
        header.program_id,
        ncch_offset,
        exefs.files().count()
    );
    Ok((header, Some(exefs)))
}

#[cfg(test)]
#[path = "tests/ncch_tests.rs"]
mod tests;
