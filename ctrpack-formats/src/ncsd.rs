//! NCSD (CCI) header: the partition table of a game card image.

use ctrpack_core::util::{is_all_zeros, read_u32_le, read_u64_le};
use ctrpack_core::{CtrError, ReadSeek, Result};

use crate::{MAX_MEDIA_UNIT_EXPONENT, MEDIA_UNIT, NCSD_MAGIC};

pub const NCSD_HEADER_SIZE: usize = 0x200;
pub const NCSD_PARTITION_COUNT: usize = 8;

/// The first partition never starts before the card info area.
const MIN_PARTITION0_OFFSET: u64 = 0x4000;

// ---------------------------------------------------------------------------
// Partition table
// ---------------------------------------------------------------------------

/// One partition table entry, in media units. A zero size marks an absent
/// partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NcchPartition {
    pub offset_mu: u32,
    pub size_mu: u32,
}

impl NcchPartition {
    pub fn is_present(&self) -> bool {
        self.size_mu != 0
    }
}

/// Parsed NCSD header.
#[derive(Debug, Clone)]
pub struct NcsdHeader {
    pub image_size_mu: u32,
    pub media_id: u64,
    pub partitions: [NcchPartition; NCSD_PARTITION_COUNT],
    /// Partition flags at 0x188; `flags[6]` is the media unit exponent.
    pub flags: [u8; 8],
}

impl NcsdHeader {
    /// Parse and validate the first 0x200 bytes of an NCSD image.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < NCSD_HEADER_SIZE {
            return Err(CtrError::format("NCSD header truncated"));
        }
        if buf[0x100..0x104] != NCSD_MAGIC {
            return Err(CtrError::format("Missing NCSD magic at 0x100"));
        }
        // NAND images share the magic but carry filesystem types here
        if !is_all_zeros(&buf[0x110..0x118]) {
            return Err(CtrError::format("NCSD partition fs types set, not a card image"));
        }

        let mut partitions = [NcchPartition::default(); NCSD_PARTITION_COUNT];
        for (i, p) in partitions.iter_mut().enumerate() {
            let base = 0x120 + i * 8;
            p.offset_mu = read_u32_le(buf, base);
            p.size_mu = read_u32_le(buf, base + 4);
        }
        let mut flags = [0u8; 8];
        flags.copy_from_slice(&buf[0x188..0x190]);

        let header = Self {
            image_size_mu: read_u32_le(buf, 0x104),
            media_id: read_u64_le(buf, 0x108),
            partitions,
            flags,
        };
        header.validate()?;
        Ok(header)
    }

    /// Read the header at the reader's cursor.
    pub fn read(reader: &mut dyn ReadSeek) -> Result<Self> {
        let mut buf = [0u8; NCSD_HEADER_SIZE];
        reader
            .read_exact(&mut buf)
            .map_err(|e| CtrError::from_read(e, "NCSD header"))?;
        Self::from_bytes(&buf)
    }

    fn validate(&self) -> Result<()> {
        if self.flags[6] > MAX_MEDIA_UNIT_EXPONENT {
            return Err(CtrError::format(format!(
                "NCSD media unit exponent {} unsupported",
                self.flags[6]
            )));
        }
        let first = self.partitions[0];
        if !first.is_present() {
            return Err(CtrError::format("NCSD partition 0 has zero size"));
        }
        if first.offset_mu as u64 * self.media_unit() < MIN_PARTITION0_OFFSET {
            return Err(CtrError::format(format!(
                "NCSD partition 0 starts at 0x{:X}, before 0x{:X}",
                first.offset_mu as u64 * self.media_unit(),
                MIN_PARTITION0_OFFSET
            )));
        }

        let mut data_units: u64 = 0;
        for (i, p) in self.partitions.iter().enumerate() {
            if p.offset_mu == 0 && p.size_mu == 0 {
                continue;
            }
            if (p.offset_mu as u64) < data_units {
                return Err(CtrError::format(format!("NCSD partition {} overlaps its predecessor", i)));
            }
            data_units = p.offset_mu as u64 + p.size_mu as u64;
        }
        if data_units > self.image_size_mu as u64 {
            return Err(CtrError::format(format!(
                "NCSD partitions end at 0x{:X} units, image size is 0x{:X}",
                data_units, self.image_size_mu
            )));
        }
        Ok(())
    }

    pub fn media_unit(&self) -> u64 {
        MEDIA_UNIT << self.flags[6]
    }

    pub fn image_size(&self) -> u64 {
        self.image_size_mu as u64 * self.media_unit()
    }

    /// Byte offset of partition `index`.
    pub fn partition_offset(&self, index: usize) -> u64 {
        self.partitions[index].offset_mu as u64 * self.media_unit()
    }

    /// Byte size of partition `index`.
    pub fn partition_size(&self, index: usize) -> u64 {
        self.partitions[index].size_mu as u64 * self.media_unit()
    }

    /// Present partitions as `(index, byte offset, byte size)`.
    pub fn present_partitions(&self) -> impl Iterator<Item = (usize, u64, u64)> + '_ {
        (0..NCSD_PARTITION_COUNT)
            .filter(|&i| self.partitions[i].is_present())
            .map(|i| (i, self.partition_offset(i), self.partition_size(i)))
    }

    /// Byte extent of the partition data, i.e. the end of the last partition.
    pub fn data_end(&self) -> u64 {
        self.present_partitions()
            .map(|(_, offset, size)| offset + size)
            .max()
            .unwrap_or(0)
    }

    /// Reject partition tables that reach beyond the readable file length.
    pub fn check_bounds(&self, file_len: u64) -> Result<()> {
        for (i, offset, size) in self.present_partitions() {
            if offset + size > file_len {
                return Err(CtrError::format(format!(
                    "NCSD partition {} ({:08X}@{:08X}) beyond end of file (0x{:X})",
                    i, size, offset, file_len
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/ncsd_tests.rs"]
mod tests;
