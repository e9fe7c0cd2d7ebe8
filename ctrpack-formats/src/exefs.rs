//! ExeFS header: a 10-entry file table followed by per-file SHA-256 hashes.

use ctrpack_core::util::{read_ascii, read_hash, read_u32_le};
use ctrpack_core::{CtrError, Result};

pub const EXEFS_HEADER_SIZE: usize = 0x200;
pub const EXEFS_FILE_COUNT: usize = 10;

const HASHES_OFFSET: usize = 0xC0;

/// One used ExeFS file table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExeFsFile {
    pub index: usize,
    pub name: String,
    /// Offset relative to the end of the ExeFS header.
    pub offset: u32,
    pub size: u32,
}

/// Raw ExeFS header with accessors.
#[derive(Debug, Clone)]
pub struct ExeFsHeader {
    raw: [u8; EXEFS_HEADER_SIZE],
}

impl ExeFsHeader {
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < EXEFS_HEADER_SIZE {
            return Err(CtrError::format("ExeFS header truncated"));
        }
        let mut raw = [0u8; EXEFS_HEADER_SIZE];
        raw.copy_from_slice(&buf[..EXEFS_HEADER_SIZE]);
        Ok(Self { raw })
    }

    pub fn raw(&self) -> &[u8; EXEFS_HEADER_SIZE] {
        &self.raw
    }

    fn entry(&self, index: usize) -> &[u8] {
        &self.raw[index * 0x10..index * 0x10 + 0x10]
    }

    /// File table entry `index`, regardless of whether it is used.
    pub fn file(&self, index: usize) -> ExeFsFile {
        let entry = self.entry(index);
        ExeFsFile {
            index,
            name: read_ascii(&entry[..8]),
            offset: read_u32_le(entry, 8),
            size: read_u32_le(entry, 12),
        }
    }

    /// Used entries (non-zero size), in table order.
    pub fn files(&self) -> impl Iterator<Item = ExeFsFile> + '_ {
        (0..EXEFS_FILE_COUNT)
            .map(|i| self.file(i))
            .filter(|f| f.size > 0)
    }

    pub fn find(&self, name: &str) -> Option<ExeFsFile> {
        self.files().find(|f| f.name == name)
    }

    /// Hash of file `index`. The hash table is stored in reverse order.
    pub fn hash(&self, index: usize) -> [u8; 32] {
        read_hash(&self.raw, HASHES_OFFSET + (EXEFS_FILE_COUNT - 1 - index) * 0x20)
    }

    /// Check the file table against an ExeFS of `exefs_size` bytes.
    pub fn validate(&self, exefs_size: u64) -> Result<()> {
        let mut data_end: u64 = 0;
        for i in 0..EXEFS_FILE_COUNT {
            let entry = self.entry(i);
            let file = self.file(i);
            if file.size == 0 {
                let hash_offset = HASHES_OFFSET + (EXEFS_FILE_COUNT - 1 - i) * 0x20;
                if entry.iter().any(|&b| b != 0)
                    || self.raw[hash_offset..hash_offset + 0x20].iter().any(|&b| b != 0)
                {
                    return Err(CtrError::format(format!("ExeFS entry {} unused but not empty", i)));
                }
                continue;
            }
            let name = &entry[..8];
            let name_len = name.iter().position(|&b| b == 0).unwrap_or(8);
            if name_len == 0 || name[..name_len].iter().any(|&b| !(0x20..0x80).contains(&b)) {
                return Err(CtrError::format(format!("ExeFS entry {} has an invalid name", i)));
            }
            if file.offset % 0x200 != 0 {
                return Err(CtrError::format(format!("ExeFS file '{}' misaligned", file.name)));
            }
            if (file.offset as u64) < data_end {
                return Err(CtrError::format(format!("ExeFS file '{}' overlaps", file.name)));
            }
            data_end = file.offset as u64 + file.size as u64;
        }
        if data_end + EXEFS_HEADER_SIZE as u64 > exefs_size {
            return Err(CtrError::format(format!(
                "ExeFS files end at 0x{:X}, ExeFS size is 0x{:X}",
                data_end + EXEFS_HEADER_SIZE as u64,
                exefs_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/exefs_tests.rs"]
mod tests;
