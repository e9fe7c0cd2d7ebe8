//! Title metadata (TMD): signed title header plus the content chunk table.

use std::io::Read;

use ctrpack_core::util::{read_hash, read_u16_be, read_u32_be, read_u64_be, write_u16_be, write_u64_be};
use ctrpack_core::{CtrError, ReadSeek, Result};
use sha2::{Digest, Sha256};

/// RSA-2048 / SHA-256 signature type.
pub const TMD_SIG_TYPE: [u8; 4] = [0x00, 0x01, 0x00, 0x04];

/// Contents processed per title; larger declared counts are clamped.
pub const CIA_MAX_CONTENTS: usize = 101;

pub const TMD_CHUNK_SIZE: usize = 0x30;

const CONTENT_COUNT_OFFSET: usize = 0x1DE;
const INFO_HASH_OFFSET: usize = 0x1E4;
const INFO_RECORDS_OFFSET: usize = 0x204;
const INFO_RECORD_SIZE: usize = 0x24;
const INFO_RECORD_COUNT: usize = 64;

/// Size of the TMD without any content chunks.
pub const TMD_SIZE_MIN: usize = INFO_RECORDS_OFFSET + INFO_RECORD_SIZE * INFO_RECORD_COUNT;

pub const TMD_SIZE_MAX: usize = tmd_size(CIA_MAX_CONTENTS);

/// Size of a TMD holding `count` content chunks.
pub const fn tmd_size(count: usize) -> usize {
    TMD_SIZE_MIN + TMD_CHUNK_SIZE * count
}

// ---------------------------------------------------------------------------
// Content chunk
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmdContentChunk {
    pub id: u32,
    pub index: u16,
    pub content_type: u16,
    pub size: u64,
    pub hash: [u8; 32],
}

impl TmdContentChunk {
    pub const FLAG_ENCRYPTED: u16 = 0x0001;

    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            id: read_u32_be(buf, 0x00),
            index: read_u16_be(buf, 0x04),
            content_type: read_u16_be(buf, 0x06),
            size: read_u64_be(buf, 0x08),
            hash: read_hash(buf, 0x10),
        }
    }

    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0x00..0x04].copy_from_slice(&self.id.to_be_bytes());
        write_u16_be(buf, 0x04, self.index);
        write_u16_be(buf, 0x06, self.content_type);
        write_u64_be(buf, 0x08, self.size);
        buf[0x10..0x30].copy_from_slice(&self.hash);
    }

    pub fn is_encrypted(&self) -> bool {
        self.content_type & Self::FLAG_ENCRYPTED != 0
    }

    pub fn set_encrypted(&mut self, encrypted: bool) {
        if encrypted {
            self.content_type |= Self::FLAG_ENCRYPTED;
        } else {
            self.content_type &= !Self::FLAG_ENCRYPTED;
        }
    }

    /// File name of the content next to its TMD.
    pub fn app_name(&self) -> String {
        format!("{:08x}.app", self.id)
    }
}

// ---------------------------------------------------------------------------
// TMD
// ---------------------------------------------------------------------------

/// A TMD: raw header bytes plus the (clamped) content chunk table.
#[derive(Debug, Clone)]
pub struct TitleMetaData {
    header: Vec<u8>,
    declared_count: u16,
    chunks: Vec<TmdContentChunk>,
}

impl TitleMetaData {
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < TMD_SIZE_MIN {
            return Err(CtrError::format("TMD truncated"));
        }
        if buf[..4] != TMD_SIG_TYPE {
            return Err(CtrError::format(format!(
                "Unsupported TMD signature type {:02X}{:02X}{:02X}{:02X}",
                buf[0], buf[1], buf[2], buf[3]
            )));
        }

        let declared_count = read_u16_be(buf, CONTENT_COUNT_OFFSET);
        let count = (declared_count as usize).min(CIA_MAX_CONTENTS);
        if count < declared_count as usize {
            log::warn!(
                "TMD declares {} contents, processing the first {}",
                declared_count,
                CIA_MAX_CONTENTS
            );
        }
        if buf.len() < tmd_size(count) {
            return Err(CtrError::format(format!(
                "TMD holds 0x{:X} bytes, {} contents need 0x{:X}",
                buf.len(),
                count,
                tmd_size(count)
            )));
        }

        let chunks = buf[TMD_SIZE_MIN..tmd_size(count)]
            .chunks_exact(TMD_CHUNK_SIZE)
            .map(TmdContentChunk::from_bytes)
            .collect();
        Ok(Self {
            header: buf[..TMD_SIZE_MIN].to_vec(),
            declared_count,
            chunks,
        })
    }

    /// Read a TMD from the reader's cursor (a TMD file or the TMD section of
    /// a CIA). Reads at most [`TMD_SIZE_MAX`] bytes.
    pub fn read(reader: &mut dyn ReadSeek) -> Result<Self> {
        let mut buf = Vec::with_capacity(TMD_SIZE_MAX);
        reader.take(TMD_SIZE_MAX as u64).read_to_end(&mut buf)?;
        Self::from_bytes(&buf)
    }

    pub fn title_id(&self) -> u64 {
        read_u64_be(&self.header, 0x18C)
    }

    pub fn title_version(&self) -> u16 {
        read_u16_be(&self.header, 0x1DC)
    }

    /// Content count as stored, before clamping.
    pub fn declared_content_count(&self) -> u16 {
        self.declared_count
    }

    pub fn chunks(&self) -> &[TmdContentChunk] {
        &self.chunks
    }

    pub fn chunks_mut(&mut self) -> &mut [TmdContentChunk] {
        &mut self.chunks
    }

    pub fn content_info_hash(&self) -> [u8; 32] {
        read_hash(&self.header, INFO_HASH_OFFSET)
    }

    /// Serialized size (header plus processed chunks).
    pub fn size(&self) -> usize {
        tmd_size(self.chunks.len())
    }

    /// Recompute the content-info record hashes over the chunk table and
    /// the content-info hash over the records.
    ///
    /// Records are visited until they cover every chunk. A record with a
    /// zero command count gets the hash of an empty range.
    pub fn fix_hashes(&mut self) {
        let table = self.chunk_table();
        let mut done = 0usize;
        for i in 0..INFO_RECORD_COUNT {
            if done >= self.chunks.len() {
                break;
            }
            let record = INFO_RECORDS_OFFSET + i * INFO_RECORD_SIZE;
            let cmd_count = read_u16_be(&self.header, record + 2) as usize;
            let end = (done + cmd_count).min(self.chunks.len());
            let digest = Sha256::digest(&table[done * TMD_CHUNK_SIZE..end * TMD_CHUNK_SIZE]);
            self.header[record + 4..record + INFO_RECORD_SIZE].copy_from_slice(&digest);
            done = end;
        }
        let digest = Sha256::digest(&self.header[INFO_RECORDS_OFFSET..TMD_SIZE_MIN]);
        self.header[INFO_HASH_OFFSET..INFO_HASH_OFFSET + 32].copy_from_slice(&digest);
    }

    fn chunk_table(&self) -> Vec<u8> {
        let mut table = vec![0u8; self.chunks.len() * TMD_CHUNK_SIZE];
        for (chunk, out) in self.chunks.iter().zip(table.chunks_exact_mut(TMD_CHUNK_SIZE)) {
            chunk.write_to(out);
        }
        table
    }

    /// Serialize; the stored content count is the processed (clamped) one.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.header.clone();
        write_u16_be(&mut out, CONTENT_COUNT_OFFSET, self.chunks.len() as u16);
        out.extend_from_slice(&self.chunk_table());
        out
    }
}

#[cfg(test)]
#[path = "tests/tmd_tests.rs"]
mod tests;
