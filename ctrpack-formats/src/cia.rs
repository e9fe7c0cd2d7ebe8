//! CIA (installable archive) layout: header, stub and meta block.
//!
//! A CIA is a sequence of 64-byte aligned sections:
//! header, certificate chain, ticket, TMD, contents and an optional meta
//! block. Everything before the contents is the "stub".

use std::io::SeekFrom;

use ctrpack_core::util::{align64, read_u16_le, read_u32_le, read_u64_le, write_u32_le, write_u64_le};
use ctrpack_core::{CtrError, ReadSeek, Result};

use crate::ticket::{TICKET_SIZE, Ticket};
use crate::tmd::{TMD_SIZE_MAX, TMD_SIZE_MIN, TitleMetaData};

pub const CIA_HEADER_SIZE: u32 = 0x2020;
pub const CIA_CERT_SIZE: u32 = 0xA00;
pub const CIA_META_SIZE: u32 = 0x3AC0;
/// Largest total content size a CIA header may declare.
pub const CIA_CONTENT_SIZE_MAX: u64 = 1 << 48;

const CONTENT_INDEX_OFFSET: usize = 0x20;
const CONTENT_INDEX_SIZE: usize = 0x2000;

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiaHeader {
    pub header_size: u32,
    pub cia_type: u16,
    pub version: u16,
    pub cert_size: u32,
    pub ticket_size: u32,
    pub tmd_size: u32,
    pub meta_size: u32,
    pub content_size: u64,
    content_index: Vec<u8>,
}

impl Default for CiaHeader {
    fn default() -> Self {
        Self::new()
    }
}

impl CiaHeader {
    /// Header for a new CIA; TMD and content fields are filled in later.
    pub fn new() -> Self {
        Self {
            header_size: CIA_HEADER_SIZE,
            cia_type: 0,
            version: 0,
            cert_size: CIA_CERT_SIZE,
            ticket_size: TICKET_SIZE as u32,
            tmd_size: 0,
            meta_size: 0,
            content_size: 0,
            content_index: vec![0u8; CONTENT_INDEX_SIZE],
        }
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < CIA_HEADER_SIZE as usize {
            return Err(CtrError::format("CIA header truncated"));
        }
        let header = Self {
            header_size: read_u32_le(buf, 0x00),
            cia_type: read_u16_le(buf, 0x04),
            version: read_u16_le(buf, 0x06),
            cert_size: read_u32_le(buf, 0x08),
            ticket_size: read_u32_le(buf, 0x0C),
            tmd_size: read_u32_le(buf, 0x10),
            meta_size: read_u32_le(buf, 0x14),
            content_size: read_u64_le(buf, 0x18),
            content_index: buf[CONTENT_INDEX_OFFSET..CONTENT_INDEX_OFFSET + CONTENT_INDEX_SIZE].to_vec(),
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if self.header_size != CIA_HEADER_SIZE {
            return Err(CtrError::format(format!(
                "Unexpected CIA header size: 0x{:X}",
                self.header_size
            )));
        }
        if self.cia_type > 1 || self.version > 1 {
            return Err(CtrError::format(format!(
                "Unsupported CIA type/version {}/{}",
                self.cia_type, self.version
            )));
        }
        if self.cert_size != CIA_CERT_SIZE || self.ticket_size != TICKET_SIZE as u32 {
            return Err(CtrError::format("Unexpected CIA certificate or ticket size"));
        }
        if (self.tmd_size as usize) < TMD_SIZE_MIN || self.tmd_size as usize > TMD_SIZE_MAX {
            return Err(CtrError::format(format!("CIA TMD size 0x{:X} out of range", self.tmd_size)));
        }
        if self.content_size == 0 {
            return Err(CtrError::format("CIA has no content"));
        }
        if self.content_size > CIA_CONTENT_SIZE_MAX {
            return Err(CtrError::format(format!(
                "CIA content size 0x{:X} out of range",
                self.content_size
            )));
        }
        if self.meta_size != 0 && self.meta_size != CIA_META_SIZE {
            return Err(CtrError::format(format!("Unexpected CIA meta size 0x{:X}", self.meta_size)));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; CIA_HEADER_SIZE as usize];
        write_u32_le(&mut buf, 0x00, self.header_size);
        buf[0x04..0x06].copy_from_slice(&self.cia_type.to_le_bytes());
        buf[0x06..0x08].copy_from_slice(&self.version.to_le_bytes());
        write_u32_le(&mut buf, 0x08, self.cert_size);
        write_u32_le(&mut buf, 0x0C, self.ticket_size);
        write_u32_le(&mut buf, 0x10, self.tmd_size);
        write_u32_le(&mut buf, 0x14, self.meta_size);
        write_u64_le(&mut buf, 0x18, self.content_size);
        buf[CONTENT_INDEX_OFFSET..].copy_from_slice(&self.content_index);
        buf
    }

    /// Content index bitmap: bit `0x80 >> (i % 8)` of byte `i / 8`.
    pub fn has_content(&self, index: u16) -> bool {
        self.content_index[index as usize / 8] & (0x80 >> (index % 8)) != 0
    }

    pub fn set_content(&mut self, index: u16) {
        self.content_index[index as usize / 8] |= 0x80 >> (index % 8);
    }

    pub fn clear_content_index(&mut self) {
        self.content_index.fill(0);
    }

    pub fn info(&self) -> CiaInfo {
        CiaInfo::from_header(self)
    }
}

// ---------------------------------------------------------------------------
// Section offsets
// ---------------------------------------------------------------------------

/// Absolute section offsets derived from a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CiaInfo {
    pub offset_cert: u64,
    pub offset_ticket: u64,
    pub offset_tmd: u64,
    pub offset_content: u64,
    /// Zero when the CIA has no meta block.
    pub offset_meta: u64,
    pub size_content: u64,
    pub size_meta: u64,
    pub size_cia: u64,
}

impl CiaInfo {
    pub fn from_header(header: &CiaHeader) -> Self {
        let offset_cert = align64(header.header_size as u64);
        let offset_ticket = offset_cert + align64(header.cert_size as u64);
        let offset_tmd = offset_ticket + align64(header.ticket_size as u64);
        let offset_content = offset_tmd + align64(header.tmd_size as u64);
        let offset_meta = if header.meta_size > 0 {
            offset_content + align64(header.content_size)
        } else {
            0
        };
        let size_cia = if header.meta_size > 0 {
            offset_meta + header.meta_size as u64
        } else {
            offset_content + header.content_size
        };
        Self {
            offset_cert,
            offset_ticket,
            offset_tmd,
            offset_content,
            offset_meta,
            size_content: header.content_size,
            size_meta: header.meta_size as u64,
            size_cia,
        }
    }
}

// ---------------------------------------------------------------------------
// Stub
// ---------------------------------------------------------------------------

/// Everything in a CIA up to the content offset, as separately owned parts.
#[derive(Debug, Clone)]
pub struct CiaStub {
    pub header: CiaHeader,
    pub cert_chain: Vec<u8>,
    pub ticket: Ticket,
    pub tmd: TitleMetaData,
}

impl CiaStub {
    /// Assemble a stub and derive the header fields from the TMD.
    pub fn new(cert_chain: Vec<u8>, ticket: Ticket, tmd: TitleMetaData) -> Result<Self> {
        if cert_chain.len() != CIA_CERT_SIZE as usize {
            return Err(CtrError::format(format!(
                "certificate chain is 0x{:X} bytes, expected 0x{:X}",
                cert_chain.len(),
                CIA_CERT_SIZE
            )));
        }
        let mut stub = Self {
            header: CiaHeader::new(),
            cert_chain,
            ticket,
            tmd,
        };
        stub.fix_header_for_tmd()?;
        Ok(stub)
    }

    /// Load the stub of the CIA at offset 0 of `reader`.
    pub fn read(reader: &mut dyn ReadSeek) -> Result<Self> {
        let file_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let mut header_buf = vec![0u8; CIA_HEADER_SIZE as usize];
        reader
            .read_exact(&mut header_buf)
            .map_err(|e| CtrError::from_read(e, "CIA header"))?;
        let header = CiaHeader::from_bytes(&header_buf)?;
        let info = header.info();
        if file_len < info.offset_content {
            return Err(CtrError::format(format!(
                "CIA stub needs 0x{:X} bytes, file has 0x{:X}",
                info.offset_content, file_len
            )));
        }

        let mut cert_chain = vec![0u8; header.cert_size as usize];
        reader.seek(SeekFrom::Start(info.offset_cert))?;
        reader
            .read_exact(&mut cert_chain)
            .map_err(|e| CtrError::from_read(e, "CIA certificate chain"))?;

        let mut ticket_buf = vec![0u8; header.ticket_size as usize];
        reader.seek(SeekFrom::Start(info.offset_ticket))?;
        reader
            .read_exact(&mut ticket_buf)
            .map_err(|e| CtrError::from_read(e, "CIA ticket"))?;
        let ticket = Ticket::from_bytes(&ticket_buf)?;

        let mut tmd_buf = vec![0u8; header.tmd_size as usize];
        reader.seek(SeekFrom::Start(info.offset_tmd))?;
        reader
            .read_exact(&mut tmd_buf)
            .map_err(|e| CtrError::from_read(e, "CIA TMD"))?;
        let tmd = TitleMetaData::from_bytes(&tmd_buf)?;

        Ok(Self {
            header,
            cert_chain,
            ticket,
            tmd,
        })
    }

    pub fn info(&self) -> CiaInfo {
        self.header.info()
    }

    /// Recompute TMD size, content size and the content index bitmap from
    /// the TMD chunk table.
    pub fn fix_header_for_tmd(&mut self) -> Result<()> {
        let mut content_size: u64 = 0;
        for chunk in self.tmd.chunks() {
            content_size = content_size
                .checked_add(chunk.size)
                .filter(|&total| total <= CIA_CONTENT_SIZE_MAX)
                .ok_or_else(|| {
                    CtrError::format(format!(
                        "content {:08X} of 0x{:X} bytes exceeds the CIA content size limit",
                        chunk.id, chunk.size
                    ))
                })?;
        }
        self.header.tmd_size = self.tmd.size() as u32;
        self.header.content_size = content_size;
        self.header.clear_content_index();
        for chunk in self.tmd.chunks() {
            self.header.set_content(chunk.index);
        }
        Ok(())
    }

    /// Serialize up to the content offset. Each section is zero padded up
    /// to the offset the header gives for the next one.
    pub fn to_bytes(&self) -> Vec<u8> {
        let info = self.info();
        let sections = [
            (info.offset_cert, self.header.to_bytes()),
            (info.offset_ticket, self.cert_chain.clone()),
            (info.offset_tmd, self.ticket.as_bytes().to_vec()),
            (info.offset_content, self.tmd.to_bytes()),
        ];
        let mut out = Vec::with_capacity(info.offset_content as usize);
        for (end, section) in &sections {
            out.extend_from_slice(section);
            out.resize(*end as usize, 0);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Meta block
// ---------------------------------------------------------------------------

const META_DEPENDENCIES: usize = 0x000;
pub const META_DEPENDENCIES_SIZE: usize = 0x180;
const META_CORE_VERSION: usize = 0x300;
const META_SMDH: usize = 0x400;
pub const META_SMDH_SIZE: usize = 0x36C0;

/// CIA meta block: dependency list, core version and SMDH icon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiaMeta {
    raw: Vec<u8>,
}

impl Default for CiaMeta {
    fn default() -> Self {
        Self::new()
    }
}

impl CiaMeta {
    pub fn new() -> Self {
        let mut raw = vec![0u8; CIA_META_SIZE as usize];
        write_u32_le(&mut raw, META_CORE_VERSION, 2);
        Self { raw }
    }

    pub fn set_dependencies(&mut self, deps: &[u8]) -> Result<()> {
        if deps.len() > META_DEPENDENCIES_SIZE {
            return Err(CtrError::format("CIA meta dependency list too large"));
        }
        self.raw[META_DEPENDENCIES..META_DEPENDENCIES + META_DEPENDENCIES_SIZE].fill(0);
        self.raw[META_DEPENDENCIES..META_DEPENDENCIES + deps.len()].copy_from_slice(deps);
        Ok(())
    }

    pub fn set_smdh(&mut self, smdh: &[u8]) -> Result<()> {
        if smdh.len() > META_SMDH_SIZE {
            return Err(CtrError::format("SMDH too large for the CIA meta block"));
        }
        self.raw[META_SMDH..].fill(0);
        self.raw[META_SMDH..META_SMDH + smdh.len()].copy_from_slice(smdh);
        Ok(())
    }

    pub fn dependencies(&self) -> &[u8] {
        &self.raw[META_DEPENDENCIES..META_DEPENDENCIES + META_DEPENDENCIES_SIZE]
    }

    pub fn core_version(&self) -> u32 {
        read_u32_le(&self.raw, META_CORE_VERSION)
    }

    pub fn smdh(&self) -> &[u8] {
        &self.raw[META_SMDH..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }
}

#[cfg(test)]
#[path = "tests/cia_tests.rs"]
mod tests;
