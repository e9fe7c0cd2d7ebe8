//! Container type detection.

use std::io::{Read, SeekFrom};

use ctrpack_core::{ReadSeek, Result};
use ctrpack_formats::cia::{CIA_HEADER_SIZE, CiaHeader};
use ctrpack_formats::ncch::NCCH_HEADER_SIZE;
use ctrpack_formats::tmd::TMD_SIZE_MAX;
use ctrpack_formats::{NcchHeader, NcsdHeader, TitleMetaData};

/// Detected 3DS container type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameFileType {
    /// Game card image (.3ds, .cci)
    Ncsd,
    /// Single NCCH (.cxi, .cfa, .app)
    Ncch,
    /// Installable archive (.cia)
    Cia,
    /// Title metadata next to its `.app` contents
    Tmd,
}

/// Detect the container type from the file contents. Leaves the cursor at 0.
pub fn identify_file_type(reader: &mut dyn ReadSeek) -> Result<Option<GameFileType>> {
    reader.seek(SeekFrom::Start(0))?;
    let mut head = Vec::with_capacity(CIA_HEADER_SIZE as usize);
    reader
        .take(CIA_HEADER_SIZE.max(TMD_SIZE_MAX as u32) as u64)
        .read_to_end(&mut head)?;
    reader.seek(SeekFrom::Start(0))?;

    if head.len() >= NCCH_HEADER_SIZE {
        if NcsdHeader::from_bytes(&head).is_ok() {
            return Ok(Some(GameFileType::Ncsd));
        }
        if NcchHeader::from_bytes(&head).is_ok() {
            return Ok(Some(GameFileType::Ncch));
        }
    }
    if CiaHeader::from_bytes(&head).is_ok() {
        return Ok(Some(GameFileType::Cia));
    }
    if TitleMetaData::from_bytes(&head).is_ok() {
        return Ok(Some(GameFileType::Tmd));
    }
    Ok(None)
}

#[cfg(test)]
#[path = "tests/filetype_tests.rs"]
mod tests;
