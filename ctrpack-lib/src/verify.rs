//! Hash verification of NCCH, NCSD, CIA and TMD titles.
//!
//! Every check streams the stored data through the scratch buffer, removes
//! whatever crypto layer applies, and compares the SHA-256 against the
//! hash recorded by the enclosing structure:
//!
//! - NCCH: ExtHeader, ExeFS and RomFS superblock hashes from the NCCH
//!   header, then every ExeFS file hash from the ExeFS header.
//! - NCSD: each present partition as an NCCH.
//! - CIA / TMD: each content against its TMD chunk record.
//!
//! A mismatch is reported to the frontend through a prompt and returned as
//! [`CtrError::Verification`].

use std::io::{Seek, SeekFrom};
use std::path::Path;

use ctrpack_core::{CtrError, OpenMode, ReadSeek, RegionStatus, Result, StorageFile, VerifyFailure};
use ctrpack_formats::exefs::EXEFS_HEADER_SIZE;
use ctrpack_formats::ncch::{NCCH_EXHEADER_OFFSET, NCCH_EXHEADER_SIZE};
use ctrpack_formats::{
    CiaStub, NcchCipher, NcsdHeader, TitleMetaData, TmdContentChunk, read_ncch_headers,
};

use crate::context::CtrContext;
use crate::filetype::GameFileType;
use crate::hasher::{check_hash, sha256_stream};
use crate::transform::content_cipher;

/// Per-region result of an NCCH verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NcchReport {
    pub exheader: RegionStatus,
    pub exefs: RegionStatus,
    pub romfs: RegionStatus,
}

impl NcchReport {
    pub fn is_ok(&self) -> bool {
        !(self.exheader.is_fail() || self.exefs.is_fail() || self.romfs.is_fail())
    }

    pub fn failure(&self) -> VerifyFailure {
        VerifyFailure::Ncch {
            exheader: self.exheader,
            exefs: self.exefs,
            romfs: self.romfs,
        }
    }
}

/// Hash `len` bytes at `ncch_offset + start`, decrypting with `cipher`.
/// `progress` receives positions relative to the NCCH.
#[allow(clippy::too_many_arguments)]
fn hash_region(
    reader: &mut dyn ReadSeek,
    buf: &mut [u8],
    cipher: Option<&NcchCipher>,
    ncch_offset: u64,
    start: u64,
    len: u64,
    expected: &[u8; 32],
    progress: &mut dyn FnMut(u64) -> bool,
) -> Result<RegionStatus> {
    reader.seek(SeekFrom::Start(ncch_offset + start))?;
    let matched = check_hash(
        reader,
        len,
        expected,
        buf,
        &mut |chunk: &mut [u8], pos: u64| match cipher {
            Some(cipher) => cipher.apply(chunk, start + pos),
            None => Ok(()),
        },
        &mut |done| progress(start + done),
    )?;
    Ok(RegionStatus::from_match(matched))
}

fn label(path: &Path) -> String {
    path.display().to_string()
}

impl CtrContext {
    /// Verify the NCCH at `offset` in the file at `path`. A `size` of zero
    /// means the NCCH may extend to the end of the file.
    pub fn verify_ncch(&mut self, path: &Path, offset: u64, size: u64) -> Result<NcchReport> {
        let mut file = self.open(path, OpenMode::Read)?;
        let file_len = file.len()?;
        file.seek(SeekFrom::Start(offset))?;
        let (ncch, exefs) = read_ncch_headers(&mut file, &self.keyring, true)?;

        let available = if size == 0 {
            file_len.saturating_sub(offset)
        } else {
            size.min(file_len.saturating_sub(offset))
        };
        if available < ncch.content_size() {
            return Err(CtrError::format(format!(
                "NCCH at 0x{:X} needs 0x{:X} bytes, only 0x{:X} available",
                offset,
                ncch.content_size(),
                available
            )));
        }

        let cipher = NcchCipher::new(&ncch, ncch.crypto()?, exefs.as_ref(), &self.keyring)?;
        let cipher = cipher.as_ref();
        let buf = self.buffer.as_mut_slice();
        let interaction = &self.interaction;
        let label = label(path);
        let progress: &mut dyn FnMut(u64) -> bool =
            &mut |pos| interaction.progress(offset + pos, file_len, &label);

        let exheader = if ncch.has_exheader() {
            let expected = ncch.exheader_hash;
            hash_region(&mut file, buf, cipher, offset, NCCH_EXHEADER_OFFSET, NCCH_EXHEADER_SIZE, &expected, progress)?
        } else {
            RegionStatus::NotApplicable
        };
        let mut exefs_status = if ncch.exefs_size_mu > 0 {
            let expected = ncch.exefs_hash;
            hash_region(&mut file, buf, cipher, offset, ncch.exefs_offset(), ncch.exefs_hash_size(), &expected, progress)?
        } else {
            RegionStatus::NotApplicable
        };
        let romfs = if ncch.romfs_size_mu > 0 {
            let expected = ncch.romfs_hash;
            hash_region(&mut file, buf, cipher, offset, ncch.romfs_offset(), ncch.romfs_hash_size(), &expected, progress)?
        } else {
            RegionStatus::NotApplicable
        };

        // ExeFS files are only checked once the table itself is trusted
        if let (RegionStatus::Ok, Some(exefs)) = (exefs_status, exefs.as_ref()) {
            for entry in exefs.files() {
                let start = ncch.exefs_offset() + EXEFS_HEADER_SIZE as u64 + entry.offset as u64;
                let status = hash_region(
                    &mut file,
                    buf,
                    cipher,
                    offset,
                    start,
                    entry.size as u64,
                    &exefs.hash(entry.index),
                    progress,
                )?;
                if status.is_fail() {
                    log::debug!("ExeFS file '{}' of {} failed", entry.name, path.display());
                    exefs_status = RegionStatus::Fail;
                    break;
                }
            }
        }

        let report = NcchReport {
            exheader,
            exefs: exefs_status,
            romfs,
        };
        log::debug!(
            "NCCH {:016X} at 0x{:X}: {}/{}/{}",
            ncch.program_id,
            offset,
            report.exheader.label(),
            report.exefs.label(),
            report.romfs.label()
        );
        Ok(report)
    }

    pub fn verify_ncch_file(&mut self, path: &Path) -> Result<()> {
        self.progress(0, 0, &label(path))?;
        let report = self.verify_ncch(path, 0, 0)?;
        if report.is_ok() {
            return Ok(());
        }
        let failure = report.failure();
        self.prompt(&format!("{}\n{}", path.display(), failure));
        Err(CtrError::Verification(failure))
    }

    pub fn verify_ncsd_file(&mut self, path: &Path) -> Result<()> {
        let label = label(path);
        self.progress(0, 0, &label)?;
        let ncsd = {
            let mut file = self.open(path, OpenMode::Read)?;
            let file_len = file.len()?;
            let ncsd = NcsdHeader::read(&mut file)?;
            ncsd.check_bounds(file_len)?;
            ncsd
        };

        let partitions: Vec<_> = ncsd.present_partitions().collect();
        for (index, offset, size) in partitions {
            self.progress(offset, ncsd.data_end(), &label)?;
            let passed = match self.verify_ncch(path, offset, size) {
                Ok(report) => report.is_ok(),
                Err(CtrError::Cancelled) => return Err(CtrError::Cancelled),
                Err(e) => {
                    log::warn!("Partition {} of {}: {}", index, path.display(), e);
                    false
                }
            };
            if !passed {
                let failure = VerifyFailure::Partition {
                    index,
                    offset,
                    size,
                };
                self.prompt(&format!("{}\n{}", path.display(), failure));
                return Err(CtrError::Verification(failure));
            }
        }
        Ok(())
    }

    pub fn verify_cia_file(&mut self, path: &Path) -> Result<()> {
        let label = label(path);
        self.progress(0, 0, &label)?;
        let mut file = self.open(path, OpenMode::Read)?;
        let stub = CiaStub::read(&mut file)?;

        let title_key = if stub.tmd.chunks().iter().any(TmdContentChunk::is_encrypted) {
            Some(stub.ticket.title_key(&self.keyring)?)
        } else {
            None
        };

        let mut offset = stub.info().offset_content;
        for (index, chunk) in stub.tmd.chunks().iter().enumerate() {
            if !self.verify_content(&mut file, offset, chunk, title_key.as_ref(), &label)? {
                let failure = VerifyFailure::Content {
                    index,
                    id: chunk.id,
                    offset,
                    size: chunk.size,
                };
                self.prompt(&format!("{}\n{}", path.display(), failure));
                return Err(CtrError::Verification(failure));
            }
            offset += chunk.size;
        }
        Ok(())
    }

    /// Verify a TMD against the `.app` files next to it. Those are stored
    /// decrypted, whatever the chunk flags say.
    pub fn verify_tmd_file(&mut self, path: &Path) -> Result<()> {
        self.progress(0, 0, &label(path))?;
        let tmd = {
            let mut file = self.open(path, OpenMode::Read)?;
            TitleMetaData::read(&mut file)?
        };

        for (index, chunk) in tmd.chunks().iter().enumerate() {
            let content_path = path.with_file_name(chunk.app_name());
            let mut plain = chunk.clone();
            plain.set_encrypted(false);

            let mut file = self.open(&content_path, OpenMode::Read)?;
            if !self.verify_content(&mut file, 0, &plain, None, &label(&content_path))? {
                let failure = VerifyFailure::Content {
                    index,
                    id: chunk.id,
                    offset: 0,
                    size: chunk.size,
                };
                self.prompt(&format!("{}\n{}", content_path.display(), failure));
                return Err(CtrError::Verification(failure));
            }
        }
        Ok(())
    }

    /// Verify whatever container the file at `path` holds.
    pub fn verify_game_file(&mut self, path: &Path) -> Result<()> {
        match self.identify_file_type(path)? {
            Some(GameFileType::Ncsd) => self.verify_ncsd_file(path),
            Some(GameFileType::Ncch) => self.verify_ncch_file(path),
            Some(GameFileType::Cia) => self.verify_cia_file(path),
            Some(GameFileType::Tmd) => self.verify_tmd_file(path),
            None => Err(CtrError::format(format!(
                "{} is not a recognized 3DS file",
                path.display()
            ))),
        }
    }

    /// Hash one content at `offset` against its chunk record. Returns
    /// `false` on mismatch or if the file is too short to hold it.
    fn verify_content(
        &mut self,
        file: &mut Box<dyn StorageFile>,
        offset: u64,
        chunk: &TmdContentChunk,
        title_key: Option<&[u8; 16]>,
        label: &str,
    ) -> Result<bool> {
        let size = chunk.size;
        let file_len = file.len()?;
        if offset.checked_add(size).is_none_or(|end| end > file_len) {
            log::debug!(
                "Content {:08X} ({:X}@{:X}) lies beyond the end of {}",
                chunk.id,
                size,
                offset,
                label
            );
            return Ok(false);
        }

        let mut cipher = content_cipher(chunk, title_key)?;
        file.seek(SeekFrom::Start(offset))?;
        let interaction = &self.interaction;
        let hash = sha256_stream(
            file,
            size,
            &mut self.buffer,
            &mut |buf: &mut [u8], _pos: u64| match cipher.as_mut() {
                Some(cipher) => cipher.decrypt(buf),
                None => Ok(()),
            },
            &mut |done| interaction.progress(offset + done, file_len, label),
        )?;
        Ok(hash == chunk.hash)
    }
}
