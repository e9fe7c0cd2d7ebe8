//! CIA building from a TMD and the `.app` contents next to it.
//!
//! Two flavours exist. The default build produces an installable archive
//! from whatever is at hand: a found ticket (with personal data removed) or
//! a generated one, NCCH crypto stripped where keys allow, and every TMD
//! record rewritten to describe the inserted data. A force-legit build
//! keeps the title exactly as issued: it needs a legit ticket and the
//! certificate chain, leaves NCCH crypto alone, re-applies the CIA layer to
//! flagged contents and rejects any content that differs from its record.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ctrpack_core::util::align64;
use ctrpack_core::{CtrError, OpenMode, Result, StorageFile};
use ctrpack_formats::cia::{CIA_CERT_SIZE, CIA_META_SIZE, META_DEPENDENCIES_SIZE, META_SMDH_SIZE};
use ctrpack_formats::crypto::ContentCipher;
use ctrpack_formats::exefs::EXEFS_HEADER_SIZE;
use ctrpack_formats::ncch::NCCH_EXHEADER_OFFSET;
use ctrpack_formats::{
    CiaMeta, CiaStub, NcchCipher, NcchCrypto, Ticket, TitleMetaData, TmdContentChunk,
    read_ncch_headers,
};
use sha2::{Digest, Sha256};

use crate::context::CtrContext;
use crate::filetype::GameFileType;
use crate::transform::NcchTransform;

/// Offset of the dependency list inside the extended header.
const EXHEADER_DEPENDENCIES: u64 = 0x40;

/// Title key used when the ticket's key cannot be decrypted.
const UNKNOWN_TITLE_KEY: [u8; 16] = [0xFF; 16];

impl CtrContext {
    /// Build the CIA at `cia_path` from the TMD at `tmd_path`.
    pub fn build_cia_from_tmd_file(
        &mut self,
        tmd_path: &Path,
        cia_path: &Path,
        force_legit: bool,
    ) -> Result<()> {
        self.progress(0, 0, &tmd_path.display().to_string())?;
        let tmd = {
            let mut file = self.open(tmd_path, OpenMode::Read)?;
            TitleMetaData::read(&mut file)?
        };
        if tmd.chunks().is_empty() {
            return Err(CtrError::format(format!(
                "{} lists no contents",
                tmd_path.display()
            )));
        }
        let title_id = tmd.title_id();

        let ticket = self.ticket_for(title_id, force_legit)?;
        let cert_chain = match self.tickets.certificate_chain() {
            Some(chain) => chain,
            None if force_legit => {
                return Err(CtrError::legitimacy("certificate chain not available"));
            }
            None => vec![0u8; CIA_CERT_SIZE as usize],
        };
        let mut stub = CiaStub::new(cert_chain, ticket, tmd)?;
        self.write_stub(cia_path, &stub, OpenMode::Create)?;

        let first_app = tmd_path.with_file_name(stub.tmd.chunks()[0].app_name());
        let meta = match self.load_ncch_meta(&first_app, 0) {
            Ok(meta) => Some(meta),
            Err(e) => {
                log::debug!("No meta for {:016X}: {}", title_id, e);
                None
            }
        };

        let title_key = match stub.ticket.title_key(&self.keyring) {
            Ok(key) => key,
            Err(e) if force_legit => return Err(e),
            Err(e) => {
                log::debug!("Title key for {:016X} unavailable: {}", title_id, e);
                UNKNOWN_TITLE_KEY
            }
        };

        for chunk in stub.tmd.chunks_mut() {
            let content_path = tmd_path.with_file_name(chunk.app_name());
            let id = chunk.id;
            if let Err(e) =
                self.insert_cia_content(cia_path, &content_path, 0, 0, chunk, &title_key, force_legit)
            {
                self.prompt(&format!(
                    "ID {:016X}.{:08X}\nInsert content failed",
                    title_id, id
                ));
                return Err(e);
            }
        }

        stub.fix_header_for_tmd()?;
        if let Some(meta) = meta {
            match self.insert_cia_meta(cia_path, &meta) {
                Ok(()) => stub.header.meta_size = CIA_META_SIZE,
                Err(e) => log::warn!("Meta for {:016X} not inserted: {}", title_id, e),
            }
        }

        stub.tmd.fix_hashes();
        self.write_stub(cia_path, &stub, OpenMode::OpenOrCreate)?;
        log::info!(
            "Built {} ({} content(s))",
            cia_path.display(),
            stub.tmd.chunks().len()
        );
        Ok(())
    }

    fn ticket_for(&self, title_id: u64, force_legit: bool) -> Result<Ticket> {
        if force_legit {
            return match self.tickets.find_ticket(title_id, true)? {
                Some(ticket) => Ok(ticket),
                None => {
                    self.prompt(&format!("ID {:016X}\nLegit ticket not found.", title_id));
                    Err(CtrError::legitimacy(format!(
                        "no legit ticket for {:016X}",
                        title_id
                    )))
                }
            };
        }
        match self.tickets.find_ticket(title_id, false)? {
            Some(mut ticket) => {
                if ticket.has_personal_data() {
                    log::debug!("Removing personal data from ticket {:016X}", title_id);
                    ticket.redact_personal();
                }
                Ok(ticket)
            }
            None => Ok(Ticket::fake(title_id)),
        }
    }

    fn write_stub(&self, cia_path: &Path, stub: &CiaStub, mode: OpenMode) -> Result<()> {
        let mut file = self.open(cia_path, mode)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&stub.to_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Append the content at `offset` of `content_path` to the CIA and
    /// update `chunk` to describe what was written. A `size` of zero means
    /// "to the end of the file".
    #[allow(clippy::too_many_arguments)]
    pub fn insert_cia_content(
        &mut self,
        cia_path: &Path,
        content_path: &Path,
        offset: u64,
        size: u64,
        chunk: &mut TmdContentChunk,
        title_key: &[u8; 16],
        force_legit: bool,
    ) -> Result<()> {
        let label = content_path.display().to_string();
        let mut src = self.open(content_path, OpenMode::Read)?;
        let file_len = src.len()?;
        let size = if size == 0 {
            file_len.saturating_sub(offset)
        } else {
            size
        };
        if offset.checked_add(size).is_none_or(|end| end > file_len) {
            return Err(CtrError::format(format!(
                "{}: 0x{:X} bytes at 0x{:X} exceed the file size 0x{:X}",
                label, size, offset, file_len
            )));
        }

        let ncch = if force_legit {
            None
        } else {
            self.ncch_decryption(&mut src, offset)
        };
        let cia_crypto = force_legit && chunk.is_encrypted();
        if !cia_crypto {
            chunk.set_encrypted(false);
        }
        let mut cipher = cia_crypto.then(|| ContentCipher::new(title_key, chunk.index));

        let mut dst = self.open(cia_path, OpenMode::OpenOrCreate)?;
        dst.seek(SeekFrom::End(0))?;
        src.seek(SeekFrom::Start(offset))?;
        self.progress(0, 0, &label)?;

        let mut hasher = Sha256::new();
        let mut done: u64 = 0;
        while done < size {
            let n = (self.buffer.len() as u64).min(size - done) as usize;
            let buf = &mut self.buffer[..n];
            src.read_exact(buf)
                .map_err(|e| CtrError::from_read(e, "content"))?;
            if let Some(ncch) = &ncch {
                ncch.apply(buf, done)?;
            }
            hasher.update(&*buf);
            if let Some(cipher) = cipher.as_mut() {
                cipher.encrypt(buf)?;
            }
            dst.write_all(buf)?;
            done += n as u64;
            self.progress(done, size, &label)?;
        }
        dst.flush()?;

        let hash: [u8; 32] = hasher.finalize().into();
        if force_legit && (hash != chunk.hash || size != chunk.size) {
            return Err(CtrError::legitimacy(format!(
                "content {:08X} does not match its TMD record",
                chunk.id
            )));
        }
        chunk.size = size;
        chunk.hash = hash;
        Ok(())
    }

    /// Transform stripping the NCCH crypto of an encrypted NCCH at `offset`,
    /// `None` if there is none or its keys are missing.
    fn ncch_decryption(&self, src: &mut Box<dyn StorageFile>, offset: u64) -> Option<NcchTransform> {
        src.seek(SeekFrom::Start(offset)).ok()?;
        let (header, exefs) = read_ncch_headers(src, &self.keyring, true).ok()?;
        if !header.is_encrypted() {
            return None;
        }
        match NcchTransform::new(&header, exefs.as_ref(), NcchCrypto::None, &self.keyring) {
            Ok(transform) => Some(transform),
            Err(e) => {
                log::warn!("Keeping NCCH {:016X} encrypted: {}", header.program_id, e);
                None
            }
        }
    }

    /// Append `meta` at the next 64-byte boundary of the CIA.
    pub fn insert_cia_meta(&mut self, cia_path: &Path, meta: &CiaMeta) -> Result<()> {
        let mut file = self.open(cia_path, OpenMode::OpenOrCreate)?;
        let end = file.len()?;
        file.seek(SeekFrom::Start(align64(end)))?;
        file.write_all(meta.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Collect the CIA meta block of the NCCH at `offset`: the dependency
    /// list from its extended header and the SMDH from the ExeFS `icon`.
    pub fn load_ncch_meta(&mut self, path: &Path, offset: u64) -> Result<CiaMeta> {
        let mut file = self.open(path, OpenMode::Read)?;
        file.seek(SeekFrom::Start(offset))?;
        let (ncch, exefs) = read_ncch_headers(&mut file, &self.keyring, true)?;
        if !ncch.has_exheader() {
            return Err(CtrError::format("NCCH has no extended header"));
        }
        let exefs = exefs.ok_or_else(|| CtrError::format("NCCH has no ExeFS"))?;
        let icon = exefs
            .find("icon")
            .ok_or_else(|| CtrError::format("ExeFS has no icon"))?;
        if icon.size as usize > META_SMDH_SIZE {
            return Err(CtrError::format(format!(
                "icon of 0x{:X} bytes does not fit the meta block",
                icon.size
            )));
        }
        let cipher = NcchCipher::new(&ncch, ncch.crypto()?, Some(&exefs), &self.keyring)?;

        let deps_offset = NCCH_EXHEADER_OFFSET + EXHEADER_DEPENDENCIES;
        let mut deps = vec![0u8; META_DEPENDENCIES_SIZE];
        file.seek(SeekFrom::Start(offset + deps_offset))?;
        file.read_exact(&mut deps)
            .map_err(|e| CtrError::from_read(e, "extended header"))?;

        let icon_offset = ncch.exefs_offset() + EXEFS_HEADER_SIZE as u64 + icon.offset as u64;
        let mut smdh = vec![0u8; icon.size as usize];
        file.seek(SeekFrom::Start(offset + icon_offset))?;
        file.read_exact(&mut smdh)
            .map_err(|e| CtrError::from_read(e, "ExeFS icon"))?;

        if let Some(cipher) = &cipher {
            cipher.apply(&mut deps, deps_offset)?;
            cipher.apply(&mut smdh, icon_offset)?;
        }

        let mut meta = CiaMeta::new();
        meta.set_dependencies(&deps)?;
        meta.set_smdh(&smdh)?;
        Ok(meta)
    }

    /// Build a CIA in the output directory from the TMD at `path`.
    pub fn build_cia_from_game_file(&mut self, path: &Path, force_legit: bool) -> Result<PathBuf> {
        if self.identify_file_type(path)? != Some(GameFileType::Tmd) {
            return Err(CtrError::format(format!(
                "{}: a CIA can only be built from a TMD",
                path.display()
            )));
        }
        let dest = self.output_path(path, Some("cia"))?;
        match self.build_cia_from_tmd_file(path, &dest, force_legit) {
            Ok(()) => Ok(dest),
            Err(e) => {
                if self.storage.exists(&dest) {
                    if let Err(rm) = self.storage.remove_file(&dest) {
                        log::warn!("Could not remove {}: {}", dest.display(), rm);
                    }
                }
                Err(e)
            }
        }
    }
}
