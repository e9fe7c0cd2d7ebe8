//! Crypto transforms: NCCH and NCSD decrypt/encrypt, CIA content decrypt.
//!
//! All transforms stream the source through the scratch buffer once. A
//! chunk first loses its CIA layer (AES-CBC under the title key), then its
//! NCCH layer is rewritten (AES-CTR, see [`NcchTransform`]), then it is
//! written either back over itself or to the same offset of a copy.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ctrpack_core::{CtrError, OpenMode, ReadSeek, Result, StorageFile};
use ctrpack_formats::crypto::{AES_BLOCK_SIZE, ContentCipher};
use ctrpack_formats::exefs::EXEFS_HEADER_SIZE;
use ctrpack_formats::ncch::NCCH_HEADER_SIZE;
use ctrpack_formats::{
    CiaStub, ExeFsHeader, Keyring, NcchCipher, NcchCrypto, NcchHeader, NcsdHeader,
    TmdContentChunk, read_ncch_headers,
};
use sha2::{Digest, Sha256};

use crate::context::CtrContext;
use crate::filetype::GameFileType;

/// Where transformed data goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Overwrite the source.
    InPlace,
    /// Write to the same offsets of another file.
    Copy(PathBuf),
}

/// How the bytes of one copy are transformed.
#[derive(Debug)]
pub enum TransformMode<'a> {
    /// The range holds one NCCH; re-encrypt it as `target`.
    Ncch { target: NcchCrypto },
    /// The range holds an NCSD image; re-encrypt every partition as `target`.
    Ncsd { target: NcchCrypto },
    /// The range holds one CIA content. Its CIA layer and any NCCH crypto
    /// are removed; the chunk receives the plaintext hash and loses its
    /// encrypted flag.
    CiaContent {
        chunk: &'a mut TmdContentChunk,
        title_key: Option<[u8; 16]>,
    },
}

// ---------------------------------------------------------------------------
// NCCH layer
// ---------------------------------------------------------------------------

/// Moves one NCCH from its current crypto to a target crypto.
///
/// Works on arbitrary chunks addressed by their offset from the NCCH start:
/// the source keystream is removed, the target keystream applied and the
/// header flags rewritten where the chunk covers them.
#[derive(Clone)]
pub struct NcchTransform {
    source: Option<NcchCipher>,
    target: Option<NcchCipher>,
    header: Option<[u8; NCCH_HEADER_SIZE]>,
}

impl NcchTransform {
    pub fn new(
        header: &NcchHeader,
        exefs: Option<&ExeFsHeader>,
        target: NcchCrypto,
        keyring: &Keyring,
    ) -> Result<Self> {
        let current = header.crypto()?;
        if current == target {
            return Ok(Self::identity());
        }
        let rewritten = header.with_crypto(target);
        Ok(Self {
            source: NcchCipher::new(header, current, exefs, keyring)?,
            target: NcchCipher::new(&rewritten, target, exefs, keyring)?,
            header: Some(*rewritten.raw()),
        })
    }

    pub fn identity() -> Self {
        Self {
            source: None,
            target: None,
            header: None,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.source.is_none() && self.target.is_none() && self.header.is_none()
    }

    pub fn apply(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        if let Some(cipher) = &self.source {
            cipher.apply(buf, offset)?;
        }
        if let Some(cipher) = &self.target {
            cipher.apply(buf, offset)?;
        }
        if let Some(header) = &self.header {
            if offset < NCCH_HEADER_SIZE as u64 {
                let start = offset as usize;
                let n = (NCCH_HEADER_SIZE - start).min(buf.len());
                buf[..n].copy_from_slice(&header[start..start + n]);
            }
        }
        Ok(())
    }
}

/// One NCSD partition and its transform, offset relative to the NCSD start.
struct PartitionTransform {
    offset: u64,
    size: u64,
    ncch: NcchTransform,
}

enum Layer {
    Plain,
    Ncch(NcchTransform),
    Ncsd(Vec<PartitionTransform>),
}

impl Layer {
    fn is_identity(&self) -> bool {
        match self {
            Layer::Plain => true,
            Layer::Ncch(t) => t.is_identity(),
            Layer::Ncsd(parts) => parts.iter().all(|p| p.ncch.is_identity()),
        }
    }

    fn apply(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        match self {
            Layer::Plain => Ok(()),
            Layer::Ncch(t) => t.apply(buf, offset),
            Layer::Ncsd(parts) => {
                let end = offset + buf.len() as u64;
                for part in parts {
                    let start = offset.max(part.offset);
                    let stop = end.min(part.offset + part.size);
                    if start < stop {
                        let chunk = &mut buf[(start - offset) as usize..(stop - offset) as usize];
                        part.ncch.apply(chunk, start - part.offset)?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// CIA-layer cipher for `chunk`, `None` if the content is stored plain.
pub(crate) fn content_cipher(
    chunk: &TmdContentChunk,
    title_key: Option<&[u8; 16]>,
) -> Result<Option<ContentCipher>> {
    match (chunk.is_encrypted(), title_key) {
        (false, _) => Ok(None),
        (true, Some(key)) => Ok(Some(ContentCipher::new(key, chunk.index))),
        (true, None) => Err(CtrError::crypto(format!(
            "content {:08X} is encrypted but no title key is available",
            chunk.id
        ))),
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

impl CtrContext {
    /// Stream `size` bytes at `offset` of `source` through the transform
    /// selected by `mode`. For the NCCH and NCSD modes a `size` of zero
    /// means "to the end of the file".
    pub fn copy_with_transform(
        &mut self,
        source: &Path,
        destination: &Destination,
        offset: u64,
        size: u64,
        mode: TransformMode<'_>,
    ) -> Result<()> {
        let in_place = *destination == Destination::InPlace;
        let mut src = self.open(
            source,
            if in_place {
                OpenMode::ReadWrite
            } else {
                OpenMode::Read
            },
        )?;
        let file_len = src.len()?;
        let size = match mode {
            TransformMode::CiaContent { .. } => size,
            _ if size == 0 => file_len.saturating_sub(offset),
            _ => size,
        };
        if offset.checked_add(size).is_none_or(|end| end > file_len) {
            return Err(CtrError::format(format!(
                "{}: 0x{:X} bytes at 0x{:X} exceed the file size 0x{:X}",
                source.display(),
                size,
                offset,
                file_len
            )));
        }

        let (layer, chunk, mut cia_cipher) = match mode {
            TransformMode::Ncch { target } => {
                src.seek(SeekFrom::Start(offset))?;
                let (header, exefs) = read_ncch_headers(&mut src, &self.keyring, true)?;
                let t = NcchTransform::new(&header, exefs.as_ref(), target, &self.keyring)?;
                (Layer::Ncch(t), None, None)
            }
            TransformMode::Ncsd { target } => (self.ncsd_layer(&mut src, offset, target)?, None, None),
            TransformMode::CiaContent { chunk, title_key } => {
                let cipher = content_cipher(chunk, title_key.as_ref())?;
                let layer = self.cia_content_layer(&mut src, offset, size, title_key.as_ref(), cipher.clone())?;
                (layer, Some(chunk), cipher)
            }
        };

        if in_place && chunk.is_none() && layer.is_identity() {
            log::debug!("{}: already in the requested form", source.display());
            return Ok(());
        }

        let mut dst = match destination {
            Destination::InPlace => None,
            Destination::Copy(path) => {
                let mode = if offset > 0 {
                    OpenMode::OpenOrCreate
                } else {
                    OpenMode::Create
                };
                let mut file = self.open(path, mode)?;
                file.seek(SeekFrom::Start(offset))?;
                Some(file)
            }
        };

        let label = source.display().to_string();
        src.seek(SeekFrom::Start(offset))?;
        let mut hasher = Sha256::new();
        let mut done: u64 = 0;
        while done < size {
            let n = (self.buffer.len() as u64).min(size - done) as usize;
            let buf = &mut self.buffer[..n];
            src.read_exact(buf)
                .map_err(|e| CtrError::from_read(e, "source data"))?;
            if let Some(cipher) = cia_cipher.as_mut() {
                cipher.decrypt(buf)?;
            }
            layer.apply(buf, done)?;
            match dst.as_mut() {
                Some(dst) => dst.write_all(buf)?,
                None => {
                    src.seek(SeekFrom::Current(-(n as i64)))?;
                    src.write_all(buf)?;
                }
            }
            hasher.update(&*buf);
            done += n as u64;
            self.progress(offset + done, file_len, &label)?;
        }

        match dst.as_mut() {
            Some(dst) => dst.flush()?,
            None => src.flush()?,
        }
        if let Some(chunk) = chunk {
            chunk.hash = hasher.finalize().into();
            chunk.set_encrypted(false);
        }
        Ok(())
    }

    fn ncsd_layer(&self, src: &mut dyn ReadSeek, offset: u64, target: NcchCrypto) -> Result<Layer> {
        src.seek(SeekFrom::Start(offset))?;
        let ncsd = NcsdHeader::read(src)?;
        let mut parts = Vec::new();
        for (index, part_offset, part_size) in ncsd.present_partitions() {
            src.seek(SeekFrom::Start(offset + part_offset))?;
            let (header, exefs) = read_ncch_headers(src, &self.keyring, true)?;
            log::debug!(
                "Partition {}: {:?} -> {:?}",
                index,
                header.crypto()?,
                target
            );
            parts.push(PartitionTransform {
                offset: part_offset,
                size: part_size,
                ncch: NcchTransform::new(&header, exefs.as_ref(), target, &self.keyring)?,
            });
        }
        Ok(Layer::Ncsd(parts))
    }

    /// Look through the CIA layer for an encrypted NCCH at the start of a
    /// content. Contents that are not NCCHs are copied as they are.
    fn cia_content_layer(
        &self,
        src: &mut dyn ReadSeek,
        offset: u64,
        size: u64,
        title_key: Option<&[u8; 16]>,
        cipher: Option<ContentCipher>,
    ) -> Result<Layer> {
        if size < NCCH_HEADER_SIZE as u64 {
            return Ok(Layer::Plain);
        }
        let cia_key = if cipher.is_some() { title_key } else { None };
        let mut head = [0u8; NCCH_HEADER_SIZE];
        src.seek(SeekFrom::Start(offset))?;
        src.read_exact(&mut head)
            .map_err(|e| CtrError::from_read(e, "content"))?;
        if let Some(mut cipher) = cipher {
            cipher.decrypt(&mut head)?;
        }
        let header = match NcchHeader::from_bytes(&head) {
            Ok(header) if header.content_size() <= size => header,
            _ => return Ok(Layer::Plain),
        };
        if !header.is_encrypted() {
            return Ok(Layer::Plain);
        }

        let exefs = if header.exefs_size_mu > 0 {
            // one extra block in front to resume the CBC chain
            let start = offset + header.exefs_offset();
            let mut raw = [0u8; AES_BLOCK_SIZE + EXEFS_HEADER_SIZE];
            src.seek(SeekFrom::Start(start - AES_BLOCK_SIZE as u64))?;
            src.read_exact(&mut raw)
                .map_err(|e| CtrError::from_read(e, "ExeFS header"))?;
            let (prev, data) = raw.split_at_mut(AES_BLOCK_SIZE);
            if let Some(key) = cia_key {
                let mut block = [0u8; AES_BLOCK_SIZE];
                block.copy_from_slice(prev);
                ContentCipher::resume(key, block).decrypt(data)?;
            }
            if let Some(ncch) = NcchCipher::new(&header, header.crypto()?, None, &self.keyring)? {
                ncch.apply(data, header.exefs_offset())?;
            }
            let exefs = ExeFsHeader::from_bytes(data)?;
            exefs.validate(header.exefs_size())?;
            Some(exefs)
        } else {
            None
        };

        Ok(Layer::Ncch(NcchTransform::new(
            &header,
            exefs.as_ref(),
            NcchCrypto::None,
            &self.keyring,
        )?))
    }

    /// Plain copy of a byte range into the same offset of `dest`.
    fn copy_range(&mut self, source: &Path, dest: &Path, offset: u64, size: u64) -> Result<()> {
        let mut src = self.open(source, OpenMode::Read)?;
        let mut dst = self.open(dest, OpenMode::OpenOrCreate)?;
        src.seek(SeekFrom::Start(offset))?;
        dst.seek(SeekFrom::Start(offset))?;
        let mut done: u64 = 0;
        while done < size {
            let n = (self.buffer.len() as u64).min(size - done) as usize;
            let buf = &mut self.buffer[..n];
            src.read_exact(buf)
                .map_err(|e| CtrError::from_read(e, "source data"))?;
            dst.write_all(buf)?;
            done += n as u64;
        }
        dst.flush()?;
        Ok(())
    }

    /// Decrypt every content of a CIA and rewrite its stub with the plain
    /// content hashes. In copy mode the destination is recreated.
    pub fn decrypt_cia_file(&mut self, source: &Path, destination: &Destination) -> Result<()> {
        if let Destination::Copy(dest) = destination {
            if self.storage.exists(dest) {
                self.storage.remove_file(dest)?;
            }
        }

        let mut stub = {
            let mut file = self.open(source, OpenMode::Read)?;
            CiaStub::read(&mut file)?
        };
        let info = stub.info();
        let title_key = if stub.tmd.chunks().iter().any(TmdContentChunk::is_encrypted) {
            Some(stub.ticket.title_key(&self.keyring)?)
        } else {
            None
        };

        let mut offset = info.offset_content;
        for chunk in stub.tmd.chunks_mut() {
            let size = chunk.size;
            self.copy_with_transform(
                source,
                destination,
                offset,
                size,
                TransformMode::CiaContent { chunk, title_key },
            )?;
            offset += size;
        }

        let stub_path = match destination {
            Destination::InPlace => source,
            Destination::Copy(dest) => {
                if info.size_meta > 0 {
                    self.copy_range(source, dest, info.offset_meta, info.size_meta)?;
                }
                dest.as_path()
            }
        };

        stub.tmd.fix_hashes();
        let mut file = self.open(stub_path, OpenMode::OpenOrCreate)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&stub.to_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Decrypt an NCSD, NCCH or CIA. Returns the path of the result: the
    /// input itself in place, otherwise a file in the output directory.
    pub fn decrypt_game_file(&mut self, path: &Path, in_place: bool) -> Result<PathBuf> {
        let file_type = self.identify_file_type(path)?;
        let destination = self.destination_for(path, in_place)?;
        let result = match file_type {
            Some(GameFileType::Cia) => self.decrypt_cia_file(path, &destination),
            Some(GameFileType::Ncch) => self.copy_with_transform(
                path,
                &destination,
                0,
                0,
                TransformMode::Ncch {
                    target: NcchCrypto::None,
                },
            ),
            Some(GameFileType::Ncsd) => self.copy_with_transform(
                path,
                &destination,
                0,
                0,
                TransformMode::Ncsd {
                    target: NcchCrypto::None,
                },
            ),
            _ => Err(CtrError::format(format!(
                "{} is not a decryptable 3DS file",
                path.display()
            ))),
        };
        self.finish_transform(path, destination, result)
    }

    /// Encrypt an NCSD or NCCH to `target`.
    pub fn encrypt_game_file(
        &mut self,
        path: &Path,
        in_place: bool,
        target: NcchCrypto,
    ) -> Result<PathBuf> {
        let file_type = self.identify_file_type(path)?;
        let destination = self.destination_for(path, in_place)?;
        let result = match file_type {
            Some(GameFileType::Ncch) => {
                self.copy_with_transform(path, &destination, 0, 0, TransformMode::Ncch { target })
            }
            Some(GameFileType::Ncsd) => {
                self.copy_with_transform(path, &destination, 0, 0, TransformMode::Ncsd { target })
            }
            _ => Err(CtrError::format(format!(
                "{} is not an encryptable NCSD or NCCH",
                path.display()
            ))),
        };
        self.finish_transform(path, destination, result)
    }

    fn destination_for(&self, path: &Path, in_place: bool) -> Result<Destination> {
        if in_place {
            return Ok(Destination::InPlace);
        }
        let dest = self.output_path(path, None)?;
        if dest == path {
            return Err(CtrError::format(format!(
                "{} is already in the output directory",
                path.display()
            )));
        }
        Ok(Destination::Copy(dest))
    }

    /// Remove a half-written copy on failure.
    fn finish_transform(
        &self,
        path: &Path,
        destination: Destination,
        result: Result<()>,
    ) -> Result<PathBuf> {
        match (result, destination) {
            (Ok(()), Destination::InPlace) => Ok(path.to_path_buf()),
            (Ok(()), Destination::Copy(dest)) => Ok(dest),
            (Err(e), Destination::Copy(dest)) => {
                if self.storage.exists(&dest) {
                    if let Err(rm) = self.storage.remove_file(&dest) {
                        log::warn!("Could not remove {}: {}", dest.display(), rm);
                    }
                }
                Err(e)
            }
            (Err(e), Destination::InPlace) => Err(e),
        }
    }

    // -----------------------------------------------------------------------
    // Encryption checks
    // -----------------------------------------------------------------------

    pub fn check_encrypted_ncch(&self, path: &Path, offset: u64) -> Result<bool> {
        let mut file = self.open(path, OpenMode::Read)?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(NcchHeader::read(&mut file)?.is_encrypted())
    }

    /// Whether any present partition is encrypted.
    pub fn check_encrypted_ncsd(&self, path: &Path) -> Result<bool> {
        let mut file = self.open(path, OpenMode::Read)?;
        let ncsd = NcsdHeader::read(&mut file)?;
        for (index, offset, _) in ncsd.present_partitions() {
            file.seek(SeekFrom::Start(offset))?;
            match NcchHeader::read(&mut file) {
                Ok(header) if header.is_encrypted() => return Ok(true),
                Ok(_) => {}
                Err(e) => log::debug!("Partition {} of {}: {}", index, path.display(), e),
            }
        }
        Ok(false)
    }

    /// Whether any content carries the CIA encryption flag or starts with an
    /// encrypted NCCH.
    pub fn check_encrypted_cia(&self, path: &Path) -> Result<bool> {
        let mut file = self.open(path, OpenMode::Read)?;
        let stub = CiaStub::read(&mut file)?;
        let file_len = file.len()?;
        // None once the chunk table points past anything addressable.
        let mut offset = Some(stub.info().offset_content);
        for chunk in stub.tmd.chunks() {
            if chunk.is_encrypted() {
                return Ok(true);
            }
            if let Some(start) = offset.filter(|&o| o.saturating_add(NCCH_HEADER_SIZE as u64) <= file_len) {
                file.seek(SeekFrom::Start(start))?;
                if let Ok(header) = NcchHeader::read(&mut file) {
                    if header.is_encrypted() {
                        return Ok(true);
                    }
                }
            }
            offset = offset.and_then(|o| o.checked_add(chunk.size));
        }
        Ok(false)
    }

    pub fn check_encrypted_game_file(&self, path: &Path) -> Result<bool> {
        match self.identify_file_type(path)? {
            Some(GameFileType::Ncch) => self.check_encrypted_ncch(path, 0),
            Some(GameFileType::Ncsd) => self.check_encrypted_ncsd(path),
            Some(GameFileType::Cia) => self.check_encrypted_cia(path),
            Some(GameFileType::Tmd) | None => Ok(false),
        }
    }
}
