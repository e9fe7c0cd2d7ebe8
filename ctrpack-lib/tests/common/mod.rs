//! Synthetic titles shared by the integration tests.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;

use ctrpack_core::Interaction;
use ctrpack_core::util::align64;
use ctrpack_formats::cia::CIA_META_SIZE;
use ctrpack_formats::crypto::{ContentCipher, cbc_encrypt};
use ctrpack_formats::{
    CiaMeta, CiaStub, ExeFsHeader, Keyring, NCCH_MAGIC, NCSD_MAGIC, NcchCipher, NcchCrypto,
    NcchHeader, Ticket, TitleMetaData,
};
use ctrpack_lib::{CtrContext, Settings};
use sha2::{Digest, Sha256};

pub const PROGRAM_ID: u64 = 0x0004000000ABCD00;
pub const TITLE_KEY: [u8; 16] = [
    0x7A, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x0F,
];

pub const NCCH_SIZE: usize = 0x4000;
pub const EXHEADER_OFFSET: usize = 0x200;
pub const EXEFS_OFFSET: usize = 0xA00;
pub const ROMFS_OFFSET: usize = 0x1200;
pub const CODE_OFFSET: usize = EXEFS_OFFSET + 0x200;
pub const CODE_SIZE: usize = 0x100;
pub const ICON_OFFSET: usize = EXEFS_OFFSET + 0x400;
pub const ICON_SIZE: usize = 0x80;

pub fn sha(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Keys for every slot the fixtures use; the values are arbitrary.
pub fn keyring() -> Keyring {
    Keyring::new()
        .with_key_x(0x2C, [0x2C; 16])
        .with_key_x(0x25, [0x25; 16])
        .with_key_x(0x18, [0x18; 16])
        .with_key_x(0x1B, [0x1B; 16])
        .with_key_x(0x3D, [0x3D; 16])
        .with_common_key_y(1, [0xC1; 16])
}

/// Context writing to `<dir>/out` with a small buffer, so every region
/// spans several chunks.
pub fn context(dir: &Path, keyring: Keyring) -> CtrContext {
    let settings = Settings {
        output_dir: dir.join("out"),
        buffer_size: 0x400,
        ..Settings::default()
    };
    CtrContext::new(settings, keyring).with_interaction(Box::new(Recorder::default()))
}

/// Interaction that records prompts and can cancel after a number of
/// progress reports.
#[derive(Debug, Default, Clone)]
pub struct Recorder {
    pub prompts: Rc<RefCell<Vec<String>>>,
    pub cancel_after: Option<usize>,
    calls: Rc<Cell<usize>>,
}

impl Recorder {
    pub fn cancelling_after(calls: usize) -> Self {
        Self {
            cancel_after: Some(calls),
            ..Self::default()
        }
    }
}

impl Interaction for Recorder {
    fn progress(&self, _done: u64, _total: u64, _label: &str) -> bool {
        let calls = self.calls.get() + 1;
        self.calls.set(calls);
        self.cancel_after.is_none_or(|limit| calls <= limit)
    }

    fn prompt(&self, message: &str) -> bool {
        self.prompts.borrow_mut().push(message.to_string());
        true
    }
}

// ---------------------------------------------------------------------------
// NCCH / NCSD
// ---------------------------------------------------------------------------

fn set_exefs_entry(h: &mut [u8], index: usize, name: &[u8], offset: u32, size: u32) {
    let base = index * 0x10;
    h[base..base + name.len()].copy_from_slice(name);
    h[base + 8..base + 12].copy_from_slice(&offset.to_le_bytes());
    h[base + 12..base + 16].copy_from_slice(&size.to_le_bytes());
}

fn set_region(h: &mut [u8], at: usize, offset: u32, size: u32, hash_size: u32) {
    h[at..at + 4].copy_from_slice(&offset.to_le_bytes());
    h[at + 4..at + 8].copy_from_slice(&size.to_le_bytes());
    h[at + 8..at + 12].copy_from_slice(&hash_size.to_le_bytes());
}

/// Plaintext 0x4000-byte NCCH: ExtHeader, ExeFS (`.code` and `icon`) at
/// 0xA00 and, optionally, a RomFS at 0x1200. All hashes are valid.
pub fn build_ncch(fill: u8, with_romfs: bool) -> Vec<u8> {
    let mut image: Vec<u8> = (0..NCCH_SIZE)
        .map(|i| (i as u8).wrapping_mul(7) ^ fill)
        .collect();

    let mut exefs = [0u8; 0x200];
    set_exefs_entry(&mut exefs, 0, b".code", 0, CODE_SIZE as u32);
    set_exefs_entry(&mut exefs, 1, b"icon", 0x200, ICON_SIZE as u32);
    exefs[0x1E0..0x200].copy_from_slice(&sha(&image[CODE_OFFSET..CODE_OFFSET + CODE_SIZE]));
    exefs[0x1C0..0x1E0].copy_from_slice(&sha(&image[ICON_OFFSET..ICON_OFFSET + ICON_SIZE]));
    image[EXEFS_OFFSET..EXEFS_OFFSET + 0x200].copy_from_slice(&exefs);

    let mut h = [0u8; 0x200];
    for (i, b) in h[..0x10].iter_mut().enumerate() {
        *b = 0xA0 + i as u8;
    }
    h[0x100..0x104].copy_from_slice(&NCCH_MAGIC);
    h[0x104..0x108].copy_from_slice(&0x20u32.to_le_bytes());
    h[0x108..0x110].copy_from_slice(&PROGRAM_ID.to_le_bytes());
    h[0x112..0x114].copy_from_slice(&2u16.to_le_bytes());
    h[0x118..0x120].copy_from_slice(&PROGRAM_ID.to_le_bytes());
    h[0x150..0x15A].copy_from_slice(b"CTR-P-TEST");
    h[0x160..0x180].copy_from_slice(&sha(&image[EXHEADER_OFFSET..EXHEADER_OFFSET + 0x400]));
    h[0x180..0x184].copy_from_slice(&0x400u32.to_le_bytes());
    h[0x18F] = 0x04;
    set_region(&mut h, 0x1A0, 5, 4, 1);
    h[0x1C0..0x1E0].copy_from_slice(&sha(&image[EXEFS_OFFSET..EXEFS_OFFSET + 0x200]));
    if with_romfs {
        set_region(&mut h, 0x1B0, 9, 8, 1);
        h[0x1E0..0x200].copy_from_slice(&sha(&image[ROMFS_OFFSET..ROMFS_OFFSET + 0x200]));
    }
    image[..0x200].copy_from_slice(&h);
    image
}

pub fn plain_ncch(fill: u8) -> Vec<u8> {
    build_ncch(fill, true)
}

/// Encrypt a plaintext NCCH as `crypto`, rewriting its flags.
pub fn encrypt_ncch(plain: &[u8], crypto: NcchCrypto, keyring: &Keyring) -> Vec<u8> {
    let header = NcchHeader::from_bytes(plain).unwrap().with_crypto(crypto);
    let exefs = ExeFsHeader::from_bytes(&plain[EXEFS_OFFSET..EXEFS_OFFSET + 0x200]).unwrap();
    let mut image = plain.to_vec();
    image[..0x200].copy_from_slice(header.raw());
    let cipher = NcchCipher::new(&header, crypto, Some(&exefs), keyring)
        .unwrap()
        .unwrap();
    cipher.apply(&mut image, 0).unwrap();
    image
}

/// NCSD image with the given partitions; `None` leaves a slot empty.
pub fn build_ncsd(partitions: &[Option<Vec<u8>>]) -> Vec<u8> {
    let mut image = vec![0u8; 0x4000];
    let mut h = [0u8; 0x200];
    h[0x100..0x104].copy_from_slice(&NCSD_MAGIC);
    h[0x108..0x110].copy_from_slice(&PROGRAM_ID.to_le_bytes());
    for (i, partition) in partitions.iter().enumerate() {
        if let Some(data) = partition {
            let base = 0x120 + i * 8;
            let offset = (image.len() / 0x200) as u32;
            let size = (data.len() / 0x200) as u32;
            h[base..base + 4].copy_from_slice(&offset.to_le_bytes());
            h[base + 4..base + 8].copy_from_slice(&size.to_le_bytes());
            image.extend_from_slice(data);
        }
    }
    let image_size = (image.len() / 0x200) as u32;
    h[0x104..0x108].copy_from_slice(&image_size.to_le_bytes());
    image[..0x200].copy_from_slice(&h);
    image
}

// ---------------------------------------------------------------------------
// TMD / ticket / CIA
// ---------------------------------------------------------------------------

/// One title content as it sits in a CIA once the CIA layer is removed.
#[derive(Debug, Clone)]
pub struct Content {
    pub id: u32,
    pub index: u16,
    pub data: Vec<u8>,
    pub encrypted: bool,
}

impl Content {
    pub fn new(id: u32, index: u16, data: Vec<u8>) -> Self {
        Self {
            id,
            index,
            data,
            encrypted: false,
        }
    }

    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }
}

/// TMD for `contents` with valid sizes, hashes and content-info hashes.
pub fn build_tmd(title_id: u64, contents: &[Content]) -> Vec<u8> {
    let count = contents.len();
    let mut t = vec![0u8; 0xB04 + count * 0x30];
    t[..4].copy_from_slice(&[0x00, 0x01, 0x00, 0x04]);
    t[0x18C..0x194].copy_from_slice(&title_id.to_be_bytes());
    t[0x1DE..0x1E0].copy_from_slice(&(count as u16).to_be_bytes());
    t[0x206..0x208].copy_from_slice(&(count as u16).to_be_bytes());
    for (i, c) in contents.iter().enumerate() {
        let base = 0xB04 + i * 0x30;
        t[base..base + 4].copy_from_slice(&c.id.to_be_bytes());
        t[base + 4..base + 6].copy_from_slice(&c.index.to_be_bytes());
        t[base + 6..base + 8].copy_from_slice(&(c.encrypted as u16).to_be_bytes());
        t[base + 8..base + 16].copy_from_slice(&(c.data.len() as u64).to_be_bytes());
        t[base + 16..base + 48].copy_from_slice(&sha(&c.data));
    }
    let mut tmd = TitleMetaData::from_bytes(&t).unwrap();
    tmd.fix_hashes();
    tmd.to_bytes()
}

/// Generated ticket carrying `title_key` encrypted with common key 1.
pub fn ticket_with_key(title_id: u64, title_key: &[u8; 16], keyring: &Keyring) -> Ticket {
    let mut raw = Ticket::fake(title_id).as_bytes().to_vec();
    let mut key = *title_key;
    let mut iv = [0u8; 16];
    iv[..8].copy_from_slice(&title_id.to_be_bytes());
    cbc_encrypt(&keyring.common_key(1).unwrap(), &mut iv, &mut key).unwrap();
    raw[0x1BF..0x1CF].copy_from_slice(&key);
    Ticket::from_bytes(&raw).unwrap()
}

/// Same ticket with a signature that passes as eShop-issued.
pub fn legit(ticket: &Ticket) -> Ticket {
    let mut raw = ticket.as_bytes().to_vec();
    raw[0x04..0x104].fill(0x5A);
    Ticket::from_bytes(&raw).unwrap()
}

/// CIA holding `contents`; flagged contents get the CIA layer under
/// [`TITLE_KEY`]. With `meta`, a meta block is appended.
pub fn build_cia(contents: &[Content], keyring: &Keyring, meta: Option<&CiaMeta>) -> Vec<u8> {
    let tmd = TitleMetaData::from_bytes(&build_tmd(PROGRAM_ID, contents)).unwrap();
    let ticket = ticket_with_key(PROGRAM_ID, &TITLE_KEY, keyring);
    let mut stub = CiaStub::new(vec![0u8; 0xA00], ticket, tmd).unwrap();
    if meta.is_some() {
        stub.header.meta_size = CIA_META_SIZE;
    }

    let mut out = stub.to_bytes();
    for c in contents {
        let mut data = c.data.clone();
        if c.encrypted {
            ContentCipher::new(&TITLE_KEY, c.index)
                .encrypt(&mut data)
                .unwrap();
        }
        out.extend_from_slice(&data);
    }
    if let Some(meta) = meta {
        out.resize(align64(out.len() as u64) as usize, 0);
        out.extend_from_slice(meta.as_bytes());
    }
    out
}

/// Content bytes of a CIA file, CIA layer still applied.
pub fn cia_content(cia: &[u8], index: usize) -> &[u8] {
    let stub = CiaStub::read(&mut std::io::Cursor::new(cia.to_vec())).unwrap();
    let mut offset = stub.info().offset_content as usize;
    for chunk in &stub.tmd.chunks()[..index] {
        offset += chunk.size as usize;
    }
    let size = stub.tmd.chunks()[index].size as usize;
    &cia[offset..offset + size]
}

pub fn read_stub(path: &Path) -> CiaStub {
    let mut file = std::fs::File::open(path).unwrap();
    CiaStub::read(&mut file).unwrap()
}
