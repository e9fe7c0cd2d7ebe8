//! Synthetic structures shared by the unit tests.

use crate::exefs::EXEFS_HEADER_SIZE;
use crate::{NCCH_MAGIC, NCSD_MAGIC};

pub const PROGRAM_ID: u64 = 0x00040000_00ABCD00;

/// NCCH header of a 0x20-unit NoCrypto NCCH: ExtHeader, ExeFS at unit 5
/// (4 units, 1 hashed), RomFS at unit 9 (8 units, 1 hashed).
pub fn ncch_header_bytes() -> [u8; 0x200] {
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
    h[0x180..0x184].copy_from_slice(&0x400u32.to_le_bytes());
    h[0x18F] = 0x04;
    set_region(&mut h, 0x1A0, 5, 4, 1);
    set_region(&mut h, 0x1B0, 9, 8, 1);
    h
}

/// Write an (offset, size, hash size) triple in media units.
pub fn set_region(h: &mut [u8], at: usize, offset: u32, size: u32, hash_size: u32) {
    h[at..at + 4].copy_from_slice(&offset.to_le_bytes());
    h[at + 4..at + 8].copy_from_slice(&size.to_le_bytes());
    h[at + 8..at + 12].copy_from_slice(&hash_size.to_le_bytes());
}

/// ExeFS header with `.code` (0x100 bytes at 0) and `icon` (0x80 bytes at 0x200).
pub fn exefs_header_bytes() -> [u8; EXEFS_HEADER_SIZE] {
    let mut h = [0u8; EXEFS_HEADER_SIZE];
    set_exefs_entry(&mut h, 0, b".code", 0, 0x100);
    set_exefs_entry(&mut h, 1, b"icon", 0x200, 0x80);
    // hashes: file i at 0xC0 + (9 - i) * 0x20
    h[0x1E0..0x200].fill(0x11);
    h[0x1C0..0x1E0].fill(0x22);
    h
}

pub fn set_exefs_entry(h: &mut [u8], index: usize, name: &[u8], offset: u32, size: u32) {
    let base = index * 0x10;
    h[base..base + 8].fill(0);
    h[base..base + name.len()].copy_from_slice(name);
    h[base + 8..base + 12].copy_from_slice(&offset.to_le_bytes());
    h[base + 12..base + 16].copy_from_slice(&size.to_le_bytes());
}

/// NCSD header with partitions given as (offset, size) in media units.
pub fn ncsd_header_bytes(image_size_mu: u32, partitions: &[(u32, u32)]) -> [u8; 0x200] {
    let mut h = [0u8; 0x200];
    h[0x100..0x104].copy_from_slice(&NCSD_MAGIC);
    h[0x104..0x108].copy_from_slice(&image_size_mu.to_le_bytes());
    h[0x108..0x110].copy_from_slice(&PROGRAM_ID.to_le_bytes());
    for (i, (offset, size)) in partitions.iter().enumerate() {
        let base = 0x120 + i * 8;
        h[base..base + 4].copy_from_slice(&offset.to_le_bytes());
        h[base + 4..base + 8].copy_from_slice(&size.to_le_bytes());
    }
    h
}

/// TMD bytes with `count` chunks (id 0x100 + i, index i, 0x400 bytes each),
/// declaring `declared` contents and one content-info record covering them.
pub fn tmd_bytes(count: usize, declared: u16) -> Vec<u8> {
    let mut t = vec![0u8; crate::tmd::tmd_size(count)];
    t[..4].copy_from_slice(&[0x00, 0x01, 0x00, 0x04]);
    t[0x18C..0x194].copy_from_slice(&PROGRAM_ID.to_be_bytes());
    t[0x1DC..0x1DE].copy_from_slice(&0x0410u16.to_be_bytes());
    t[0x1DE..0x1E0].copy_from_slice(&declared.to_be_bytes());
    // content info record 0: index offset 0, command count
    t[0x204..0x206].copy_from_slice(&0u16.to_be_bytes());
    t[0x206..0x208].copy_from_slice(&(declared.min(count as u16)).to_be_bytes());
    for i in 0..count {
        let base = 0xB04 + i * 0x30;
        t[base..base + 4].copy_from_slice(&(0x100 + i as u32).to_be_bytes());
        t[base + 4..base + 6].copy_from_slice(&(i as u16).to_be_bytes());
        t[base + 8..base + 16].copy_from_slice(&0x400u64.to_be_bytes());
    }
    t
}
