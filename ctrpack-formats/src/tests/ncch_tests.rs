use super::*;
use crate::fixtures::{PROGRAM_ID, exefs_header_bytes, ncch_header_bytes, set_region};
use crate::ncch_crypto::NcchCipher;
use ctrpack_core::ErrorKind;
use std::io::{Cursor, Seek};

#[test]
fn test_parse_fields() {
    let ncch = NcchHeader::from_bytes(&ncch_header_bytes()).unwrap();
    assert_eq!(ncch.program_id, PROGRAM_ID);
    assert_eq!(ncch.partition_id, PROGRAM_ID);
    assert_eq!(ncch.product_code, "CTR-P-TEST");
    assert_eq!(ncch.content_size(), 0x4000);
    assert_eq!(ncch.exefs_offset(), 0xA00);
    assert_eq!(ncch.exefs_size(), 0x800);
    assert_eq!(ncch.exefs_hash_size(), 0x200);
    assert_eq!(ncch.romfs_offset(), 0x1200);
    assert_eq!(ncch.romfs_hash_size(), 0x200);
    assert_eq!(ncch.key_y[0], 0xA0);
    assert!(ncch.has_exheader());
    assert!(!ncch.is_encrypted());
    assert_eq!(ncch.crypto().unwrap(), NcchCrypto::None);
    assert_eq!(&ncch.raw()[..], &ncch_header_bytes()[..]);
}

#[test]
fn test_bad_exheader_size() {
    let mut buf = ncch_header_bytes();
    buf[0x180..0x184].copy_from_slice(&0x300u32.to_le_bytes());
    let err = NcchHeader::from_bytes(&buf).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
}

#[test]
fn test_exefs_overlapping_exheader() {
    let mut buf = ncch_header_bytes();
    set_region(&mut buf, 0x1A0, 3, 2, 1);
    assert!(NcchHeader::from_bytes(&buf).is_err());
}

#[test]
fn test_exefs_without_exheader_may_start_early() {
    let mut buf = ncch_header_bytes();
    buf[0x180..0x184].fill(0);
    set_region(&mut buf, 0x1A0, 1, 2, 1);
    assert!(NcchHeader::from_bytes(&buf).is_ok());
}

#[test]
fn test_romfs_beyond_content_size() {
    let mut buf = ncch_header_bytes();
    set_region(&mut buf, 0x1B0, 9, 0x18, 1);
    assert!(NcchHeader::from_bytes(&buf).is_err());
}

#[test]
fn test_hash_region_larger_than_region() {
    let mut buf = ncch_header_bytes();
    set_region(&mut buf, 0x1A0, 5, 4, 5);
    assert!(NcchHeader::from_bytes(&buf).is_err());
}

#[test]
fn test_media_unit_exponent_bounds() {
    let mut buf = ncch_header_bytes();
    buf[0x18E] = 1;
    let ncch = NcchHeader::from_bytes(&buf).unwrap();
    assert_eq!(ncch.media_unit(), 0x400);
    assert_eq!(ncch.exefs_offset(), 5 * 0x400);

    buf[0x18E] = 0x40;
    let err = NcchHeader::from_bytes(&buf).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
}

#[test]
fn test_missing_magic() {
    let mut buf = ncch_header_bytes();
    buf[0x103] = 0;
    assert!(NcchHeader::from_bytes(&buf).is_err());
}

fn header_with_flags(flags3: u8, flags7: u8) -> NcchHeader {
    let mut buf = ncch_header_bytes();
    buf[0x18B] = flags3;
    buf[0x18F] = flags7;
    NcchHeader::from_bytes(&buf).unwrap()
}

#[test]
fn test_crypto_decoding() {
    assert_eq!(
        header_with_flags(0x00, 0x00).crypto().unwrap(),
        NcchCrypto::Standard(CryptoMethod::Original)
    );
    assert_eq!(
        header_with_flags(0x0A, 0x00).crypto().unwrap(),
        NcchCrypto::Standard(CryptoMethod::Secure3)
    );
    assert_eq!(
        header_with_flags(0x01, 0x20).crypto().unwrap(),
        NcchCrypto::Seed(CryptoMethod::Secure2)
    );
    assert_eq!(header_with_flags(0x00, 0x01).crypto().unwrap(), NcchCrypto::FixedKey);
    // no-crypto wins over every other bit
    assert_eq!(header_with_flags(0x0B, 0x25).crypto().unwrap(), NcchCrypto::None);

    let err = header_with_flags(0x05, 0x00).crypto().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Crypto);
}

#[test]
fn test_method_slots() {
    for (flag, slot) in [(0x00, 0x2C), (0x01, 0x25), (0x0A, 0x18), (0x0B, 0x1B)] {
        let method = CryptoMethod::from_flag(flag).unwrap();
        assert_eq!(method.key_slot(), slot);
        assert_eq!(method.flag(), flag);
    }
    assert!(CryptoMethod::from_flag(0x02).is_none());
}

#[test]
fn test_with_crypto_rewrites_flags_only() {
    let plain = NcchHeader::from_bytes(&ncch_header_bytes()).unwrap();

    let enc = plain.with_crypto(NcchCrypto::Seed(CryptoMethod::Secure4));
    assert_eq!(enc.raw()[0x18B], 0x0B);
    assert_eq!(enc.raw()[0x18F], 0x20);
    assert_eq!(enc.crypto().unwrap(), NcchCrypto::Seed(CryptoMethod::Secure4));
    assert_eq!(&enc.raw()[..0x188], &plain.raw()[..0x188]);
    assert_eq!(&enc.raw()[0x190..], &plain.raw()[0x190..]);

    let fixed = enc.with_crypto(NcchCrypto::FixedKey);
    assert_eq!(fixed.raw()[0x18B], 0x00);
    assert_eq!(fixed.raw()[0x18F], 0x01);

    let back = fixed.with_crypto(NcchCrypto::None);
    assert_eq!(&back.raw()[..], &plain.raw()[..]);
}

/// NCCH image bytes: header, then the ExeFS header at 0xA00.
fn ncch_image(header: &[u8; 0x200], exefs: &[u8; 0x200]) -> Vec<u8> {
    let mut image = vec![0u8; 0x4000];
    image[..0x200].copy_from_slice(header);
    image[0xA00..0xC00].copy_from_slice(exefs);
    image
}

#[test]
fn test_read_headers_plain() {
    let image = ncch_image(&ncch_header_bytes(), &exefs_header_bytes());
    let mut cursor = Cursor::new(image);
    let keyring = Keyring::new();

    let (ncch, exefs) = read_ncch_headers(&mut cursor, &keyring, true).unwrap();
    assert_eq!(ncch.program_id, PROGRAM_ID);
    let exefs = exefs.unwrap();
    assert_eq!(exefs.find(".code").map(|f| f.size), Some(0x100));

    cursor.rewind().unwrap();
    let (_, exefs) = read_ncch_headers(&mut cursor, &keyring, false).unwrap();
    assert!(exefs.is_none());
}

#[test]
fn test_read_headers_at_offset() {
    let mut image = vec![0xEEu8; 0x4000];
    image.extend(ncch_image(&ncch_header_bytes(), &exefs_header_bytes()));
    let mut cursor = Cursor::new(image);
    cursor.seek(std::io::SeekFrom::Start(0x4000)).unwrap();
    let (_, exefs) = read_ncch_headers(&mut cursor, &Keyring::new(), true).unwrap();
    assert_eq!(exefs.unwrap().files().count(), 2);
}

#[test]
fn test_read_headers_decrypts_exefs() {
    let mut header = ncch_header_bytes();
    header[0x18F] = 0x01;
    let parsed = NcchHeader::from_bytes(&header).unwrap();
    let keyring = Keyring::new();

    let mut exefs = exefs_header_bytes();
    let cipher = NcchCipher::new(&parsed, NcchCrypto::FixedKey, None, &keyring)
        .unwrap()
        .unwrap();
    cipher.apply(&mut exefs, parsed.exefs_offset()).unwrap();
    assert_ne!(exefs, exefs_header_bytes());

    let mut cursor = Cursor::new(ncch_image(&header, &exefs));
    let (_, decoded) = read_ncch_headers(&mut cursor, &keyring, true).unwrap();
    assert_eq!(decoded.unwrap().raw(), &exefs_header_bytes());
}

#[test]
fn test_read_headers_garbage_exefs() {
    let mut exefs = [0u8; 0x200];
    exefs[..8].copy_from_slice(b"\x01\x02\x03\x04\x05\x06\x07\x08");
    exefs[12] = 0x10;
    let mut cursor = Cursor::new(ncch_image(&ncch_header_bytes(), &exefs));
    assert!(read_ncch_headers(&mut cursor, &Keyring::new(), true).is_err());
}
