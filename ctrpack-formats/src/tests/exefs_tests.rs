use super::*;
use crate::fixtures::{exefs_header_bytes, set_exefs_entry};

#[test]
fn test_file_table() {
    let exefs = ExeFsHeader::from_bytes(&exefs_header_bytes()).unwrap();
    let files: Vec<_> = exefs.files().collect();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].name, ".code");
    assert_eq!(files[1].name, "icon");
    assert_eq!(files[1].offset, 0x200);
    assert_eq!(exefs.find("icon").map(|f| f.index), Some(1));
    assert!(exefs.find("banner").is_none());
}

#[test]
fn test_hashes_stored_reversed() {
    let exefs = ExeFsHeader::from_bytes(&exefs_header_bytes()).unwrap();
    assert_eq!(exefs.hash(0), [0x11; 32]);
    assert_eq!(exefs.hash(1), [0x22; 32]);
    assert_eq!(exefs.hash(9), [0u8; 32]);
}

#[test]
fn test_validate_ok() {
    let exefs = ExeFsHeader::from_bytes(&exefs_header_bytes()).unwrap();
    assert!(exefs.validate(0x800).is_ok());
}

#[test]
fn test_validate_exceeds_size() {
    let exefs = ExeFsHeader::from_bytes(&exefs_header_bytes()).unwrap();
    // 0x200 header + 0x280 file data
    assert!(exefs.validate(0x47F).is_err());
    assert!(exefs.validate(0x480).is_ok());
}

#[test]
fn test_validate_misaligned() {
    let mut buf = exefs_header_bytes();
    set_exefs_entry(&mut buf, 1, b"icon", 0x180, 0x80);
    let exefs = ExeFsHeader::from_bytes(&buf).unwrap();
    assert!(exefs.validate(0x800).is_err());
}

#[test]
fn test_validate_overlap() {
    let mut buf = exefs_header_bytes();
    set_exefs_entry(&mut buf, 0, b".code", 0, 0x300);
    let exefs = ExeFsHeader::from_bytes(&buf).unwrap();
    assert!(exefs.validate(0x800).is_err());
}

#[test]
fn test_validate_bad_name() {
    let mut buf = exefs_header_bytes();
    set_exefs_entry(&mut buf, 1, b"ic\x01n", 0x200, 0x80);
    let exefs = ExeFsHeader::from_bytes(&buf).unwrap();
    assert!(exefs.validate(0x800).is_err());
}

#[test]
fn test_validate_unused_entry_with_hash() {
    let mut buf = exefs_header_bytes();
    // hash slot of entry 5
    buf[0xC0 + 4 * 0x20] = 0x01;
    let exefs = ExeFsHeader::from_bytes(&buf).unwrap();
    assert!(exefs.validate(0x800).is_err());
}

#[test]
fn test_truncated() {
    assert!(ExeFsHeader::from_bytes(&[0u8; 0x1FF]).is_err());
}
