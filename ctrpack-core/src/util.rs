//! Byte-field helpers shared by the format crates.
//!
//! 3DS structures mix little-endian (NCSD, NCCH, ExeFS, CIA header) and
//! big-endian (TMD, ticket) fields. Every field access goes through these
//! accessors on fixed-layout byte buffers rather than through struct casts.

pub fn read_u16_le(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

pub fn read_u32_le(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

pub fn read_u64_le(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

pub fn read_u16_be(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

pub fn read_u32_be(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

pub fn read_u64_be(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_be_bytes(bytes)
}

pub fn write_u16_be(buf: &mut [u8], offset: usize, val: u16) {
    buf[offset..offset + 2].copy_from_slice(&val.to_be_bytes());
}

pub fn write_u64_be(buf: &mut [u8], offset: usize, val: u64) {
    buf[offset..offset + 8].copy_from_slice(&val.to_be_bytes());
}

pub fn write_u32_le(buf: &mut [u8], offset: usize, val: u32) {
    buf[offset..offset + 4].copy_from_slice(&val.to_le_bytes());
}

pub fn write_u64_le(buf: &mut [u8], offset: usize, val: u64) {
    buf[offset..offset + 8].copy_from_slice(&val.to_le_bytes());
}

/// Copy a 32-byte hash out of a buffer.
pub fn read_hash(buf: &[u8], offset: usize) -> [u8; 32] {
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&buf[offset..offset + 32]);
    hash
}

/// Align a value up to a 64-byte boundary.
pub fn align64(val: u64) -> u64 {
    (val + 63) & !63
}

/// Check if a byte slice is all zeros.
pub fn is_all_zeros(buf: &[u8]) -> bool {
    buf.iter().all(|&b| b == 0)
}

pub fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Parse a hex string (optionally `0x`-prefixed) into exactly `N` bytes.
pub fn parse_hex<const N: usize>(s: &str) -> Option<[u8; N]> {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if s.len() != N * 2 || !s.is_ascii() {
        return None;
    }
    let mut out = [0u8; N];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(out)
}

/// Read a null-terminated ASCII string from a byte slice.
///
/// Stops at the first null byte, filters out non-printable characters,
/// and returns the result. No trimming is performed.
pub fn read_ascii(buf: &[u8]) -> String {
    buf.iter()
        .take_while(|&&b| b != 0)
        .filter(|&&b| (0x20..0x7F).contains(&b))
        .map(|&b| b as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align64() {
        assert_eq!(align64(0), 0);
        assert_eq!(align64(1), 64);
        assert_eq!(align64(64), 64);
        assert_eq!(align64(65), 128);
        assert_eq!(align64(0x2020), 0x2040);
    }

    #[test]
    fn test_mixed_endianness() {
        let buf = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(read_u16_le(&buf, 0), 0x0201);
        assert_eq!(read_u16_be(&buf, 0), 0x0102);
        assert_eq!(read_u32_le(&buf, 4), 0x08070605);
        assert_eq!(read_u32_be(&buf, 4), 0x05060708);
        assert_eq!(read_u64_be(&buf, 0), 0x0102030405060708);
        assert_eq!(read_u64_le(&buf, 0), 0x0807060504030201);
    }

    #[test]
    fn test_writers_match_readers() {
        let mut buf = [0u8; 16];
        write_u64_be(&mut buf, 0, 0xDEADBEEF_00C0FFEE);
        write_u16_be(&mut buf, 8, 0x1234);
        write_u32_le(&mut buf, 10, 0xAABBCCDD);
        assert_eq!(read_u64_be(&buf, 0), 0xDEADBEEF_00C0FFEE);
        assert_eq!(read_u16_be(&buf, 8), 0x1234);
        assert_eq!(read_u32_le(&buf, 10), 0xAABBCCDD);
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex::<2>("0xBEEF"), Some([0xBE, 0xEF]));
        assert_eq!(parse_hex::<2>("beef"), Some([0xBE, 0xEF]));
        assert_eq!(parse_hex::<2>("bee"), None);
        assert_eq!(parse_hex::<2>("zzzz"), None);
        assert_eq!(hex_string(&[0xBE, 0xEF]), "beef");
    }

    #[test]
    fn test_read_ascii() {
        assert_eq!(read_ascii(b"icon\0\0\0\0"), "icon");
        assert_eq!(read_ascii(b".code\0\0\0"), ".code");
        assert_eq!(read_ascii(b"\0"), "");
    }

    #[test]
    fn test_is_all_zeros() {
        assert!(is_all_zeros(&[0, 0, 0]));
        assert!(!is_all_zeros(&[0, 1, 0]));
        assert!(is_all_zeros(&[]));
    }
}
