use super::*;
use std::io::{Cursor, Seek};

use ctrpack_formats::Ticket;
use ctrpack_formats::tmd::{TMD_SIG_TYPE, TMD_SIZE_MIN};

#[test]
fn test_unknown_data() {
    let mut cursor = Cursor::new(vec![0x5Au8; 0x4000]);
    assert_eq!(identify_file_type(&mut cursor).unwrap(), None);
}

#[test]
fn test_empty_file() {
    let mut cursor = Cursor::new(Vec::new());
    assert_eq!(identify_file_type(&mut cursor).unwrap(), None);
}

#[test]
fn test_bare_tmd() {
    let mut tmd = vec![0u8; TMD_SIZE_MIN];
    tmd[..4].copy_from_slice(&TMD_SIG_TYPE);
    let mut cursor = Cursor::new(tmd);
    assert_eq!(
        identify_file_type(&mut cursor).unwrap(),
        Some(GameFileType::Tmd)
    );
}

#[test]
fn test_ticket_is_not_a_game_file() {
    let mut cursor = Cursor::new(Ticket::fake(0x0004000000ABCD00).as_bytes().to_vec());
    assert_eq!(identify_file_type(&mut cursor).unwrap(), None);
}

#[test]
fn test_cursor_rewound() {
    let mut cursor = Cursor::new(vec![0u8; 0x3000]);
    cursor.set_position(0x1234);
    identify_file_type(&mut cursor).unwrap();
    assert_eq!(cursor.stream_position().unwrap(), 0);
}
