use super::*;

#[test]
fn test_scramble_key_vector() {
    let key_x = [
        0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D,
        0x0E, 0x0F,
    ];
    let key_y = [
        0xF0, 0xE0, 0xD0, 0xC0, 0xB0, 0xA0, 0x90, 0x80, 0x70, 0x60, 0x50, 0x40, 0x30, 0x20,
        0x10, 0x00,
    ];
    assert_eq!(
        scramble_key(&key_x, &key_y),
        parse_hex::<16>("242EB34F63086F613BB3594652294505").unwrap()
    );
}

#[test]
fn test_scramble_zero_inputs() {
    assert_eq!(
        scramble_key(&[0; 16], &[0; 16]),
        parse_hex::<16>("EE2EA93B450FFCF4D562FF02040122C8").unwrap()
    );
}

#[test]
fn test_normal_key_requires_key_x() {
    let keyring = Keyring::new();
    let err = keyring.normal_key(0x2C, &[0; 16]).unwrap_err();
    assert_eq!(err.kind(), ctrpack_core::ErrorKind::Crypto);

    let keyring = keyring.with_key_x(0x2C, [0; 16]);
    assert!(keyring.normal_key(0x2C, &[0; 16]).is_ok());
    assert!(keyring.normal_key(0x25, &[0; 16]).is_err());
}

#[test]
fn test_common_key_index_bounds() {
    let keyring = Keyring::new()
        .with_key_x(COMMON_KEY_SLOT, [1; 16])
        .with_common_key_y(1, [2; 16]);
    assert_eq!(
        keyring.common_key(1).unwrap(),
        scramble_key(&[1; 16], &[2; 16])
    );
    assert!(keyring.common_key(0).is_err());
    assert!(keyring.common_key(COMMON_KEY_COUNT).is_err());
}

#[test]
fn test_keyring_from_toml() {
    let text = r#"
fixed_system_key = "00112233445566778899AABBCCDDEEFF"

[key_x]
0x2C = "000102030405060708090A0B0C0D0E0F"
25 = "0x0F0E0D0C0B0A09080706050403020100"

[common_key_y]
0 = "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF"

[seeds]
0004000000ABCDEF = "A0A1A2A3A4A5A6A7A8A9AAABACADAEAF"
"#;
    let keyring = Keyring::from_toml_str(text).unwrap();
    assert_eq!(keyring.key_x(0x2C).unwrap()[1], 0x01);
    assert_eq!(keyring.key_x(0x25).unwrap()[0], 0x0F);
    assert_eq!(keyring.fixed_system_key().unwrap()[0], 0x00);
    assert_eq!(keyring.seed(0x0004000000ABCDEF).unwrap()[15], 0xAF);
    assert!(keyring.common_key_y.contains_key(&0));
}

#[test]
fn test_keyring_rejects_short_key() {
    let text = "[key_x]\n0x2C = \"0011\"\n";
    let err = Keyring::from_toml_str(text).unwrap_err();
    assert_eq!(err.kind(), ctrpack_core::ErrorKind::Format);
}

#[test]
fn test_keyring_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keys.toml");
    std::fs::write(&path, "[key_x]\n0x18 = \"000102030405060708090A0B0C0D0E0F\"\n").unwrap();
    let keyring = Keyring::load(&path).unwrap();
    assert!(keyring.key_x(0x18).is_some());
}
