//! Tickets: the per-title record carrying the encrypted title key.

use ctrpack_core::util::{read_u32_be, read_u64_be};
use ctrpack_core::{CtrError, Result};

use crate::crypto::cbc_decrypt;
use crate::keys::Keyring;

pub const TICKET_SIZE: usize = 0x350;

/// RSA-2048 / SHA-256 signature type.
pub const TICKET_SIG_TYPE: [u8; 4] = [0x00, 0x01, 0x00, 0x04];

pub const TICKET_ISSUER: &str = "Root-CA00000003-XS0000000c";

const SIGNATURE: std::ops::Range<usize> = 0x004..0x104;
const ISSUER: usize = 0x140;
const ECDSA: std::ops::Range<usize> = 0x180..0x1BC;
const VERSION: usize = 0x1BC;
const TITLE_KEY: usize = 0x1BF;
const TICKET_ID: usize = 0x1D0;
const CONSOLE_ID: usize = 0x1D8;
const TITLE_ID: usize = 0x1DC;
const COMMON_KEY_INDEX: usize = 0x1F1;
const ESHOP_ID: usize = 0x21C;
const AUDIT: usize = 0x221;
const CONTENT_INDEX: usize = 0x2A4;

/// Content index blob of a generated ticket: all contents accessible.
const GENERIC_CONTENT_INDEX: [u8; 0x58] = [
    0x00, 0x01, 0x00, 0x14, 0x00, 0x00, 0x00, 0xAC, 0x00, 0x00, 0x00, 0x14, 0x00, 0x01, 0x00, 0x14,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x28, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x84,
    0x00, 0x00, 0x00, 0x84, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    raw: Vec<u8>,
}

impl Ticket {
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < TICKET_SIZE {
            return Err(CtrError::format("Ticket truncated"));
        }
        if buf[..4] != TICKET_SIG_TYPE {
            return Err(CtrError::format("Unsupported ticket signature type"));
        }
        Ok(Self {
            raw: buf[..TICKET_SIZE].to_vec(),
        })
    }

    /// Generate an unsigned ticket for `title_id`.
    pub fn fake(title_id: u64) -> Self {
        let mut raw = vec![0u8; TICKET_SIZE];
        raw[..4].copy_from_slice(&TICKET_SIG_TYPE);
        raw[SIGNATURE].fill(0xFF);
        raw[ISSUER..ISSUER + TICKET_ISSUER.len()].copy_from_slice(TICKET_ISSUER.as_bytes());
        raw[ECDSA].fill(0xFF);
        raw[VERSION] = 0x01;
        raw[TITLE_KEY..TITLE_KEY + 16].fill(0xFF);
        raw[TITLE_ID..TITLE_ID + 8].copy_from_slice(&title_id.to_be_bytes());
        raw[COMMON_KEY_INDEX] = 0x01;
        raw[AUDIT] = 0x01;
        raw[CONTENT_INDEX..CONTENT_INDEX + GENERIC_CONTENT_INDEX.len()]
            .copy_from_slice(&GENERIC_CONTENT_INDEX);
        Self { raw }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn title_id(&self) -> u64 {
        read_u64_be(&self.raw, TITLE_ID)
    }

    pub fn ticket_id(&self) -> u64 {
        read_u64_be(&self.raw, TICKET_ID)
    }

    pub fn console_id(&self) -> u32 {
        read_u32_be(&self.raw, CONSOLE_ID)
    }

    pub fn eshop_id(&self) -> u32 {
        read_u32_be(&self.raw, ESHOP_ID)
    }

    pub fn common_key_index(&self) -> u8 {
        self.raw[COMMON_KEY_INDEX]
    }

    pub fn encrypted_title_key(&self) -> [u8; 16] {
        let mut key = [0u8; 16];
        key.copy_from_slice(&self.raw[TITLE_KEY..TITLE_KEY + 16]);
        key
    }

    /// A signature that is all 0xFF or all 0x00 was never issued by the
    /// eShop.
    pub fn has_fake_signature(&self) -> bool {
        let sig = &self.raw[SIGNATURE];
        sig.iter().all(|&b| b == 0xFF) || sig.iter().all(|&b| b == 0x00)
    }

    pub fn is_legit(&self) -> bool {
        !self.has_fake_signature()
    }

    /// Whether the ticket carries console or account data.
    pub fn has_personal_data(&self) -> bool {
        self.console_id() != 0 || self.eshop_id() != 0
    }

    /// Zero the console id, eshop account id and ticket id.
    pub fn redact_personal(&mut self) {
        self.raw[CONSOLE_ID..CONSOLE_ID + 4].fill(0);
        self.raw[ESHOP_ID..ESHOP_ID + 4].fill(0);
        self.raw[TICKET_ID..TICKET_ID + 8].fill(0);
    }

    /// Decrypt the title key with the common key named by the ticket.
    pub fn title_key(&self, keyring: &Keyring) -> Result<[u8; 16]> {
        let common = keyring.common_key(self.common_key_index())?;
        let mut iv = [0u8; 16];
        iv[..8].copy_from_slice(&self.title_id().to_be_bytes());
        let mut key = self.encrypted_title_key();
        cbc_decrypt(&common, &mut iv, &mut key)?;
        Ok(key)
    }
}

#[cfg(test)]
#[path = "tests/ticket_tests.rs"]
mod tests;
