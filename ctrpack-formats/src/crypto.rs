//! AES primitives used by the 3DS containers.
//!
//! - NCCH regions use AES-128-CTR with a 128-bit big-endian counter. Any byte
//!   of a region can be processed independently by seeking the keystream.
//! - CIA contents and ticket title keys use AES-128-CBC. The 16-byte chaining
//!   block is carried across calls so a content can be processed chunk by
//!   chunk through a small buffer.

use aes::Aes128;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, KeyIvInit, StreamCipher, StreamCipherSeek};
use ctrpack_core::{CtrError, Result};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

pub const AES_BLOCK_SIZE: usize = 16;

/// XOR `buf` with the CTR keystream for `key`/`counter`, starting `offset`
/// bytes into the stream. Encryption and decryption are the same operation.
pub fn ctr_apply(key: &[u8; 16], counter: &[u8; 16], offset: u64, buf: &mut [u8]) {
    let mut cipher = Aes128Ctr::new(key.into(), counter.into());
    cipher.seek(offset);
    cipher.apply_keystream(buf);
}

fn check_block_aligned(buf: &[u8]) -> Result<()> {
    if buf.len() % AES_BLOCK_SIZE != 0 {
        return Err(CtrError::crypto(format!(
            "CBC input of {} bytes is not block aligned",
            buf.len()
        )));
    }
    Ok(())
}

/// CBC-decrypt `buf` in place; `iv` is advanced to the last ciphertext block.
pub fn cbc_decrypt(key: &[u8; 16], iv: &mut [u8; 16], buf: &mut [u8]) -> Result<()> {
    check_block_aligned(buf)?;
    let cipher = Aes128::new(key.into());
    for block in buf.chunks_exact_mut(AES_BLOCK_SIZE) {
        let mut next_iv = [0u8; 16];
        next_iv.copy_from_slice(block);
        cipher.decrypt_block(aes::Block::from_mut_slice(block));
        for (b, v) in block.iter_mut().zip(iv.iter()) {
            *b ^= v;
        }
        *iv = next_iv;
    }
    Ok(())
}

/// CBC-encrypt `buf` in place; `iv` is advanced to the last ciphertext block.
pub fn cbc_encrypt(key: &[u8; 16], iv: &mut [u8; 16], buf: &mut [u8]) -> Result<()> {
    check_block_aligned(buf)?;
    let cipher = Aes128::new(key.into());
    for block in buf.chunks_exact_mut(AES_BLOCK_SIZE) {
        for (b, v) in block.iter_mut().zip(iv.iter()) {
            *b ^= v;
        }
        cipher.encrypt_block(aes::Block::from_mut_slice(block));
        iv.copy_from_slice(block);
    }
    Ok(())
}

/// Initial chaining block of a CIA content: the content index (big-endian)
/// in the first two bytes, zeros elsewhere.
pub fn content_iv(index: u16) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[..2].copy_from_slice(&index.to_be_bytes());
    iv
}

/// Sequential CIA-content cipher (AES-128-CBC under the title key).
#[derive(Clone)]
pub struct ContentCipher {
    key: [u8; 16],
    iv: [u8; 16],
}

impl ContentCipher {
    /// Cipher positioned at the start of content `index`.
    pub fn new(title_key: &[u8; 16], index: u16) -> Self {
        Self {
            key: *title_key,
            iv: content_iv(index),
        }
    }

    /// Cipher positioned mid-content, chaining from the preceding ciphertext block.
    pub fn resume(title_key: &[u8; 16], prev_block: [u8; 16]) -> Self {
        Self {
            key: *title_key,
            iv: prev_block,
        }
    }

    pub fn decrypt(&mut self, buf: &mut [u8]) -> Result<()> {
        cbc_decrypt(&self.key, &mut self.iv, buf)
    }

    pub fn encrypt(&mut self, buf: &mut [u8]) -> Result<()> {
        cbc_encrypt(&self.key, &mut self.iv, buf)
    }
}

#[cfg(test)]
#[path = "tests/crypto_tests.rs"]
mod tests;
