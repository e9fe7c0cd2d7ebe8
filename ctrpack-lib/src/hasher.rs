//! Streaming SHA-256 over a region, with a per-chunk transform.

use sha2::{Digest, Sha256};

use ctrpack_core::{CtrError, ReadSeek, Result};

/// Per-chunk transform: receives the chunk and its offset from the start of
/// the hashed region.
pub type ChunkTransform<'a> = dyn FnMut(&mut [u8], u64) -> Result<()> + 'a;

/// Hash `size` bytes from the reader's cursor, reading through `buf`.
///
/// Each chunk is transformed in place before it is hashed. The progress
/// callback receives the bytes processed so far after every chunk and
/// cancels the run by returning `false`.
pub fn sha256_stream(
    reader: &mut dyn ReadSeek,
    size: u64,
    buf: &mut [u8],
    transform: &mut ChunkTransform<'_>,
    progress: &mut dyn FnMut(u64) -> bool,
) -> Result<[u8; 32]> {
    let mut hasher = Sha256::new();
    let mut done: u64 = 0;

    while done < size {
        let n = (buf.len() as u64).min(size - done) as usize;
        let chunk = &mut buf[..n];
        reader
            .read_exact(chunk)
            .map_err(|e| CtrError::from_read(e, "hashed region"))?;
        transform(chunk, done)?;
        hasher.update(&*chunk);
        done += n as u64;
        if !progress(done) {
            return Err(CtrError::Cancelled);
        }
    }

    Ok(hasher.finalize().into())
}

/// Hash `size` bytes from the cursor and compare against `expected`.
pub fn check_hash(
    reader: &mut dyn ReadSeek,
    size: u64,
    expected: &[u8; 32],
    buf: &mut [u8],
    transform: &mut ChunkTransform<'_>,
    progress: &mut dyn FnMut(u64) -> bool,
) -> Result<bool> {
    let hash = sha256_stream(reader, size, buf, transform, progress)?;
    Ok(&hash == expected)
}

#[cfg(test)]
#[path = "tests/hasher_tests.rs"]
mod tests;
