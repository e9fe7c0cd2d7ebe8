//! Nintendo 3DS content containers.
//!
//! This crate decodes the on-disk structures the engine works with and owns
//! the cryptographic primitives they need:
//!
//! - NCSD (game card image, up to 8 NCCH partitions)
//! - NCCH (executable/data container) and its ExeFS header
//! - TMD (title metadata) and tickets
//! - CIA (installable archive) headers, stubs and meta blocks
//!
//! All structures are kept as their raw byte buffers with explicit accessors,
//! so re-serialization reproduces every byte that was not deliberately
//! changed.

pub mod cia;
pub mod crypto;
pub mod exefs;
pub mod keys;
pub mod ncch;
pub mod ncch_crypto;
pub mod ncsd;
pub mod ticket;
pub mod tmd;

#[cfg(test)]
#[path = "tests/fixtures.rs"]
mod fixtures;

/// Base media unit; NCSD/NCCH offsets and sizes are multiples of
/// `MEDIA_UNIT << flags[6]`.
pub const MEDIA_UNIT: u64 = 0x200;

/// Largest accepted `flags[6]`; keeps unit-to-byte conversions within `u64`.
pub const MAX_MEDIA_UNIT_EXPONENT: u8 = 16;

pub const NCSD_MAGIC: [u8; 4] = *b"NCSD";
pub const NCCH_MAGIC: [u8; 4] = *b"NCCH";

pub use cia::{CiaHeader, CiaInfo, CiaMeta, CiaStub};
pub use exefs::{ExeFsFile, ExeFsHeader};
pub use keys::Keyring;
pub use ncch::{CryptoMethod, NcchCrypto, NcchHeader, read_ncch_headers};
pub use ncch_crypto::NcchCipher;
pub use ncsd::{NcchPartition, NcsdHeader};
pub use ticket::Ticket;
pub use tmd::{CIA_MAX_CONTENTS, TitleMetaData, TmdContentChunk};
