//! Shared building blocks for the ctrpack crates: the error type, the
//! storage and interaction collaborators, and byte-field helpers.

use std::io::{Read, Seek};

pub mod error;
pub mod progress;
pub mod storage;
pub mod util;

pub use error::{CtrError, ErrorKind, RegionStatus, Result, VerifyFailure};
pub use progress::{Interaction, LogInteraction, NoInteraction};
pub use storage::{FsStorage, OpenMode, Storage, StorageFile};

/// A reader that implements both Read and Seek.
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}
