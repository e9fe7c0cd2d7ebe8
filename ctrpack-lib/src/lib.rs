//! Content engine for 3DS titles: verification, crypto transforms and CIA
//! building on top of the `ctrpack-formats` parsers.
//!
//! All operations hang off [`CtrContext`], which owns the injected
//! collaborators (storage, keyring, ticket source, user interaction) and a
//! single scratch buffer every streaming loop reads through.

pub mod build;
pub mod context;
pub mod filetype;
pub mod hasher;
pub mod settings;
pub mod tickets;
pub mod transform;
pub mod util;
pub mod verify;

pub use context::CtrContext;
pub use filetype::{GameFileType, identify_file_type};
pub use settings::Settings;
pub use tickets::{TicketSource, TicketStore};
pub use transform::{Destination, NcchTransform, TransformMode};
pub use verify::NcchReport;

pub use ctrpack_core::{CtrError, ErrorKind, RegionStatus, Result, VerifyFailure};
pub use ctrpack_formats::{Keyring, NcchCrypto};
