use std::fmt;

use thiserror::Error;

/// Outcome of one hashed region of an NCCH.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionStatus {
    /// Hash matches.
    Ok,
    /// Hash does not match.
    Fail,
    /// Region is absent (size 0), nothing to check.
    NotApplicable,
}

impl RegionStatus {
    pub fn from_match(matched: bool) -> Self {
        if matched { Self::Ok } else { Self::Fail }
    }

    pub fn is_fail(self) -> bool {
        self == Self::Fail
    }

    /// Short label used in verification summaries.
    pub fn label(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Fail => "fail",
            Self::NotApplicable => "-",
        }
    }
}

/// Which sub-structure failed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyFailure {
    /// One or more NCCH regions failed.
    Ncch {
        exheader: RegionStatus,
        exefs: RegionStatus,
        romfs: RegionStatus,
    },
    /// An NCSD partition failed; offset and size are in bytes.
    Partition { index: usize, offset: u64, size: u64 },
    /// A TMD/CIA content failed; offset and size are in bytes.
    Content {
        index: usize,
        id: u32,
        offset: u64,
        size: u64,
    },
}

impl fmt::Display for VerifyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ncch {
                exheader,
                exefs,
                romfs,
            } => write!(
                f,
                "NCCH verification failed: ExtHdr/ExeFS/RomFS: {}/{}/{}",
                exheader.label(),
                exefs.label(),
                romfs.label()
            ),
            Self::Partition {
                index,
                offset,
                size,
            } => write!(
                f,
                "Content{} ({:08X}@{:08X}): verification failed",
                index, size, offset
            ),
            Self::Content {
                id, offset, size, ..
            } => write!(
                f,
                "ID {:08X} ({:08X}@{:08X}): verification failed",
                id, size, offset
            ),
        }
    }
}

/// Broad failure category, for callers that branch on the kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Format,
    Crypto,
    Legitimacy,
    Cancelled,
}

/// Errors produced by the content-format engine.
#[derive(Debug, Error)]
pub enum CtrError {
    /// Storage failure, propagated as-is
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bad magic, out-of-bounds offset/size, malformed table
    #[error("Invalid format: {0}")]
    Format(String),

    /// Key derivation unavailable or unsupported, misaligned cipher input
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Stored hash does not match the content
    #[error("{0}")]
    Verification(VerifyFailure),

    /// Force-legit build found divergent metadata or no legit ticket
    #[error("Legitimacy check failed: {0}")]
    Legitimacy(String),

    /// The progress callback asked to stop
    #[error("Operation cancelled")]
    Cancelled,
}

impl CtrError {
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }

    pub fn legitimacy(msg: impl Into<String>) -> Self {
        Self::Legitimacy(msg.into())
    }

    /// Map a short read to a format error naming the structure, keep
    /// everything else as I/O.
    pub fn from_read(err: std::io::Error, what: &str) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::Format(format!("{} truncated", what))
        } else {
            Self::Io(err)
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Io,
            Self::Format(_) => ErrorKind::Format,
            Self::Crypto(_) | Self::Verification(_) => ErrorKind::Crypto,
            Self::Legitimacy(_) => ErrorKind::Legitimacy,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

pub type Result<T, E = CtrError> = std::result::Result<T, E>;

#[cfg(test)]
#[path = "tests/error_tests.rs"]
mod tests;
