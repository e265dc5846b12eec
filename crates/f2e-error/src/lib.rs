#![forbid(unsafe_code)]
//! Error types for fat2ext4.
//!
//! Defines `ConvertError` and a `Result<T>` alias used throughout the
//! workspace, plus the failure classification that drives exit codes.

use f2e_types::ParseError;
use thiserror::Error;

/// How far the conversion got when it failed.
///
/// The distinction matters because the tool is destructive: before the
/// commit phase the partition is still a valid FAT32 volume, afterwards it
/// is in an undefined intermediate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Rejected before any write (preflight, geometry, planning).
    Refused,
    /// Failed during serialization or the dry run; only free-space scratch
    /// writes happened and the volume still mounts as FAT32.
    Aborted,
    /// Failed after the commit phase began; the volume is neither FAT32
    /// nor ext4.
    Corrupted,
}

impl FailureClass {
    /// Process exit code for this class.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Refused | Self::Aborted => 1,
            Self::Corrupted => 2,
        }
    }
}

/// Unified error type for all conversion operations.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse on-disk structure: {0}")]
    Parse(#[from] ParseError),

    #[error("unsupported filesystem: {0}")]
    Unsupported(String),

    #[error("FAT consistency check failed (exit status {status})")]
    FsckFailed { status: i32 },

    #[error("cannot plan ext4 layout: {0}")]
    Layout(String),

    #[error("filesystem is too small to convert: no free clusters left")]
    NoSpace,

    #[error("no free inodes left (need more than {limit})")]
    NoInodes { limit: u32 },

    #[error("file name {name:?} is {len} bytes encoded, limit is 255")]
    NameTooLong { name: String, len: usize },

    #[error("malformed directory data at cluster {cluster}: {detail}")]
    BadDirectory { cluster: u32, detail: String },

    #[error("archive stream corrupt: {0}")]
    BadArchive(String),

    #[error("commit diverged from the dry run: allocation sequences differ")]
    CommitDiverged,

    #[error("conversion failed after commit began: {source}")]
    AfterCommit {
        #[source]
        source: Box<ConvertError>,
    },
}

impl ConvertError {
    /// Classify this error by how far the conversion got.
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self {
            Self::AfterCommit { .. } | Self::CommitDiverged => FailureClass::Corrupted,
            Self::Parse(_)
            | Self::Unsupported(_)
            | Self::FsckFailed { .. }
            | Self::Layout(_) => FailureClass::Refused,
            Self::Io(_)
            | Self::NoSpace
            | Self::NoInodes { .. }
            | Self::NameTooLong { .. }
            | Self::BadDirectory { .. }
            | Self::BadArchive(_) => FailureClass::Aborted,
        }
    }

    /// Wrap an error that happened after the first destructive write.
    #[must_use]
    pub fn into_after_commit(self) -> Self {
        match self {
            already @ Self::AfterCommit { .. } => already,
            other => Self::AfterCommit {
                source: Box::new(other),
            },
        }
    }
}

/// Result alias using `ConvertError`.
pub type Result<T> = std::result::Result<T, ConvertError>;
