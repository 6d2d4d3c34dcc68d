//! Error types for dist-walker
//!
//! This module defines the error hierarchy that covers:
//! - Cache file format and I/O errors
//! - Name-table lookup errors
//! - Per-index accessor errors
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Per-entry walk errors (unreadable directory, failed stat, overlong
//!   path) are logged and dropped, never returned: a walk always produces
//!   a list
//! - Collective I/O and format errors are fatal to the operation and
//!   returned to the caller

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the dist-walker library
#[derive(Error, Debug)]
pub enum WalkerError {
    /// Cache file errors
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Name table errors
    #[error("Name table error: {0}")]
    Name(#[from] NameError),

    /// Per-index accessor errors
    #[error("Access error: {0}")]
    Access(#[from] AccessError),

    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cache file format and I/O errors
///
/// All of these are fatal to the read or write operation as a whole:
/// the caller gets no partially populated list.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Cannot open the cache file
    #[error("Failed to open cache file '{path}': {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Reader encountered a version it does not understand
    #[error("Unsupported cache format version {0}")]
    UnsupportedVersion(u64),

    /// Header could not be read (short file or I/O failure)
    #[error("Cache header truncated or unreadable")]
    Header,

    /// Read or write of a data section failed
    #[error("Cache I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Name-table errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    /// A fabricated name for an unknown id does not fit the packed stride
    #[error("Id {id} renders wider than the {stride}-byte name stride")]
    IdRenderOverflow { id: u32, stride: u64 },
}

/// Result of a per-index accessor: present, or absent with a reason
///
/// Out-of-range is a distinct condition from asking a lite list for stat
/// detail; callers that iterate by index rely on telling them apart.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// Index is not in `[0, local_size)`
    #[error("Index {index} is out of range")]
    OutOfRange { index: u64 },

    /// The list carries no stat detail (readdir-mode walk or v2 cache)
    #[error("List has no stat detail")]
    NoDetail,

    /// Username/groupname fabrication failed
    #[error(transparent)]
    Name(#[from] NameError),
}

/// Result type alias for WalkerError
pub type Result<T> = std::result::Result<T, WalkerError>;

/// Result type alias for CacheError
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Result type alias for AccessError
pub type AccessResult<T> = std::result::Result<T, AccessError>;
