use std::path::PathBuf;

use mas_types::{PayloadKey, TypeError};
use thiserror::Error;

/// Format-level errors raised while writing or reading a container.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("invalid archive magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("unsupported archive format version: {0}")]
    UnsupportedVersion(u32),

    #[error("archive checksum mismatch")]
    ChecksumMismatch,

    #[error("CRC32 mismatch for entry {entry}")]
    CrcMismatch { entry: String },

    #[error("corrupt archive entry at offset {offset}: {reason}")]
    CorruptEntry { offset: u64, reason: String },

    #[error("entry directory corrupted: {0}")]
    DirectoryCorrupted(String),

    #[error("entry {entry} declares {size} bytes, above the format limit")]
    EntryTooLarge { entry: String, size: u64 },

    #[error("duplicate entry name: {0}")]
    DuplicateEntry(String),

    #[error("invalid entry name {name:?}: {source}")]
    InvalidEntryName { name: String, source: TypeError },

    #[error("archive has no manifest entry")]
    ManifestMissing,

    #[error("invalid manifest: {0}")]
    InvalidManifest(TypeError),

    #[error("backing file holds manifest {found}, expected {expected}")]
    ManifestMismatch { expected: String, found: String },

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ContainerResult<T> = Result<T, ContainerError>;

/// Errors raised by a file-backed [`Archive`](crate::Archive).
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The container cannot be opened or its manifest cannot be parsed.
    /// Fatal to this archive only.
    #[error("corrupt archive {path:?}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: ContainerError,
    },

    /// One payload could not be read or deserialized. The archive's other
    /// payloads are unaffected.
    #[error("failed to load payload {key}: {reason}")]
    PayloadLoad { key: PayloadKey, reason: String },

    /// Renaming the backing file failed; the archive is still usable at
    /// `from`.
    #[error("failed to relocate archive from {from:?} to {to:?}: {source}")]
    RelocationFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The archive was closed or deleted and must not be read again.
    #[error("archive {path:?} is closed")]
    Closed { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    /// Returns `true` for errors that mean the archive as a whole is unusable.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }

    /// Returns `true` if the archive was retired or its file replaced by a
    /// newer archive for the same slot. A newer snapshot may resolve the
    /// same read.
    pub fn is_superseded(&self) -> bool {
        matches!(
            self,
            Self::Closed { .. }
                | Self::Corrupt {
                    source: ContainerError::ManifestMismatch { .. },
                    ..
                }
        )
    }
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;
