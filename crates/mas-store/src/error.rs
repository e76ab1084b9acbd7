use mas_archive::ArchiveError;

/// Errors from model archive store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Archive-level failure: corrupt archive, payload load failure, or a
    /// failed relocation.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// I/O error on the store directory itself.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The store configuration is invalid or cannot be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl StoreError {
    /// Returns `true` if the error means a submitted archive was corrupt.
    pub fn is_corrupt_archive(&self) -> bool {
        matches!(self, Self::Archive(e) if e.is_corrupt())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
