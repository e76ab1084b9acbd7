use std::path::{Path, PathBuf};

use mas_archive::DEFAULT_COMPRESSION_LEVEL;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Configuration for a [`ModelArchiveStore`](crate::ModelArchiveStore).
///
/// Loadable from TOML; every field has a default:
///
/// ```toml
/// root = "/var/lib/mas/models"
/// extension = "mas"
/// compression_level = 3
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the archive files.
    pub root: PathBuf,
    /// File extension of archives, without the leading dot. Other files in
    /// `root` are ignored.
    pub extension: String,
    /// zstd level used when the store builds archives.
    pub compression_level: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("models"),
            extension: "mas".into(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl StoreConfig {
    /// Default configuration rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> StoreResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| StoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn from_toml_file(path: &Path) -> StoreResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.extension.is_empty() || self.extension.contains(['.', '/', '\\']) {
            return Err(StoreError::Config(format!(
                "extension must be a bare suffix, got {:?}",
                self.extension
            )));
        }
        if !(1..=22).contains(&self.compression_level) {
            return Err(StoreError::Config(format!(
                "compression_level must be within 1..=22, got {}",
                self.compression_level
            )));
        }
        Ok(())
    }

    /// Returns `true` if `path` has the archive extension.
    pub fn is_archive_path(&self, path: &Path) -> bool {
        path.extension().map(|e| e == self.extension.as_str()).unwrap_or(false)
    }
}
