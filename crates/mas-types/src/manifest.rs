use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::escape::{escape_component, unescape_component};
use crate::version::Version;

/// Identity of a logical archive slot: `(name, version)`.
///
/// Two archives with the same `ManifestId` compete for the same slot; the one
/// with the later manifest timestamp wins.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ManifestId {
    pub name: String,
    pub version: Version,
}

impl ManifestId {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Canonical file stem for the archive serving this slot.
    ///
    /// The name is escaped so the stem is a single path component, and the
    /// version never contains `_`, so splitting at the last `_` recovers the
    /// identity. See [`ManifestId::from_file_stem`].
    pub fn file_stem(&self) -> String {
        format!("{}_{}", escape_component(&self.name), self.version)
    }

    /// Parse a stem produced by [`ManifestId::file_stem`].
    pub fn from_file_stem(stem: &str) -> Result<Self, TypeError> {
        let (name, version) = stem.rsplit_once('_').ok_or_else(|| TypeError::InvalidVersion {
            input: stem.to_string(),
            reason: "missing '_' separator".into(),
        })?;
        if name.is_empty() {
            return Err(TypeError::EmptyName);
        }
        Ok(Self {
            name: unescape_component(name)?,
            version: version.parse()?,
        })
    }
}

impl fmt::Debug for ManifestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ManifestId({self})")
    }
}

impl fmt::Display for ManifestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Descriptor stored in every archive: which slot it fills and when it was
/// built.
///
/// Serialized as JSON with an RFC 3339 timestamp:
///
/// ```json
/// {"name":"org.eclipse.swt","version":"3.6.0","timestamp":"2011-06-01T12:00:00Z"}
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub version: Version,
    pub timestamp: DateTime<Utc>,
}

impl Manifest {
    /// Create a manifest, rejecting an empty name.
    pub fn new(
        name: impl Into<String>,
        version: Version,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, TypeError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TypeError::EmptyName);
        }
        Ok(Self {
            name,
            version,
            timestamp,
        })
    }

    /// The slot this manifest identifies.
    pub fn id(&self) -> ManifestId {
        ManifestId::new(self.name.clone(), self.version)
    }

    /// Returns `true` if `other` names the same `(name, version)` slot.
    pub fn same_slot(&self, other: &Manifest) -> bool {
        self.name == other.name && self.version == other.version
    }

    /// Returns `true` if this manifest was built strictly after `other`.
    pub fn is_newer_than(&self, other: &Manifest) -> bool {
        self.timestamp > other.timestamp
    }

    /// Parse the JSON form stored in an archive.
    pub fn from_json(data: &[u8]) -> Result<Self, TypeError> {
        let manifest: Manifest =
            serde_json::from_slice(data).map_err(|e| TypeError::Serialization(e.to_string()))?;
        if manifest.name.is_empty() {
            return Err(TypeError::EmptyName);
        }
        Ok(manifest)
    }

    /// Render the JSON form stored in an archive.
    pub fn to_json(&self) -> Result<Vec<u8>, TypeError> {
        serde_json::to_vec_pretty(self).map_err(|e| TypeError::Serialization(e.to_string()))
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} ({})",
            self.name,
            self.version,
            self.timestamp.to_rfc3339()
        )
    }
}
