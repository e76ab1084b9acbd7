//! Entry naming inside a container.
//!
//! The manifest lives in [`MANIFEST_ENTRY`]; each payload lives under
//! [`PAYLOAD_PREFIX`] followed by its escaped key. Entries matching neither
//! are carried along but ignored by readers.

use mas_types::escape::{escape_component, unescape_component};
use mas_types::PayloadKey;

use crate::error::{ContainerError, ContainerResult};

/// Name of the manifest entry.
pub const MANIFEST_ENTRY: &str = "manifest.json";

/// Prefix of every payload entry.
pub const PAYLOAD_PREFIX: &str = "payload/";

/// Kind of a container entry, derived from its name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Manifest,
    Payload(PayloadKey),
    Other,
}

impl EntryKind {
    /// Classify an entry name.
    pub fn classify(name: &str) -> ContainerResult<Self> {
        if name == MANIFEST_ENTRY {
            return Ok(Self::Manifest);
        }
        match name.strip_prefix(PAYLOAD_PREFIX) {
            Some(escaped) => Ok(Self::Payload(payload_key_for(escaped, name)?)),
            None => Ok(Self::Other),
        }
    }
}

/// Entry name under which the payload for `key` is stored.
pub fn payload_entry_name(key: &PayloadKey) -> String {
    format!("{PAYLOAD_PREFIX}{}", escape_component(key.as_str()))
}

fn payload_key_for(escaped: &str, name: &str) -> ContainerResult<PayloadKey> {
    let invalid = |source| ContainerError::InvalidEntryName {
        name: name.to_string(),
        source,
    };
    let raw = unescape_component(escaped).map_err(invalid)?;
    PayloadKey::new(raw).map_err(invalid)
}
