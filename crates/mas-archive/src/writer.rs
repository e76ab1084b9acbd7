use std::io::Write;
use std::path::{Path, PathBuf};

use mas_types::{Manifest, PayloadKey};

use crate::directory::{DirectoryEntry, EntryDirectory};
use crate::entry::{payload_entry_name, MANIFEST_ENTRY};
use crate::error::{ContainerError, ContainerResult};

/// Magic bytes opening every archive.
pub const ARCHIVE_MAGIC: &[u8; 4] = b"MASA";

/// Current container format version.
pub const FORMAT_VERSION: u32 = 1;

/// Largest uncompressed entry the format accepts.
pub const MAX_ENTRY_SIZE: u64 = 4 << 30;

/// Default zstd level for payload compression.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Result of writing an archive file.
#[derive(Clone, Debug)]
pub struct WrittenArchive {
    pub path: PathBuf,
    pub entry_count: usize,
    pub checksum: [u8; 32],
}

/// Builds an archive container from a manifest and payloads.
///
/// Layout:
///
/// ```text
/// header    : "MASA" | u32 BE version | u32 BE entry count
/// entries   : varint raw len | varint compressed len | zstd bytes
/// directory : see EntryDirectory
/// footer    : u64 BE directory offset | BLAKE3 of all preceding bytes
/// ```
pub struct ArchiveWriter {
    manifest: Manifest,
    entries: Vec<(String, Vec<u8>)>,
    level: i32,
}

impl ArchiveWriter {
    pub fn new(manifest: Manifest) -> Self {
        Self {
            manifest,
            entries: Vec::new(),
            level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    /// Use a specific zstd compression level.
    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }

    /// Add the serialized model for `key`.
    pub fn add_payload(&mut self, key: &PayloadKey, data: &[u8]) {
        self.entries.push((payload_entry_name(key), data.to_vec()));
    }

    /// Add an arbitrary named entry. Readers ignore names outside the
    /// manifest and payload namespaces.
    pub fn add_entry(&mut self, name: impl Into<String>, data: &[u8]) {
        self.entries.push((name.into(), data.to_vec()));
    }

    /// Number of payloads and extra entries queued (the manifest excluded).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the archive to `path`.
    ///
    /// The bytes go to a temporary file in the target directory which is then
    /// renamed over `path`, so a concurrent scan never sees a partial file.
    pub fn finish(self, path: &Path) -> ContainerResult<WrittenArchive> {
        let (data, entry_count, checksum) = self.build_bytes()?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| ContainerError::Io(e.error))?;

        tracing::debug!(path = %path.display(), entries = entry_count, "wrote archive");
        Ok(WrittenArchive {
            path: path.to_path_buf(),
            entry_count,
            checksum,
        })
    }

    /// Build the archive in memory (no disk I/O).
    pub fn finish_to_bytes(self) -> ContainerResult<Vec<u8>> {
        Ok(self.build_bytes()?.0)
    }

    fn build_bytes(self) -> ContainerResult<(Vec<u8>, usize, [u8; 32])> {
        let manifest_json = self
            .manifest
            .to_json()
            .map_err(ContainerError::InvalidManifest)?;

        let mut all = Vec::with_capacity(self.entries.len() + 1);
        all.push((MANIFEST_ENTRY.to_string(), manifest_json));
        all.extend(self.entries);

        let mut data = Vec::new();
        data.extend_from_slice(ARCHIVE_MAGIC);
        data.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
        data.extend_from_slice(&(all.len() as u32).to_be_bytes());

        let mut records = Vec::with_capacity(all.len());
        for (name, raw) in &all {
            let offset = data.len() as u64;
            if raw.len() as u64 > MAX_ENTRY_SIZE {
                return Err(ContainerError::EntryTooLarge {
                    entry: name.clone(),
                    size: raw.len() as u64,
                });
            }

            let compressed = zstd::encode_all(raw.as_slice(), self.level)
                .map_err(|e| ContainerError::CompressionFailed(e.to_string()))?;

            encode_varint(&mut data, raw.len() as u64);
            encode_varint(&mut data, compressed.len() as u64);
            let crc32 = crc32fast::hash(&compressed);
            data.extend_from_slice(&compressed);

            records.push(DirectoryEntry {
                name: name.clone(),
                offset,
                crc32,
            });
        }

        let directory = EntryDirectory::build(records)?;
        let directory_offset = data.len() as u64;
        directory.write_to(&mut data);
        data.extend_from_slice(&directory_offset.to_be_bytes());

        let checksum = *blake3::hash(&data).as_bytes();
        data.extend_from_slice(&checksum);

        Ok((data, all.len(), checksum))
    }
}

/// Encode a u64 as a variable-length integer.
pub(crate) fn encode_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decode a variable-length integer. Returns (value, bytes_consumed).
pub(crate) fn decode_varint(data: &[u8]) -> ContainerResult<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in data.iter().enumerate() {
        value |= ((byte & 0x7F) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        if shift >= 64 {
            return Err(ContainerError::CorruptEntry {
                offset: 0,
                reason: "varint overflow".into(),
            });
        }
    }
    Err(ContainerError::CorruptEntry {
        offset: 0,
        reason: "truncated varint".into(),
    })
}
