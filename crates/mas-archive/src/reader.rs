use std::io::Read;
use std::path::Path;

use mas_types::{Manifest, PayloadKey};

use crate::directory::{read_array, EntryDirectory};
use crate::entry::{payload_entry_name, EntryKind, MANIFEST_ENTRY};
use crate::error::{ContainerError, ContainerResult};
use crate::writer::{decode_varint, ARCHIVE_MAGIC, FORMAT_VERSION, MAX_ENTRY_SIZE};

const HEADER_LEN: usize = 12;
const FOOTER_LEN: usize = 8 + 32;

/// Random-access reader over one archive container.
///
/// The whole file is held in memory; the checksum is verified once at open,
/// and each entry's CRC32 and size are verified on every read.
#[derive(Debug)]
pub struct ArchiveReader {
    data: Vec<u8>,
    directory: EntryDirectory,
    checksum: [u8; 32],
}

impl ArchiveReader {
    /// Open from raw bytes.
    pub fn from_bytes(data: Vec<u8>) -> ContainerResult<Self> {
        if data.len() < HEADER_LEN + FOOTER_LEN {
            return Err(ContainerError::CorruptEntry {
                offset: 0,
                reason: "archive data too short".into(),
            });
        }
        if &data[0..4] != ARCHIVE_MAGIC {
            return Err(ContainerError::InvalidMagic {
                expected: String::from_utf8_lossy(ARCHIVE_MAGIC).into(),
                actual: String::from_utf8_lossy(&data[0..4]).into(),
            });
        }
        let version = u32::from_be_bytes(read_array(&data[4..8]));
        if version != FORMAT_VERSION {
            return Err(ContainerError::UnsupportedVersion(version));
        }
        let count = u32::from_be_bytes(read_array(&data[8..12])) as usize;

        let body_end = data.len() - 32;
        let checksum: [u8; 32] = read_array(&data[body_end..]);
        if *blake3::hash(&data[..body_end]).as_bytes() != checksum {
            return Err(ContainerError::ChecksumMismatch);
        }

        let footer_start = data.len() - FOOTER_LEN;
        let raw_offset = u64::from_be_bytes(read_array(&data[footer_start..body_end]));
        let directory_offset = usize::try_from(raw_offset)
            .ok()
            .filter(|&off| (HEADER_LEN..=footer_start).contains(&off))
            .ok_or_else(|| {
                ContainerError::DirectoryCorrupted(format!("directory offset {raw_offset} out of range"))
            })?;
        let directory = EntryDirectory::from_bytes(&data[directory_offset..footer_start], count)?;

        Ok(Self {
            data,
            directory,
            checksum,
        })
    }

    /// Read and verify the archive at `path`.
    pub fn open(path: &Path) -> ContainerResult<Self> {
        let data = std::fs::read(path)?;
        Self::from_bytes(data)
    }

    /// Read an entry by name. Returns `Ok(None)` if absent.
    pub fn read_entry(&self, name: &str) -> ContainerResult<Option<Vec<u8>>> {
        let (offset, expected_crc) = match self.directory.lookup(name) {
            Some(v) => v,
            None => return Ok(None),
        };
        self.read_at_offset(name, offset, expected_crc).map(Some)
    }

    /// Read the payload stored for `key`.
    pub fn read_payload(&self, key: &PayloadKey) -> ContainerResult<Option<Vec<u8>>> {
        self.read_entry(&payload_entry_name(key))
    }

    /// Parse the manifest entry.
    pub fn manifest(&self) -> ContainerResult<Manifest> {
        let raw = self
            .read_entry(MANIFEST_ENTRY)?
            .ok_or(ContainerError::ManifestMissing)?;
        Manifest::from_json(&raw).map_err(ContainerError::InvalidManifest)
    }

    /// All payload keys, sorted. The manifest and unknown entries are skipped.
    pub fn payload_keys(&self) -> ContainerResult<Vec<PayloadKey>> {
        let mut keys = Vec::new();
        for name in self.directory.names() {
            if let EntryKind::Payload(key) = EntryKind::classify(name)? {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Number of entries, manifest included.
    pub fn entry_count(&self) -> usize {
        self.directory.len()
    }

    pub fn directory(&self) -> &EntryDirectory {
        &self.directory
    }

    /// BLAKE3 checksum recorded in the footer.
    pub fn checksum(&self) -> &[u8; 32] {
        &self.checksum
    }

    fn read_at_offset(&self, name: &str, offset: u64, expected_crc: u32) -> ContainerResult<Vec<u8>> {
        let data = &self.data;
        let corrupt = |reason: &str| ContainerError::CorruptEntry {
            offset,
            reason: reason.into(),
        };

        let mut pos = usize::try_from(offset)
            .ok()
            .filter(|&pos| pos < data.len())
            .ok_or_else(|| corrupt("offset beyond archive data"))?;

        let (uncompressed_size, consumed) = decode_varint(&data[pos..])?;
        pos += consumed;
        let (compressed_size, consumed) = decode_varint(&data[pos..])?;
        pos += consumed;

        if uncompressed_size > MAX_ENTRY_SIZE {
            return Err(ContainerError::EntryTooLarge {
                entry: name.to_string(),
                size: uncompressed_size,
            });
        }
        let end = usize::try_from(compressed_size)
            .ok()
            .and_then(|len| pos.checked_add(len))
            .filter(|&end| end <= data.len())
            .ok_or_else(|| corrupt("compressed data extends beyond archive"))?;
        let compressed = &data[pos..end];

        if crc32fast::hash(compressed) != expected_crc {
            return Err(ContainerError::CrcMismatch {
                entry: name.to_string(),
            });
        }

        // Read at most one byte past the declared size so a lying entry is
        // caught without inflating it fully.
        let mut decompressed = Vec::new();
        zstd::stream::read::Decoder::with_buffer(compressed)
            .and_then(|decoder| {
                decoder
                    .take(uncompressed_size + 1)
                    .read_to_end(&mut decompressed)
            })
            .map_err(|e| ContainerError::DecompressionFailed(e.to_string()))?;

        if decompressed.len() as u64 != uncompressed_size {
            return Err(ContainerError::CorruptEntry {
                offset,
                reason: format!(
                    "size mismatch: expected {uncompressed_size}, got at least {}",
                    decompressed.len()
                ),
            });
        }

        Ok(decompressed)
    }
}
