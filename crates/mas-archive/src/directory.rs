use crate::error::{ContainerError, ContainerResult};
use crate::writer::{decode_varint, encode_varint};

/// Smallest serialized record: one varint byte, an empty name, offset and crc.
const MIN_RECORD_LEN: usize = 1 + 8 + 4;

/// One directory record: where an entry starts and its compressed CRC32.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub offset: u64,
    pub crc32: u32,
}

/// Entry directory for random access by name.
///
/// Records are kept sorted by name, so lookups are a binary search. The
/// serialized form is a sequence of records, each
/// `varint name length | UTF-8 name | u64 BE offset | u32 BE crc32`.
#[derive(Clone, Debug, Default)]
pub struct EntryDirectory {
    entries: Vec<DirectoryEntry>,
}

impl EntryDirectory {
    /// Build a directory from unsorted records, rejecting duplicate names.
    pub fn build(mut entries: Vec<DirectoryEntry>) -> ContainerResult<Self> {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(pair) = entries.windows(2).find(|w| w[0].name == w[1].name) {
            return Err(ContainerError::DuplicateEntry(pair[0].name.clone()));
        }
        Ok(Self { entries })
    }

    /// Look up an entry's (offset, crc32) by name.
    pub fn lookup(&self, name: &str) -> Option<(u64, u32)> {
        self.entries
            .binary_search_by(|probe| probe.name.as_str().cmp(name))
            .ok()
            .map(|idx| (self.entries[idx].offset, self.entries[idx].crc32))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Append the serialized directory to `buf`.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        for entry in &self.entries {
            encode_varint(buf, entry.name.len() as u64);
            buf.extend_from_slice(entry.name.as_bytes());
            buf.extend_from_slice(&entry.offset.to_be_bytes());
            buf.extend_from_slice(&entry.crc32.to_be_bytes());
        }
    }

    /// Parse exactly `count` records from `data`.
    ///
    /// `count` and every length come from the file, so each is checked
    /// against the bytes actually present before use.
    pub fn from_bytes(data: &[u8], count: usize) -> ContainerResult<Self> {
        if count > data.len() / MIN_RECORD_LEN {
            return Err(ContainerError::DirectoryCorrupted(format!(
                "{count} records cannot fit in {} bytes",
                data.len()
            )));
        }

        let truncated = || ContainerError::DirectoryCorrupted("record truncated".into());
        let mut pos = 0;
        let mut entries = Vec::with_capacity(count);

        for _ in 0..count {
            let (name_len, consumed) = decode_varint(&data[pos..])
                .map_err(|_| ContainerError::DirectoryCorrupted("bad name length".into()))?;
            pos += consumed;

            let name_end = usize::try_from(name_len)
                .ok()
                .and_then(|len| pos.checked_add(len))
                .ok_or_else(truncated)?;
            let record_end = name_end.checked_add(12).ok_or_else(truncated)?;
            if record_end > data.len() {
                return Err(truncated());
            }
            let name = std::str::from_utf8(&data[pos..name_end])
                .map_err(|e| ContainerError::DirectoryCorrupted(e.to_string()))?
                .to_string();
            pos = name_end;

            let offset = u64::from_be_bytes(read_array(&data[pos..pos + 8]));
            pos += 8;
            let crc32 = u32::from_be_bytes(read_array(&data[pos..pos + 4]));
            pos += 4;

            entries.push(DirectoryEntry {
                name,
                offset,
                crc32,
            });
        }

        if pos != data.len() {
            return Err(ContainerError::DirectoryCorrupted(format!(
                "{} trailing bytes",
                data.len() - pos
            )));
        }

        Self::build(entries)
    }
}

/// Copy a slice of known length into an array.
pub(crate) fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}
