//! Model archive container format and file-backed archives.
//!
//! An archive is an immutable container holding one manifest plus any number
//! of serialized model payloads, each stored under its payload key.
//!
//! # Architecture
//!
//! - **Container** (`.mas`): zstd-compressed, CRC-checked entries, a sorted
//!   entry directory, and a BLAKE3 trailer
//! - **ArchiveWriter**: builds containers from a manifest and payloads
//! - **ArchiveReader**: random-access reading through the entry directory
//! - **Archive**: one container file with a lazily opened reader and an
//!   explicit `Unopened → Open → Closed` lifecycle
//! - **PayloadLoader**: turns payload bytes into models; opaque to the store

pub mod archive;
pub mod directory;
pub mod entry;
pub mod error;
pub mod loader;
pub mod reader;
pub mod writer;

pub use archive::{Archive, ArchiveState};
pub use directory::{DirectoryEntry, EntryDirectory};
pub use entry::{payload_entry_name, EntryKind, MANIFEST_ENTRY, PAYLOAD_PREFIX};
pub use error::{ArchiveError, ArchiveResult, ContainerError, ContainerResult};
pub use loader::{JsonLoader, LoadError, PayloadLoader, RawLoader};
pub use reader::ArchiveReader;
pub use writer::{ArchiveWriter, WrittenArchive, DEFAULT_COMPRESSION_LEVEL, MAX_ENTRY_SIZE};
