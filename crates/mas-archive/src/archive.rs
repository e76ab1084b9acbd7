//! File-backed archive with a lazily opened reader.
//!
//! An [`Archive`] moves through `Unopened → Open → Closed`:
//!
//! - [`Archive::open`] reads the manifest and key listing once and leaves the
//!   archive `Unopened`.
//! - The first payload read opens the reader. A reopen checks that the
//!   backing file still carries the same manifest.
//! - [`Archive::relocate`] drops the reader, renames the file, and reopens
//!   at the new path if the reader was open.
//! - [`Archive::preload`] opens the reader eagerly.
//! - [`Archive::close`] and [`Archive::delete`] are terminal.
//!
//! Payload reads clone the open reader's `Arc` and decompress outside the
//! state lock, so concurrent readers of one archive do not serialize on I/O.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use mas_types::{Manifest, ManifestId, PayloadKey};

use crate::error::{ArchiveError, ArchiveResult, ContainerError};
use crate::loader::PayloadLoader;
use crate::reader::ArchiveReader;

/// Observable lifecycle state of an [`Archive`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveState {
    Unopened,
    Open,
    Closed,
}

enum ReaderState {
    Unopened,
    Open(Arc<ArchiveReader>),
    Closed,
}

impl ReaderState {
    fn observe(&self) -> ArchiveState {
        match self {
            Self::Unopened => ArchiveState::Unopened,
            Self::Open(_) => ArchiveState::Open,
            Self::Closed => ArchiveState::Closed,
        }
    }
}

struct Inner {
    path: PathBuf,
    state: ReaderState,
}

/// An immutable model archive backed by one container file.
pub struct Archive {
    manifest: Manifest,
    keys: Vec<PayloadKey>,
    inner: RwLock<Inner>,
}

impl Archive {
    /// Open the container at `path`, reading its manifest and key listing.
    ///
    /// Fails with [`ArchiveError::Corrupt`] if the file cannot be read, fails
    /// verification, or has a missing or unparsable manifest.
    pub fn open(path: impl Into<PathBuf>) -> ArchiveResult<Self> {
        let path = path.into();
        let corrupt = |source| ArchiveError::Corrupt {
            path: path.clone(),
            source,
        };

        let reader = ArchiveReader::open(&path).map_err(corrupt)?;
        let manifest = reader.manifest().map_err(corrupt)?;
        let keys = reader.payload_keys().map_err(corrupt)?;

        tracing::debug!(
            path = %path.display(),
            manifest = %manifest,
            keys = keys.len(),
            "opened archive"
        );

        Ok(Self {
            manifest,
            keys,
            inner: RwLock::new(Inner {
                path,
                state: ReaderState::Unopened,
            }),
        })
    }

    /// The archive's manifest. No I/O.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// The slot this archive competes for.
    pub fn id(&self) -> ManifestId {
        self.manifest.id()
    }

    /// All payload keys in the archive, sorted. The manifest entry is not a
    /// payload key.
    pub fn payload_keys(&self) -> &[PayloadKey] {
        &self.keys
    }

    pub fn contains_key(&self, key: &PayloadKey) -> bool {
        self.keys.binary_search(key).is_ok()
    }

    /// Current backing file path.
    pub fn path(&self) -> PathBuf {
        self.inner.read().expect("archive lock poisoned").path.clone()
    }

    pub fn state(&self) -> ArchiveState {
        self.inner.read().expect("archive lock poisoned").state.observe()
    }

    /// Raw bytes of the payload for `key`, or `None` if the archive does not
    /// contain it.
    pub fn read_payload(&self, key: &PayloadKey) -> ArchiveResult<Option<Vec<u8>>> {
        if !self.contains_key(key) {
            return Ok(None);
        }
        let reader = self.reader()?;
        reader
            .read_payload(key)
            .map_err(|e| ArchiveError::PayloadLoad {
                key: key.clone(),
                reason: e.to_string(),
            })
    }

    /// Load and deserialize the payload for `key` with `loader`.
    pub fn load_payload<L: PayloadLoader + ?Sized>(
        &self,
        key: &PayloadKey,
        loader: &L,
    ) -> ArchiveResult<Option<L::Model>> {
        match self.read_payload(key)? {
            Some(bytes) => loader
                .load(key, &bytes)
                .map(Some)
                .map_err(|e| ArchiveError::PayloadLoad {
                    key: key.clone(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Move the backing file to `new_path`.
    ///
    /// On failure the archive stays usable at its original path and
    /// [`ArchiveError::RelocationFailed`] is returned. Must only be called by
    /// the single writer that owns this archive's lifecycle.
    pub fn relocate(&self, new_path: &Path) -> ArchiveResult<()> {
        let mut inner = self.inner.write().expect("archive lock poisoned");
        if matches!(inner.state, ReaderState::Closed) {
            return Err(ArchiveError::Closed {
                path: inner.path.clone(),
            });
        }
        if inner.path == new_path {
            return Ok(());
        }

        let was_open = matches!(inner.state, ReaderState::Open(_));
        inner.state = ReaderState::Unopened;

        let result = std::fs::rename(&inner.path, new_path);
        let from = inner.path.clone();
        if result.is_ok() {
            inner.path = new_path.to_path_buf();
        }
        if was_open {
            match self.open_verified(&inner.path) {
                Ok(reader) => inner.state = ReaderState::Open(Arc::new(reader)),
                Err(e) => tracing::warn!(
                    path = %inner.path.display(),
                    error = %e,
                    "failed to reopen archive after relocation; will retry lazily"
                ),
            }
        }

        match result {
            Ok(()) => {
                tracing::debug!(
                    from = %from.display(),
                    to = %new_path.display(),
                    "relocated archive"
                );
                Ok(())
            }
            Err(source) => Err(ArchiveError::RelocationFailed {
                from,
                to: new_path.to_path_buf(),
                source,
            }),
        }
    }

    /// Close the reader and remove the backing file. Terminal.
    pub fn delete(&self) -> ArchiveResult<()> {
        let mut inner = self.inner.write().expect("archive lock poisoned");
        inner.state = ReaderState::Closed;
        match std::fs::remove_file(&inner.path) {
            Ok(()) => {
                tracing::debug!(path = %inner.path.display(), "deleted archive");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %inner.path.display(), "archive file already gone");
                Ok(())
            }
            Err(e) => Err(ArchiveError::Io(e)),
        }
    }

    /// Release the reader. Terminal and idempotent; the file is kept.
    pub fn close(&self) {
        let mut inner = self.inner.write().expect("archive lock poisoned");
        inner.state = ReaderState::Closed;
    }

    /// Open the reader now if it is not already open.
    ///
    /// An open reader holds the whole container in memory, so reads keep
    /// working after the backing file is replaced.
    pub fn preload(&self) -> ArchiveResult<()> {
        self.reader().map(|_| ())
    }

    /// Returns the open reader, opening it on first use.
    fn reader(&self) -> ArchiveResult<Arc<ArchiveReader>> {
        {
            let inner = self.inner.read().expect("archive lock poisoned");
            match &inner.state {
                ReaderState::Open(reader) => return Ok(Arc::clone(reader)),
                ReaderState::Closed => {
                    return Err(ArchiveError::Closed {
                        path: inner.path.clone(),
                    })
                }
                ReaderState::Unopened => {}
            }
        }

        let mut inner = self.inner.write().expect("archive lock poisoned");
        match &inner.state {
            ReaderState::Open(reader) => Ok(Arc::clone(reader)),
            ReaderState::Closed => Err(ArchiveError::Closed {
                path: inner.path.clone(),
            }),
            ReaderState::Unopened => {
                let reader = Arc::new(self.open_verified(&inner.path)?);
                inner.state = ReaderState::Open(Arc::clone(&reader));
                Ok(reader)
            }
        }
    }

    fn open_verified(&self, path: &Path) -> ArchiveResult<ArchiveReader> {
        let corrupt = |source| ArchiveError::Corrupt {
            path: path.to_path_buf(),
            source,
        };
        let reader = ArchiveReader::open(path).map_err(corrupt)?;
        let found = reader.manifest().map_err(corrupt)?;
        if found != self.manifest {
            return Err(corrupt(ContainerError::ManifestMismatch {
                expected: self.manifest.to_string(),
                found: found.to_string(),
            }));
        }
        Ok(reader)
    }
}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read().expect("archive lock poisoned");
        f.debug_struct("Archive")
            .field("manifest", &self.manifest)
            .field("keys", &self.keys.len())
            .field("path", &inner.path)
            .field("state", &inner.state.observe())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{JsonLoader, RawLoader};
    use crate::writer::ArchiveWriter;
    use chrono::{TimeZone, Utc};
    use mas_types::Version;

    fn key(s: &str) -> PayloadKey {
        PayloadKey::new(s).unwrap()
    }

    fn manifest(ts: i64) -> Manifest {
        Manifest::new("Foo", Version::from(1), Utc.timestamp_opt(ts, 0).unwrap()).unwrap()
    }

    fn write_archive(path: &Path, ts: i64, payloads: &[(&str, &[u8])]) {
        let mut writer = ArchiveWriter::new(manifest(ts));
        for (k, data) in payloads {
            writer.add_payload(&key(k), data);
        }
        writer.finish(path).unwrap();
    }

    #[test]
    fn open_reads_manifest_and_keys_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mas");
        write_archive(&path, 100, &[("Foo#bar", b"bar"), ("Foo#baz", b"baz")]);

        let archive = Archive::open(&path).unwrap();
        assert_eq!(archive.manifest(), &manifest(100));
        assert_eq!(archive.payload_keys(), &[key("Foo#bar"), key("Foo#baz")]);
        assert_eq!(archive.state(), ArchiveState::Unopened);

        let bytes = archive.read_payload(&key("Foo#bar")).unwrap().unwrap();
        assert_eq!(bytes, b"bar");
        assert_eq!(archive.state(), ArchiveState::Open);
    }

    #[test]
    fn missing_key_is_none_without_opening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mas");
        write_archive(&path, 100, &[("Foo#bar", b"bar")]);

        let archive = Archive::open(&path).unwrap();
        assert!(archive.read_payload(&key("Foo#qux")).unwrap().is_none());
        assert_eq!(archive.state(), ArchiveState::Unopened);
    }

    #[test]
    fn open_garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.mas");
        std::fs::write(&path, b"this is not an archive at all, not even close....").unwrap();
        let err = Archive::open(&path).unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn open_missing_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let err = Archive::open(dir.path().join("nope.mas")).unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::Corrupt { source: ContainerError::Io(_), .. }
        ));
    }

    #[test]
    fn loader_failure_is_payload_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mas");
        write_archive(&path, 100, &[("Foo#bar", b"not json"), ("Foo#baz", b"[1,2]")]);

        let archive = Archive::open(&path).unwrap();
        let loader = JsonLoader::<Vec<u32>>::new();
        let err = archive.load_payload(&key("Foo#bar"), &loader).unwrap_err();
        assert!(matches!(err, ArchiveError::PayloadLoad { key: ref k, .. } if k.as_str() == "Foo#bar"));

        // other keys unaffected
        let ok = archive.load_payload(&key("Foo#baz"), &loader).unwrap().unwrap();
        assert_eq!(ok, vec![1, 2]);
    }

    #[test]
    fn relocate_moves_file_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("download.mas");
        let to = dir.path().join("Foo_1.0.0.mas");
        write_archive(&from, 100, &[("Foo#bar", b"bar")]);

        let archive = Archive::open(&from).unwrap();
        archive.read_payload(&key("Foo#bar")).unwrap();
        archive.relocate(&to).unwrap();

        assert_eq!(archive.path(), to);
        assert!(!from.exists());
        assert_eq!(archive.state(), ArchiveState::Open);
        assert_eq!(archive.read_payload(&key("Foo#bar")).unwrap().unwrap(), b"bar");
    }

    #[test]
    fn relocate_unopened_stays_unopened() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a.mas");
        let to = dir.path().join("b.mas");
        write_archive(&from, 100, &[("Foo#bar", b"bar")]);

        let archive = Archive::open(&from).unwrap();
        archive.relocate(&to).unwrap();
        assert_eq!(archive.state(), ArchiveState::Unopened);
        assert_eq!(archive.read_payload(&key("Foo#bar")).unwrap().unwrap(), b"bar");
    }

    #[test]
    fn failed_relocation_keeps_archive_usable() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a.mas");
        let to = dir.path().join("missing-dir").join("b.mas");
        write_archive(&from, 100, &[("Foo#bar", b"bar")]);

        let archive = Archive::open(&from).unwrap();
        archive.read_payload(&key("Foo#bar")).unwrap();
        let err = archive.relocate(&to).unwrap_err();
        assert!(matches!(err, ArchiveError::RelocationFailed { .. }));

        assert_eq!(archive.path(), from);
        assert_eq!(archive.state(), ArchiveState::Open);
        assert_eq!(archive.read_payload(&key("Foo#bar")).unwrap().unwrap(), b"bar");
    }

    #[test]
    fn delete_removes_file_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mas");
        write_archive(&path, 100, &[("Foo#bar", b"bar")]);

        let archive = Archive::open(&path).unwrap();
        archive.delete().unwrap();
        assert!(!path.exists());
        assert_eq!(archive.state(), ArchiveState::Closed);

        let err = archive.read_payload(&key("Foo#bar")).unwrap_err();
        assert!(matches!(err, ArchiveError::Closed { .. }));
        assert!(matches!(
            archive.relocate(&dir.path().join("b.mas")).unwrap_err(),
            ArchiveError::Closed { .. }
        ));
    }

    #[test]
    fn close_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mas");
        write_archive(&path, 100, &[("Foo#bar", b"bar")]);

        let archive = Archive::open(&path).unwrap();
        archive.close();
        archive.close();
        assert!(path.exists());
        assert!(matches!(
            archive.load_payload(&key("Foo#bar"), &RawLoader).unwrap_err(),
            ArchiveError::Closed { .. }
        ));
    }

    #[test]
    fn replaced_backing_file_detected_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mas");
        write_archive(&path, 100, &[("Foo#bar", b"old")]);
        let archive = Archive::open(&path).unwrap();

        write_archive(&path, 200, &[("Foo#bar", b"new")]);
        let err = archive.read_payload(&key("Foo#bar")).unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::Corrupt { source: ContainerError::ManifestMismatch { .. }, .. }
        ));
    }

    #[test]
    fn preloaded_archive_survives_replaced_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mas");
        write_archive(&path, 100, &[("Foo#bar", b"old")]);
        let archive = Archive::open(&path).unwrap();
        archive.preload().unwrap();
        assert_eq!(archive.state(), ArchiveState::Open);

        write_archive(&path, 200, &[("Foo#bar", b"new")]);
        let bytes = archive.read_payload(&key("Foo#bar")).unwrap().unwrap();
        assert_eq!(bytes, b"old");
    }

    #[test]
    fn superseded_errors_classified() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mas");
        write_archive(&path, 100, &[("Foo#bar", b"old")]);

        let replaced = Archive::open(&path).unwrap();
        write_archive(&path, 200, &[("Foo#bar", b"new")]);
        assert!(replaced.read_payload(&key("Foo#bar")).unwrap_err().is_superseded());

        let closed = Archive::open(&path).unwrap();
        closed.close();
        assert!(closed.read_payload(&key("Foo#bar")).unwrap_err().is_superseded());

        std::fs::write(&path, b"garbage").unwrap();
        let truncated = replaced.read_payload(&key("Foo#bar")).unwrap_err();
        assert!(truncated.is_corrupt());
        assert!(!truncated.is_superseded());
    }
}
