//! Helpers for building archives on disk in tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use mas_archive::{Archive, ArchiveWriter};
use mas_types::{Manifest, PayloadKey, Version};

pub fn key(s: &str) -> PayloadKey {
    PayloadKey::new(s).unwrap()
}

pub fn manifest(name: &str, version: u32, ts: i64) -> Manifest {
    Manifest::new(name, Version::from(version), Utc.timestamp_opt(ts, 0).unwrap()).unwrap()
}

/// Write an archive whose payloads are the key text itself as bytes.
pub fn write(
    dir: &Path,
    file: &str,
    name: &str,
    version: u32,
    ts: i64,
    keys: &[&str],
) -> PathBuf {
    let path = dir.join(file);
    let mut writer = ArchiveWriter::new(manifest(name, version, ts));
    for k in keys {
        writer.add_payload(&key(k), k.as_bytes());
    }
    writer.finish(&path).unwrap();
    path
}

pub fn open(
    dir: &Path,
    file: &str,
    name: &str,
    version: u32,
    ts: i64,
    keys: &[&str],
) -> Archive {
    Archive::open(write(dir, file, name, version, ts, keys)).unwrap()
}

pub fn shared(
    dir: &Path,
    file: &str,
    name: &str,
    version: u32,
    ts: i64,
    keys: &[&str],
) -> Arc<Archive> {
    Arc::new(open(dir, file, name, version, ts, keys))
}

/// Write an archive with explicit payload bytes.
pub fn write_payloads(
    dir: &Path,
    file: &str,
    manifest: Manifest,
    payloads: &[(&str, &[u8])],
) -> PathBuf {
    let path = dir.join(file);
    let mut writer = ArchiveWriter::new(manifest);
    for (k, data) in payloads {
        writer.add_payload(&key(k), data);
    }
    writer.finish(&path).unwrap();
    path
}
