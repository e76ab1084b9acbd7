//! The concurrent model archive store.
//!
//! Readers take the current `Arc<StoreIndex>` under a read lock held only
//! for the pointer clone, then resolve against that snapshot without any
//! lock. Writers serialize on a separate mutex, derive the next snapshot off
//! to the side, move accepted files to their canonical names, and publish
//! with a single pointer swap.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use mas_archive::{Archive, ArchiveError, ArchiveResult, ArchiveWriter, PayloadLoader};
use mas_types::{Manifest, ManifestId, PayloadKey, SimpleKey, Version};

use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::index::{Derivation, StoreIndex};

/// What happened to a single stored archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreOutcome {
    /// The archive now serves its slot.
    Accepted {
        manifest: Manifest,
        /// The manifest it superseded, if the slot was occupied.
        replaced: Option<Manifest>,
    },
    /// A strictly newer archive holds the slot. The submitted file has been
    /// deleted.
    Rejected {
        manifest: Manifest,
        current: Option<Manifest>,
    },
}

impl StoreOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn manifest(&self) -> &Manifest {
        match self {
            Self::Accepted { manifest, .. } | Self::Rejected { manifest, .. } => manifest,
        }
    }
}

/// Summary of a batch commit or directory scan.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub accepted: Vec<Manifest>,
    pub rejected: Vec<Manifest>,
    pub evicted: Vec<Manifest>,
    /// Accepted candidates whose file could not be moved to its canonical
    /// name. They were left out of the snapshot and their files untouched.
    pub failed: Vec<(Manifest, ArchiveError)>,
    /// Files that could not be opened as archives during a directory scan.
    pub corrupt: Vec<(PathBuf, ArchiveError)>,
}

/// Models resolved through a simple key.
///
/// One entry per full key; keys whose payload failed to load are reported
/// in `failures` instead of aborting the lookup.
#[derive(Debug)]
pub struct SimpleKeyResolution<M> {
    pub models: BTreeMap<PayloadKey, M>,
    pub failures: Vec<(PayloadKey, ArchiveError)>,
}

impl<M> Default for SimpleKeyResolution<M> {
    fn default() -> Self {
        Self {
            models: BTreeMap::new(),
            failures: Vec::new(),
        }
    }
}

impl<M> SimpleKeyResolution<M> {
    pub fn is_empty(&self) -> bool {
        self.models.is_empty() && self.failures.is_empty()
    }

    /// Returns `true` if every matching key loaded.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Versioned store of model archives backed by a single directory.
pub struct ModelArchiveStore<L: PayloadLoader> {
    config: StoreConfig,
    loader: L,
    writer: Mutex<()>,
    current: RwLock<Arc<StoreIndex>>,
}

impl<L: PayloadLoader> ModelArchiveStore<L> {
    /// Create an empty store over `config.root`, creating the directory if
    /// needed. Existing files are not scanned.
    pub fn new(config: StoreConfig, loader: L) -> StoreResult<Self> {
        config.validate()?;
        fs::create_dir_all(&config.root)?;
        Ok(Self {
            config,
            loader,
            writer: Mutex::new(()),
            current: RwLock::new(Arc::new(StoreIndex::new())),
        })
    }

    /// Create a store and index every archive already in `config.root`.
    pub fn open(config: StoreConfig, loader: L) -> StoreResult<Self> {
        let store = Self::new(config, loader)?;
        store.initialize_from_directory()?;
        Ok(store)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Canonical file location of the archive serving `id`.
    pub fn archive_path(&self, id: &ManifestId) -> PathBuf {
        self.config
            .root
            .join(format!("{}.{}", id.file_stem(), self.config.extension))
    }

    /// A writer for a new archive using the configured compression level.
    pub fn archive_writer(&self, manifest: Manifest) -> ArchiveWriter {
        ArchiveWriter::new(manifest).with_compression_level(self.config.compression_level)
    }

    /// The current snapshot. Never blocks on writers.
    pub fn snapshot(&self) -> Arc<StoreIndex> {
        Arc::clone(&self.current.read().expect("index lock poisoned"))
    }

    // -- writes --

    /// Submit one archive.
    ///
    /// Accepted archives are moved to their canonical name, replacing the
    /// file of the archive they supersede. Rejected archives are deleted.
    /// Fails with [`ArchiveError::RelocationFailed`] if the accepted file
    /// cannot be moved, in which case nothing changes.
    pub fn store(&self, archive: Archive) -> StoreResult<StoreOutcome> {
        let archive = Arc::new(archive);
        let manifest = archive.manifest().clone();
        let (mut report, index) = self.commit(vec![Arc::clone(&archive)]);

        if let Some((_, err)) = report.failed.pop() {
            return Err(err.into());
        }
        if index.holds(&archive) {
            Ok(StoreOutcome::Accepted {
                manifest,
                replaced: report.evicted.pop(),
            })
        } else {
            Ok(StoreOutcome::Rejected {
                current: index.get(&archive.id()).map(|a| a.manifest().clone()),
                manifest,
            })
        }
    }

    /// Open the archive at `path` and submit it.
    ///
    /// A file that cannot be read as an archive is deleted and reported as
    /// [`ArchiveError::Corrupt`].
    pub fn store_file(&self, path: impl AsRef<Path>) -> StoreResult<StoreOutcome> {
        let path = path.as_ref();
        match Archive::open(path) {
            Ok(archive) => self.store(archive),
            Err(err) => {
                if err.is_corrupt() && path.is_file() {
                    tracing::warn!(path = %path.display(), error = %err, "deleting corrupt archive");
                    if let Err(rm) = fs::remove_file(path) {
                        tracing::warn!(path = %path.display(), error = %rm, "failed to delete corrupt archive");
                    }
                }
                Err(err.into())
            }
        }
    }

    /// Submit several archives as one commit, in order. Readers see either
    /// none or all of the batch.
    pub fn store_batch(&self, archives: Vec<Archive>) -> StoreResult<BatchReport> {
        let candidates = archives.into_iter().map(Arc::new).collect();
        let (report, _) = self.commit(candidates);
        Ok(report)
    }

    /// Scan `config.root` and submit every archive found as one batch.
    ///
    /// Unreadable files are logged and skipped; they stay on disk.
    pub fn initialize_from_directory(&self) -> StoreResult<BatchReport> {
        let root = &self.config.root;
        fs::create_dir_all(root)?;

        let mut paths = Vec::new();
        for entry in fs::read_dir(root)? {
            let path = entry?.path();
            if path.is_file() && self.config.is_archive_path(&path) {
                paths.push(path);
            }
        }
        paths.sort();

        let mut candidates = Vec::with_capacity(paths.len());
        let mut corrupt = Vec::new();
        for path in paths {
            match Archive::open(&path) {
                Ok(archive) => candidates.push(Arc::new(archive)),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping corrupt archive");
                    corrupt.push((path, err));
                }
            }
        }

        let (mut report, index) = self.commit(candidates);
        report.corrupt = corrupt;
        tracing::info!(
            root = %root.display(),
            archives = index.len(),
            keys = index.key_count(),
            corrupt = report.corrupt.len(),
            failed = report.failed.len(),
            "initialized store from directory"
        );
        Ok(report)
    }

    /// Drop every archive from the index and close them. Files are kept, so
    /// a later [`initialize_from_directory`](Self::initialize_from_directory)
    /// restores the same state.
    pub fn close(&self) {
        let _writer = self.writer.lock().expect("writer lock poisoned");
        let old = std::mem::take(&mut *self.current.write().expect("index lock poisoned"));
        for archive in old.archives() {
            archive.close();
        }
        tracing::info!(archives = old.len(), "closed store");
    }

    // -- reads --

    pub fn has_model(&self, key: &PayloadKey) -> bool {
        self.snapshot().contains_key(key)
    }

    /// Load the model stored under `key`.
    ///
    /// `Ok(None)` if no indexed archive contains the key. A read that lands
    /// on an archive retired by a concurrent commit is retried against the
    /// newer snapshot.
    pub fn get_model(&self, key: &PayloadKey) -> StoreResult<Option<L::Model>> {
        let mut snapshot = self.snapshot();
        loop {
            match load_first(&snapshot, key, &self.loader) {
                Err(err) if err.is_superseded() => match self.newer_snapshot(&snapshot) {
                    Some(fresh) => {
                        tracing::debug!(key = %key, error = %err, "archive superseded during read, retrying");
                        snapshot = fresh;
                    }
                    None => return Err(err.into()),
                },
                result => return Ok(result?),
            }
        }
    }

    /// Load every model whose key abbreviates to `simple`.
    ///
    /// All keys resolve against one snapshot. If any load hit an archive
    /// retired by a concurrent commit, the whole lookup is redone.
    pub fn get_models_by_simple_key(&self, simple: &SimpleKey) -> SimpleKeyResolution<L::Model> {
        let mut snapshot = self.snapshot();
        let resolution = loop {
            let resolution = resolve_simple_key(&snapshot, simple, &self.loader);
            let superseded = resolution.failures.iter().any(|(_, err)| err.is_superseded());
            match self.newer_snapshot(&snapshot) {
                Some(fresh) if superseded => {
                    tracing::debug!(simple_key = %simple, "archive superseded during read, retrying");
                    snapshot = fresh;
                }
                _ => break resolution,
            }
        };
        for (key, err) in &resolution.failures {
            tracing::warn!(key = %key, error = %err, "failed to load model");
        }
        resolution
    }

    /// The current snapshot, if a commit published one after `seen`.
    fn newer_snapshot(&self, seen: &Arc<StoreIndex>) -> Option<Arc<StoreIndex>> {
        let current = self.snapshot();
        (!Arc::ptr_eq(&current, seen)).then_some(current)
    }

    pub fn get_manifest(&self, name: &str, version: Version) -> Option<Manifest> {
        self.snapshot()
            .get(&ManifestId::new(name, version))
            .map(|archive| archive.manifest().clone())
    }

    /// Manifests of all indexed archives, ordered by `(name, version)`.
    pub fn get_all_manifests(&self) -> Vec<Manifest> {
        self.snapshot().manifests()
    }

    pub fn get_archive(&self, id: &ManifestId) -> Option<Arc<Archive>> {
        self.snapshot().get(id).cloned()
    }

    pub fn contains_manifest(&self, id: &ManifestId) -> bool {
        self.snapshot().contains_slot(id)
    }

    // -- commit --

    /// Derive, relocate, publish, then retire losers. Returns the snapshot
    /// the commit produced.
    fn commit(&self, candidates: Vec<Arc<Archive>>) -> (BatchReport, Arc<StoreIndex>) {
        let _writer = self.writer.lock().expect("writer lock poisoned");
        let base = self.snapshot();

        let mut pending = candidates;
        let mut failed = Vec::new();
        let derivation = loop {
            let derivation = base.derive_with(pending.clone());
            preload(&derivation.evicted);
            match self.relocate_accepted(&derivation.accepted) {
                Ok(()) => break derivation,
                Err((archive, err)) => {
                    tracing::warn!(
                        manifest = %archive.manifest(),
                        error = %err,
                        "relocation failed, leaving archive out of snapshot"
                    );
                    pending.retain(|a| !Arc::ptr_eq(a, &archive));
                    failed.push((archive.manifest().clone(), err));
                }
            }
        };

        let Derivation {
            index,
            accepted,
            rejected,
            evicted,
        } = derivation;
        let index = if accepted.is_empty() {
            base
        } else {
            let index = Arc::new(index);
            *self.current.write().expect("index lock poisoned") = Arc::clone(&index);
            index
        };

        for archive in &evicted {
            tracing::debug!(manifest = %archive.manifest(), "evicted archive");
            archive.close();
        }

        let live: BTreeSet<PathBuf> = index.archives().map(|a| a.path()).collect();
        for archive in &rejected {
            tracing::debug!(manifest = %archive.manifest(), path = %archive.path().display(), "rejected archive");
            if live.contains(&archive.path()) {
                archive.close();
            } else if let Err(err) = archive.delete() {
                tracing::warn!(
                    path = %archive.path().display(),
                    error = %err,
                    "failed to delete rejected archive"
                );
            }
        }

        if !accepted.is_empty() {
            tracing::info!(
                accepted = accepted.len(),
                rejected = rejected.len(),
                evicted = evicted.len(),
                archives = index.len(),
                "published snapshot"
            );
        }

        let report = BatchReport {
            accepted: manifests(&accepted),
            rejected: manifests(&rejected),
            evicted: manifests(&evicted),
            failed,
            corrupt: Vec::new(),
        };
        (report, index)
    }

    fn relocate_accepted(&self, accepted: &[Arc<Archive>]) -> Result<(), (Arc<Archive>, ArchiveError)> {
        for archive in accepted {
            let target = self.archive_path(&archive.id());
            archive
                .relocate(&target)
                .map_err(|err| (Arc::clone(archive), err))?;
        }
        Ok(())
    }
}

impl<L: PayloadLoader> std::fmt::Debug for ModelArchiveStore<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelArchiveStore")
            .field("config", &self.config)
            .field("index", &self.snapshot())
            .finish()
    }
}

fn load_first<L: PayloadLoader + ?Sized>(
    snapshot: &StoreIndex,
    key: &PayloadKey,
    loader: &L,
) -> ArchiveResult<Option<L::Model>> {
    match snapshot.archives_for_key(key).first() {
        Some(archive) => archive.load_payload(key, loader),
        None => Ok(None),
    }
}

fn resolve_simple_key<L: PayloadLoader + ?Sized>(
    snapshot: &StoreIndex,
    simple: &SimpleKey,
    loader: &L,
) -> SimpleKeyResolution<L::Model> {
    let mut resolution = SimpleKeyResolution::default();
    for key in snapshot.keys_for_simple_key(simple) {
        match load_first(snapshot, key, loader) {
            Ok(Some(model)) => {
                resolution.models.insert(key.clone(), model);
            }
            Ok(None) => {}
            Err(err) => resolution.failures.push((key.clone(), err)),
        }
    }
    resolution
}

/// Pull soon-to-be-evicted archives into memory before their canonical file
/// is overwritten, so readers of the outgoing snapshot keep working.
fn preload(archives: &[Arc<Archive>]) {
    for archive in archives {
        if let Err(err) = archive.preload() {
            tracing::warn!(
                manifest = %archive.manifest(),
                error = %err,
                "failed to preload evicted archive"
            );
        }
    }
}

fn manifests(archives: &[Arc<Archive>]) -> Vec<Manifest> {
    archives.iter().map(|a| a.manifest().clone()).collect()
}
