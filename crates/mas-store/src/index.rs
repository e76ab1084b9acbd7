//! Immutable snapshot index over the stored archives.
//!
//! A [`StoreIndex`] is never mutated once published. Writers call
//! [`StoreIndex::derive_with`] on the current snapshot to compute the next
//! one, and the store swaps the pointer.
//!
//! Three maps are kept consistent with each other:
//!
//! - `by_slot`: at most one archive per `(name, version)`.
//! - `by_key`: payload key → every indexed archive containing it.
//! - `by_simple_key`: simple key → the full keys present in `by_key`.
//!
//! An archive appears in `by_key` exactly for its own payload keys, and a
//! simple-key bucket is dropped as soon as it empties.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use mas_archive::Archive;
use mas_types::{Manifest, ManifestId, PayloadKey, SimpleKey};

/// Copy-on-write view of the store.
#[derive(Clone, Default)]
pub struct StoreIndex {
    by_slot: BTreeMap<ManifestId, Arc<Archive>>,
    by_key: BTreeMap<PayloadKey, Vec<Arc<Archive>>>,
    by_simple_key: BTreeMap<SimpleKey, BTreeSet<PayloadKey>>,
}

/// Result of deriving a new snapshot from a batch of candidates.
pub struct Derivation {
    /// The next snapshot.
    pub index: StoreIndex,
    /// Candidates serving a slot in `index`.
    pub accepted: Vec<Arc<Archive>>,
    /// Candidates not present in `index`, including ones superseded by a
    /// later candidate of the same batch.
    pub rejected: Vec<Arc<Archive>>,
    /// Archives of the base snapshot no longer present in `index`.
    pub evicted: Vec<Arc<Archive>>,
}

impl StoreIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute the snapshot that results from submitting `candidates`, in
    /// order, to this one. `self` is left untouched.
    ///
    /// A candidate takes its slot unless the current holder's timestamp is
    /// strictly later. Equal timestamps go to the newcomer.
    pub fn derive_with(&self, candidates: Vec<Arc<Archive>>) -> Derivation {
        let mut next = self.clone();

        for candidate in &candidates {
            let id = candidate.id();
            if let Some(current) = next.by_slot.get(&id) {
                if Arc::ptr_eq(current, candidate) {
                    continue;
                }
                if current.manifest().is_newer_than(candidate.manifest()) {
                    tracing::debug!(
                        candidate = %candidate.manifest(),
                        current = %current.manifest(),
                        "candidate older than current slot holder"
                    );
                    continue;
                }
                let current = Arc::clone(current);
                next.unindex(&current);
            }
            tracing::debug!(manifest = %candidate.manifest(), "candidate takes slot");
            next.insert(id, Arc::clone(candidate));
        }

        let mut accepted: Vec<Arc<Archive>> = Vec::new();
        let mut rejected: Vec<Arc<Archive>> = Vec::new();
        for candidate in candidates {
            if contains_ptr(&accepted, &candidate) || contains_ptr(&rejected, &candidate) {
                continue;
            }
            if next.holds(&candidate) {
                accepted.push(candidate);
            } else {
                rejected.push(candidate);
            }
        }

        let evicted = self
            .by_slot
            .values()
            .filter(|archive| !next.holds(archive))
            .cloned()
            .collect();

        Derivation {
            index: next,
            accepted,
            rejected,
            evicted,
        }
    }

    /// Returns `true` if `archive` itself (not merely its slot) is indexed.
    pub fn holds(&self, archive: &Arc<Archive>) -> bool {
        self.by_slot
            .get(&archive.id())
            .is_some_and(|current| Arc::ptr_eq(current, archive))
    }

    pub fn get(&self, id: &ManifestId) -> Option<&Arc<Archive>> {
        self.by_slot.get(id)
    }

    pub fn contains_slot(&self, id: &ManifestId) -> bool {
        self.by_slot.contains_key(id)
    }

    pub fn contains_key(&self, key: &PayloadKey) -> bool {
        self.by_key.contains_key(key)
    }

    /// Archives containing `key`, in indexing order. Empty if none.
    pub fn archives_for_key(&self, key: &PayloadKey) -> &[Arc<Archive>] {
        self.by_key.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Full keys whose simple key is `simple`, sorted.
    pub fn keys_for_simple_key(&self, simple: &SimpleKey) -> impl Iterator<Item = &PayloadKey> {
        self.by_simple_key.get(simple).into_iter().flatten()
    }

    /// Indexed archives, ordered by slot.
    pub fn archives(&self) -> impl Iterator<Item = &Arc<Archive>> {
        self.by_slot.values()
    }

    /// Manifests of all indexed archives, ordered by `(name, version)`.
    pub fn manifests(&self) -> Vec<Manifest> {
        self.by_slot.values().map(|a| a.manifest().clone()).collect()
    }

    /// All indexed payload keys, sorted.
    pub fn keys(&self) -> impl Iterator<Item = &PayloadKey> {
        self.by_key.keys()
    }

    pub fn len(&self) -> usize {
        self.by_slot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_slot.is_empty()
    }

    pub fn key_count(&self) -> usize {
        self.by_key.len()
    }

    /// Check the cross-map invariants, describing the first violation.
    pub fn check_consistency(&self) -> Result<(), String> {
        for (id, archive) in &self.by_slot {
            if &archive.id() != id {
                return Err(format!("slot {id} holds archive for {}", archive.id()));
            }
            for key in archive.payload_keys() {
                let listed = self.by_key.get(key).map(Vec::as_slice).unwrap_or(&[]);
                if listed.iter().filter(|a| Arc::ptr_eq(a, archive)).count() != 1 {
                    return Err(format!("{key} not listed exactly once for {id}"));
                }
            }
        }
        for (key, archives) in &self.by_key {
            if archives.is_empty() {
                return Err(format!("empty archive list for {key}"));
            }
            for archive in archives {
                if !self.holds(archive) {
                    return Err(format!("{key} maps to unindexed {}", archive.id()));
                }
                if !archive.contains_key(key) {
                    return Err(format!("{key} maps to {} which lacks it", archive.id()));
                }
            }
            let in_bucket = self
                .by_simple_key
                .get(&key.simple_key())
                .is_some_and(|bucket| bucket.contains(key));
            if !in_bucket {
                return Err(format!("{key} missing from its simple-key bucket"));
            }
        }
        for (simple, bucket) in &self.by_simple_key {
            if bucket.is_empty() {
                return Err(format!("empty simple-key bucket {simple}"));
            }
            for key in bucket {
                if !self.by_key.contains_key(key) || &key.simple_key() != simple {
                    return Err(format!("stale {key} in simple-key bucket {simple}"));
                }
            }
        }
        Ok(())
    }

    fn insert(&mut self, id: ManifestId, archive: Arc<Archive>) {
        for key in archive.payload_keys() {
            self.by_key
                .entry(key.clone())
                .or_default()
                .push(Arc::clone(&archive));
            self.by_simple_key
                .entry(key.simple_key())
                .or_default()
                .insert(key.clone());
        }
        self.by_slot.insert(id, archive);
    }

    fn unindex(&mut self, archive: &Arc<Archive>) {
        for key in archive.payload_keys() {
            let Some(listed) = self.by_key.get_mut(key) else {
                continue;
            };
            listed.retain(|a| !Arc::ptr_eq(a, archive));
            if !listed.is_empty() {
                continue;
            }
            self.by_key.remove(key);

            let simple = key.simple_key();
            if let Some(bucket) = self.by_simple_key.get_mut(&simple) {
                bucket.remove(key);
                if bucket.is_empty() {
                    self.by_simple_key.remove(&simple);
                }
            }
        }
        self.by_slot.remove(&archive.id());
    }
}

impl std::fmt::Debug for StoreIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreIndex")
            .field("slots", &self.by_slot.keys().collect::<Vec<_>>())
            .field("keys", &self.by_key.len())
            .finish()
    }
}

fn contains_ptr(list: &[Arc<Archive>], archive: &Arc<Archive>) -> bool {
    list.iter().any(|a| Arc::ptr_eq(a, archive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{key, shared};
    use mas_types::Version;
    use proptest::prelude::*;

    fn simple(s: &str) -> SimpleKey {
        SimpleKey::new(s)
    }

    fn simple_keys(index: &StoreIndex, s: &str) -> Vec<String> {
        index
            .keys_for_simple_key(&simple(s))
            .map(|k| k.as_str().to_string())
            .collect()
    }

    // =====================================================================
    // Single candidates
    // =====================================================================

    #[test]
    fn empty_index() {
        let index = StoreIndex::new();
        assert!(index.is_empty());
        assert_eq!(index.key_count(), 0);
        assert!(index.check_consistency().is_ok());
    }

    #[test]
    fn first_candidate_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let a = shared(dir.path(), "a.mas", "Foo", 1, 100, &["Foo#bar", "Foo#baz"]);

        let d = StoreIndex::new().derive_with(vec![a.clone()]);
        assert_eq!(d.accepted.len(), 1);
        assert!(d.rejected.is_empty());
        assert!(d.evicted.is_empty());
        assert!(d.index.holds(&a));
        assert!(d.index.contains_key(&key("Foo#bar")));
        assert_eq!(simple_keys(&d.index, "bar"), vec!["Foo#bar"]);
        assert!(d.index.check_consistency().is_ok());
    }

    #[test]
    fn newer_candidate_evicts_older() {
        let dir = tempfile::tempdir().unwrap();
        let old = shared(dir.path(), "old.mas", "Foo", 1, 100, &["Foo#bar", "Foo#baz"]);
        let new = shared(dir.path(), "new.mas", "Foo", 1, 200, &["Foo#baz"]);

        let base = StoreIndex::new().derive_with(vec![old.clone()]).index;
        let d = base.derive_with(vec![new.clone()]);

        assert!(d.index.holds(&new));
        assert!(!d.index.holds(&old));
        assert_eq!(d.evicted.len(), 1);
        assert!(Arc::ptr_eq(&d.evicted[0], &old));
        assert!(!d.index.contains_key(&key("Foo#bar")));
        assert!(simple_keys(&d.index, "bar").is_empty());
        assert!(d.index.check_consistency().is_ok());

        // base snapshot unchanged
        assert!(base.holds(&old));
        assert!(base.contains_key(&key("Foo#bar")));
    }

    #[test]
    fn older_candidate_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let current = shared(dir.path(), "cur.mas", "Foo", 1, 200, &["Foo#bar"]);
        let stale = shared(dir.path(), "stale.mas", "Foo", 1, 100, &["Foo#qux"]);

        let base = StoreIndex::new().derive_with(vec![current.clone()]).index;
        let d = base.derive_with(vec![stale.clone()]);

        assert!(d.accepted.is_empty());
        assert_eq!(d.rejected.len(), 1);
        assert!(d.evicted.is_empty());
        assert!(d.index.holds(&current));
        assert!(!d.index.contains_key(&key("Foo#qux")));
    }

    #[test]
    fn equal_timestamp_goes_to_newcomer() {
        let dir = tempfile::tempdir().unwrap();
        let first = shared(dir.path(), "1.mas", "Foo", 1, 100, &["Foo#bar"]);
        let second = shared(dir.path(), "2.mas", "Foo", 1, 100, &["Foo#bar"]);

        let base = StoreIndex::new().derive_with(vec![first.clone()]).index;
        let d = base.derive_with(vec![second.clone()]);
        assert!(d.index.holds(&second));
        assert!(Arc::ptr_eq(&d.evicted[0], &first));
        assert_eq!(d.index.archives_for_key(&key("Foo#bar")).len(), 1);
    }

    #[test]
    fn resubmitting_holder_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let a = shared(dir.path(), "a.mas", "Foo", 1, 100, &["Foo#bar"]);

        let base = StoreIndex::new().derive_with(vec![a.clone()]).index;
        let d = base.derive_with(vec![a.clone()]);
        assert_eq!(d.accepted.len(), 1);
        assert!(d.evicted.is_empty());
        assert_eq!(d.index.archives_for_key(&key("Foo#bar")).len(), 1);
        assert!(d.index.check_consistency().is_ok());
    }

    // =====================================================================
    // Batches
    // =====================================================================

    #[test]
    fn batch_superseded_candidate_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let a = shared(dir.path(), "a.mas", "Foo", 1, 100, &["Foo#a"]);
        let b = shared(dir.path(), "b.mas", "Foo", 1, 300, &["Foo#b"]);
        let c = shared(dir.path(), "c.mas", "Foo", 1, 200, &["Foo#c"]);

        let d = StoreIndex::new().derive_with(vec![a.clone(), b.clone(), c.clone()]);
        assert_eq!(d.accepted.len(), 1);
        assert!(Arc::ptr_eq(&d.accepted[0], &b));
        assert_eq!(d.rejected.len(), 2);
        assert!(d.evicted.is_empty());
        assert!(!d.index.contains_key(&key("Foo#a")));
        assert!(!d.index.contains_key(&key("Foo#c")));
        assert!(d.index.check_consistency().is_ok());
    }

    #[test]
    fn batch_covers_several_slots() {
        let dir = tempfile::tempdir().unwrap();
        let foo1 = shared(dir.path(), "f1.mas", "Foo", 1, 100, &["Foo#bar"]);
        let foo2 = shared(dir.path(), "f2.mas", "Foo", 2, 100, &["Foo#bar"]);
        let baz = shared(dir.path(), "z.mas", "Baz", 1, 100, &["Baz/bar"]);

        let d = StoreIndex::new().derive_with(vec![foo1, foo2, baz]);
        assert_eq!(d.index.len(), 3);
        assert_eq!(d.index.archives_for_key(&key("Foo#bar")).len(), 2);
        assert_eq!(simple_keys(&d.index, "bar"), vec!["Baz/bar", "Foo#bar"]);

        let ids: Vec<ManifestId> = d.index.manifests().iter().map(Manifest::id).collect();
        assert_eq!(
            ids,
            vec![
                ManifestId::new("Baz", Version::from(1)),
                ManifestId::new("Foo", Version::from(1)),
                ManifestId::new("Foo", Version::from(2)),
            ]
        );
    }

    #[test]
    fn shared_key_survives_partial_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let v1 = shared(dir.path(), "v1.mas", "Foo", 1, 100, &["Foo#bar"]);
        let v2 = shared(dir.path(), "v2.mas", "Foo", 2, 100, &["Foo#bar"]);
        let v1_new = shared(dir.path(), "v1n.mas", "Foo", 1, 200, &["Foo#qux"]);

        let base = StoreIndex::new().derive_with(vec![v1, v2.clone()]).index;
        let d = base.derive_with(vec![v1_new]);
        let listed = d.index.archives_for_key(&key("Foo#bar"));
        assert_eq!(listed.len(), 1);
        assert!(Arc::ptr_eq(&listed[0], &v2));
        assert_eq!(simple_keys(&d.index, "bar"), vec!["Foo#bar"]);
        assert!(d.index.check_consistency().is_ok());
    }

    #[test]
    fn empty_batch_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let a = shared(dir.path(), "a.mas", "Foo", 1, 100, &["Foo#bar"]);
        let base = StoreIndex::new().derive_with(vec![a.clone()]).index;
        let d = base.derive_with(Vec::new());
        assert!(d.accepted.is_empty() && d.rejected.is_empty() && d.evicted.is_empty());
        assert!(d.index.holds(&a));
    }

    // =====================================================================
    // Properties
    // =====================================================================

    const KEY_POOL: [&str; 4] = ["a/x", "a/y", "b#x", "c.z"];

    fn keys_from_mask(mask: u8) -> Vec<&'static str> {
        KEY_POOL
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, k)| *k)
            .collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn winner_is_last_with_latest_timestamp(
            ops in prop::collection::vec((0u8..2, 1u32..3, 0i64..4, 0u8..16), 1..10),
            split in 0usize..10,
        ) {
            let dir = tempfile::tempdir().unwrap();
            let names = ["Foo", "Bar"];
            let archives: Vec<Arc<Archive>> = ops
                .iter()
                .enumerate()
                .map(|(i, (n, v, ts, mask))| {
                    shared(
                        dir.path(),
                        &format!("{i}.mas"),
                        names[*n as usize],
                        *v,
                        *ts,
                        &keys_from_mask(*mask),
                    )
                })
                .collect();

            let split = split.min(archives.len());
            let first = StoreIndex::new().derive_with(archives[..split].to_vec()).index;
            let d = first.derive_with(archives[split..].to_vec());
            prop_assert!(d.index.check_consistency().is_ok());

            let mut expected: BTreeMap<ManifestId, &Arc<Archive>> = BTreeMap::new();
            for archive in &archives {
                let id = archive.id();
                let takes_slot = expected
                    .get(&id)
                    .map_or(true, |w| !w.manifest().is_newer_than(archive.manifest()));
                if takes_slot {
                    expected.insert(id, archive);
                }
            }
            prop_assert_eq!(d.index.len(), expected.len());
            for (id, winner) in &expected {
                let held = d.index.get(id).unwrap();
                prop_assert!(Arc::ptr_eq(held, winner));
            }

            let indexed_keys: BTreeSet<&PayloadKey> = d.index.keys().collect();
            let expected_keys: BTreeSet<&PayloadKey> = expected
                .values()
                .flat_map(|a| a.payload_keys())
                .collect();
            prop_assert_eq!(indexed_keys, expected_keys);
        }
    }
}
