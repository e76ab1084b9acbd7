//! Versioned, concurrent store of model archives.
//!
//! The store keeps one directory of archive files and an in-memory index
//! over them. Each `(name, version)` slot is served by at most one archive:
//! the one whose manifest carries the latest timestamp.
//!
//! # Components
//!
//! - [`StoreIndex`] -- immutable snapshot mapping slots, payload keys and
//!   simple keys to archives
//! - [`ModelArchiveStore`] -- publishes snapshots and owns archive lifecycle
//! - [`StoreConfig`] -- directory, file extension and compression settings
//!
//! # Design Rules
//!
//! 1. A published snapshot is never mutated; writers derive a new one.
//! 2. Readers never wait for writers beyond a pointer clone.
//! 3. Writers are serialized; a batch becomes visible all at once.
//! 4. Every indexed archive lives at its canonical file name.
//! 5. Rejected archives are deleted; superseded archives are closed.

pub mod config;
pub mod error;
pub mod index;
pub mod store;

#[cfg(test)]
mod test_support;

pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use index::{Derivation, StoreIndex};
pub use store::{BatchReport, ModelArchiveStore, SimpleKeyResolution, StoreOutcome};
