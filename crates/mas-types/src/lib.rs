//! Foundation types for the model archive store (MAS).
//!
//! This crate provides the identity and key types shared by the archive
//! container, the store index, and the command-line front end. Every other
//! MAS crate depends on `mas-types`.
//!
//! # Key Types
//!
//! - [`Version`] -- `major.minor.micro` triple, totally ordered
//! - [`Manifest`] -- name, version and creation timestamp of an archive
//! - [`ManifestId`] -- the `(name, version)` slot an archive competes for
//! - [`PayloadKey`] -- full identifier of one serialized model
//! - [`SimpleKey`] -- trailing component of a payload key, for fuzzy lookup

pub mod error;
pub mod escape;
pub mod key;
pub mod manifest;
pub mod version;

pub use error::TypeError;
pub use key::{PayloadKey, SimpleKey};
pub use manifest::{Manifest, ManifestId};
pub use version::Version;
