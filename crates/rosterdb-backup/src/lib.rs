//! RosterDB Backup - object-store snapshots for identity migrations.
//!
//! Implements [`rosterdb_core::SnapshotProvider`] over any `object_store`
//! backend: a local directory, an S3-compatible bucket, or memory.
//!
//! Each backup is a directory of gzip'd JSON table payloads plus a manifest
//! recording a SHA-256 digest per payload. Restores verify every digest
//! before the first table is written back.

pub mod codec;
pub mod error;
pub mod manifest;
pub mod provider;

pub use error::{BackupError, Result};
pub use manifest::{BackupManifest, ManifestEntry, MANIFEST_VERSION};
pub use provider::ObjectStoreSnapshotProvider;
