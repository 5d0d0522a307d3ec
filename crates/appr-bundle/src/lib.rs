//! Operator bundle decoding for app-registry artifacts.
//!
//! An artifact is a tarball (optionally gzip-compressed) pulled from an app
//! registry together with its coordinates. Bundles come in two layouts:
//!
//! - **nested**: a directory tree of manifests (package file, per-version CSVs and CRDs)
//! - **flattened**: one YAML file carrying every resource of a release
//!
//! [`ManifestDecoder`] classifies each artifact, writes nested bundles to
//! `output_dir/namespace/name/release` and parses flattened bundles in memory.
//!
//! # Quick Start
//!
//! ```no_run
//! use appr_bundle::{Artifact, ManifestDecoder, RegistryCoordinates};
//!
//! # fn example(blob: Vec<u8>) -> Result<(), appr_bundle::BundleError> {
//! let decoder = ManifestDecoder::new(tracing::info_span!("sync"), "/var/lib/appr/manifests")?;
//!
//! let etcd = RegistryCoordinates::new("community-operators", "etcd", "0.6.1", "sha256:...");
//! let result = decoder.decode(&[Artifact::new(etcd, blob)])?;
//!
//! println!("nested: {}, flattened: {}", result.nested_count, result.flattened_count);
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod classify;
pub mod config;
pub mod decoder;
mod digest;
pub mod error;
pub mod flattened;
pub mod materialize;
pub mod storage;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export main types
pub use archive::{ArchiveReader, TarArchiveReader};
pub use classify::{classify, BundleFormat};
pub use config::{DecodeLimits, DecodeLimitsOverrides, DecoderConfig, FlattenedPolicy};
pub use decoder::{CancelFlag, DecoderBuilder, ManifestDecoder};
pub use digest::{compute_digest, verify_digest};
pub use error::{BundleError, BundleResult, ErrorKind, Stage};
pub use flattened::{parse_flattened, FlattenedManifest, Resource, ResourceSection};
pub use materialize::{bundle_directory, normalize_entry_path, NestedMaterializer};
pub use storage::{LocalStorage, MemoryNode, MemoryStorage, Storage};
pub use types::{
    ArchiveEntry, Artifact, Bundle, DecodeResult, EntryKind, RegistryCoordinates,
};
