//! Input, intermediate and output types for bundle decoding.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::flattened::FlattenedManifest;

/// Identity of one registry artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistryCoordinates {
    /// Registry namespace (e.g., "community-operators").
    pub namespace: String,

    /// Package name (e.g., "etcd").
    pub name: String,

    /// Release (e.g., "0.6.1").
    pub release: String,

    /// Content digest as reported by the registry.
    pub digest: String,
}

impl RegistryCoordinates {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        release: impl Into<String>,
        digest: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            release: release.into(),
            digest: digest.into(),
        }
    }
}

impl fmt::Display for RegistryCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.namespace, self.name, self.release)
    }
}

/// One registry artifact: coordinates plus the raw archive blob.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub coordinates: RegistryCoordinates,

    /// Raw archive bytes (tar, optionally gzip-compressed).
    pub blob: Vec<u8>,
}

impl Artifact {
    pub fn new(coordinates: RegistryCoordinates, blob: impl Into<Vec<u8>>) -> Self {
        Self {
            coordinates,
            blob: blob.into(),
        }
    }
}

/// Kind of an extracted archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// A single extracted archive entry, in archive order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path exactly as recorded in the archive header.
    pub path: String,

    pub kind: EntryKind,

    /// Mode bits from the header.
    pub mode: u32,

    /// File content; always empty for directories.
    pub content: Vec<u8>,
}

impl ArchiveEntry {
    pub fn file(path: impl Into<String>, mode: u32, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::File,
            mode,
            content: content.into(),
        }
    }

    pub fn directory(path: impl Into<String>, mode: u32) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Directory,
            mode,
            content: Vec::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Decoded form of one artifact.
#[derive(Debug, Clone)]
pub enum Bundle {
    /// Written to storage under this directory.
    Nested { written_directory: PathBuf },

    /// Parsed in memory.
    Flattened { manifest: FlattenedManifest },
}

/// Aggregate result of decoding one batch.
///
/// `flattened` holds a single manifest. With the default
/// [`FlattenedPolicy::LastWins`](crate::config::FlattenedPolicy::LastWins) a batch
/// carrying several flattened artifacts keeps only the last one processed;
/// use [`FlattenedPolicy::Merge`](crate::config::FlattenedPolicy::Merge) to
/// collect all of them.
#[derive(Debug, Clone)]
pub struct DecodeResult {
    /// Parsed flattened manifest; `Some` iff `flattened_count > 0`.
    pub flattened: Option<FlattenedManifest>,

    /// Output root configured at construction, regardless of batch content.
    pub nested_directory: PathBuf,

    pub flattened_count: usize,

    pub nested_count: usize,

    /// Directory written for each nested artifact, in batch order.
    pub nested_paths: Vec<PathBuf>,
}

impl DecodeResult {
    pub(crate) fn empty(nested_directory: PathBuf) -> Self {
        Self {
            flattened: None,
            nested_directory,
            flattened_count: 0,
            nested_count: 0,
            nested_paths: Vec::new(),
        }
    }

    /// Total number of decoded artifacts.
    pub fn total(&self) -> usize {
        self.flattened_count + self.nested_count
    }
}
