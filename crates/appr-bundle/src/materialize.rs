//! Writing nested bundles to storage.
//!
//! Each bundle lands in `root/namespace/name/release/`, mirroring the archive's
//! relative paths. All paths are validated before the first write, so a bundle
//! with a single escaping entry leaves nothing behind.

use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{BundleError, BundleResult};
use crate::storage::Storage;
use crate::types::{ArchiveEntry, EntryKind, RegistryCoordinates};

/// Output directory for one artifact: `root/namespace/name/release`.
///
/// Each coordinate must be a single normal path segment, so two distinct
/// coordinates never map to overlapping directories.
pub fn bundle_directory(root: &Path, coordinates: &RegistryCoordinates) -> BundleResult<PathBuf> {
    let mut dir = root.to_path_buf();
    for (field, value) in [
        ("namespace", &coordinates.namespace),
        ("name", &coordinates.name),
        ("release", &coordinates.release),
    ] {
        if !is_single_normal_segment(value) {
            return Err(BundleError::path(
                value.as_str(),
                format!("{} is not a single path segment", field),
            ));
        }
        dir.push(value);
    }
    Ok(dir)
}

fn is_single_normal_segment(segment: &str) -> bool {
    let mut components = Path::new(segment).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(c)), None) if c == segment
    )
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect()
}

/// Normalize an archive entry path relative to the bundle root.
///
/// Strips `strip_prefix` when it is a leading segment prefix. Returns `None`
/// for entries that resolve to the bundle root itself. Parent segments,
/// absolute paths and platform prefixes are rejected.
pub fn normalize_entry_path(
    raw: &str,
    strip_prefix: Option<&str>,
) -> BundleResult<Option<PathBuf>> {
    let mut parts = segments(raw);
    let mut stripped = false;

    if let Some(prefix) = strip_prefix {
        let prefix = segments(prefix);
        if !prefix.is_empty() && parts.starts_with(&prefix) {
            parts.drain(..prefix.len());
            stripped = true;
        }
    }

    if raw.starts_with('/') && !stripped {
        return Err(BundleError::path(raw, "absolute path"));
    }

    let mut relative = PathBuf::new();
    for part in parts {
        if part == ".." {
            return Err(BundleError::path(raw, "escapes destination directory"));
        }
        if !is_single_normal_segment(part) {
            return Err(BundleError::path(raw, "invalid path segment"));
        }
        relative.push(part);
    }

    if relative.as_os_str().is_empty() {
        return Ok(None);
    }
    Ok(Some(relative))
}

/// Writes nested bundle entries through a [`Storage`] port.
pub struct NestedMaterializer<'a> {
    storage: &'a dyn Storage,
    strip_prefix: Option<&'a str>,
}

impl<'a> NestedMaterializer<'a> {
    pub fn new(storage: &'a dyn Storage) -> Self {
        Self {
            storage,
            strip_prefix: None,
        }
    }

    /// Strip this source-relative prefix from every entry path.
    pub fn with_strip_prefix(mut self, prefix: Option<&'a str>) -> Self {
        self.strip_prefix = prefix;
        self
    }

    /// Write `entries` under `destination`, in archive order.
    ///
    /// Directories (and their ancestors) are created before any file goes
    /// into them. Returns the destination directory.
    pub fn write(&self, entries: &[ArchiveEntry], destination: &Path) -> BundleResult<PathBuf> {
        let mut plan = Vec::with_capacity(entries.len());
        for entry in entries {
            match normalize_entry_path(&entry.path, self.strip_prefix)? {
                Some(relative) => plan.push((destination.join(relative), entry)),
                None => debug!(path = %entry.path, "skipping bundle root entry"),
            }
        }

        self.storage
            .create_dir_all(destination)
            .map_err(|e| BundleError::io(destination, e))?;

        let mut written = 0_usize;
        for (target, entry) in &plan {
            if let Err(e) = self.write_entry(target, entry) {
                if written > 0 {
                    warn!(
                        destination = %destination.display(),
                        written,
                        "nested bundle partially written"
                    );
                }
                return Err(e);
            }
            written += 1;
        }

        debug!(
            destination = %destination.display(),
            entries = written,
            "materialized nested bundle"
        );
        Ok(destination.to_path_buf())
    }

    fn write_entry(&self, target: &Path, entry: &ArchiveEntry) -> BundleResult<()> {
        match entry.kind {
            EntryKind::Directory => self
                .storage
                .create_dir_all(target)
                .map_err(|e| BundleError::io(target, e)),
            EntryKind::File => {
                if let Some(parent) = target.parent() {
                    self.storage
                        .create_dir_all(parent)
                        .map_err(|e| BundleError::io(parent, e))?;
                }
                self.storage
                    .write_file(target, &entry.content, entry.mode)
                    .map_err(|e| BundleError::io(target, e))
            }
        }
    }
}
