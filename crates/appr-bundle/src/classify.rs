//! Nested vs flattened classification.
//!
//! Both layouts use `.yaml` files, so the decision looks at the shape of the
//! entry list and the content of the candidate file, never at extensions.
//! Anything ambiguous is `Nested`: it keeps the full tree, so no structure is lost.

use crate::error::{BundleError, BundleResult};
use crate::flattened::is_manifest_content;
use crate::types::{ArchiveEntry, EntryKind};

/// Packaging layout of one bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleFormat {
    /// Directory tree with several manifest files.
    Nested,
    /// Single combined manifest file.
    Flattened,
}

/// Classify a bundle from its extracted entries.
///
/// `Flattened` iff there is exactly one regular file, no directory entry, and
/// the file's content is manifest YAML. Any directory header (a package folder,
/// a per-version folder) means the archive carries a tree. Pure function of
/// the entries.
pub fn classify(entries: &[ArchiveEntry]) -> BundleResult<BundleFormat> {
    if entries.is_empty() {
        return Err(BundleError::Classification {
            message: "archive has no entries".to_string(),
        });
    }

    if entries.iter().any(ArchiveEntry::is_dir) {
        return Ok(BundleFormat::Nested);
    }

    let mut files = entries.iter().filter(|e| e.kind == EntryKind::File);
    let (Some(file), None) = (files.next(), files.next()) else {
        return Ok(BundleFormat::Nested);
    };

    if is_manifest_content(&file.content) {
        Ok(BundleFormat::Flattened)
    } else {
        Ok(BundleFormat::Nested)
    }
}
