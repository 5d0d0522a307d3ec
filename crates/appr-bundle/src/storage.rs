//! Storage port for materialized bundles.
//!
//! The materializer only needs to create directories and write files.
//! [`LocalStorage`] writes to the filesystem; [`MemoryStorage`] keeps the tree
//! in memory so tests can assert exact paths and bytes.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Permission bits kept when writing files. Set-id and sticky bits are dropped.
pub const PERMISSION_BITS: u32 = 0o777;

/// Filesystem operations used by the materializer.
pub trait Storage: Send + Sync {
    /// Create a directory and all missing ancestors.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Write a file, replacing any existing one. The parent must exist.
    fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> io::Result<()>;
}

/// Local filesystem storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStorage;

impl Storage for LocalStorage {
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
        let temp_path = temp_path_for(path)?;

        std::fs::write(&temp_path, contents)?;
        if let Err(e) = set_mode(&temp_path, mode).and_then(|_| std::fs::rename(&temp_path, path))
        {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }

        Ok(())
    }
}

fn temp_path_for(path: &Path) -> io::Result<PathBuf> {
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("not a file path: {}", path.display()),
        )
    })?;
    let mut temp_name = std::ffi::OsString::from(".");
    temp_name.push(file_name);
    temp_name.push(".tmp");
    Ok(path.with_file_name(temp_name))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode & PERMISSION_BITS))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// A node in the in-memory tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryNode {
    Directory,
    File { contents: Vec<u8>, mode: u32 },
}

/// In-memory storage for tests.
///
/// Enforces the same ordering rules as a real filesystem: a file can only be
/// written once its parent directory exists, and a path is either a file or a
/// directory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    nodes: Mutex<BTreeMap<PathBuf, MemoryNode>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<PathBuf, MemoryNode>> {
        self.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Contents of the file at `path`, if any.
    pub fn file(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        match self.lock().get(path.as_ref()) {
            Some(MemoryNode::File { contents, .. }) => Some(contents.clone()),
            _ => None,
        }
    }

    /// Mode of the file at `path`, if any.
    pub fn mode(&self, path: impl AsRef<Path>) -> Option<u32> {
        match self.lock().get(path.as_ref()) {
            Some(MemoryNode::File { mode, .. }) => Some(*mode),
            _ => None,
        }
    }

    pub fn is_dir(&self, path: impl AsRef<Path>) -> bool {
        matches!(self.lock().get(path.as_ref()), Some(MemoryNode::Directory))
    }

    /// All file paths, sorted.
    pub fn files(&self) -> Vec<PathBuf> {
        self.lock()
            .iter()
            .filter(|(_, node)| matches!(node, MemoryNode::File { .. }))
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// All paths under `root` (files and directories), sorted.
    pub fn paths_under(&self, root: impl AsRef<Path>) -> Vec<PathBuf> {
        let root = root.as_ref();
        self.lock()
            .keys()
            .filter(|p| p.starts_with(root))
            .cloned()
            .collect()
    }
}

impl Storage for MemoryStorage {
    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.lock();
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            match nodes.get(ancestor) {
                Some(MemoryNode::File { .. }) => {
                    return Err(io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        format!("not a directory: {}", ancestor.display()),
                    ))
                }
                Some(MemoryNode::Directory) => {}
                None => {
                    nodes.insert(ancestor.to_path_buf(), MemoryNode::Directory);
                }
            }
        }
        Ok(())
    }

    fn write_file(&self, path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
        let mut nodes = self.lock();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !matches!(nodes.get(parent), Some(MemoryNode::Directory)) {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("parent directory missing: {}", parent.display()),
                ));
            }
        }
        if matches!(nodes.get(path), Some(MemoryNode::Directory)) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("is a directory: {}", path.display()),
            ));
        }
        nodes.insert(
            path.to_path_buf(),
            MemoryNode::File {
                contents: contents.to_vec(),
                mode: mode & PERMISSION_BITS,
            },
        );
        Ok(())
    }
}
