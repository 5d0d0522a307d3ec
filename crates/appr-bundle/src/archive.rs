//! Archive extraction.
//!
//! Registry blobs are tarballs, usually gzip-compressed. [`TarArchiveReader`]
//! detects compression from the magic bytes and yields regular files and
//! directories in archive order. Other entry types (symlinks, hard links,
//! devices) are skipped and never reach the materializer.

use std::cell::Cell;
use std::io::Read;
use std::rc::Rc;

use flate2::read::GzDecoder;
use tar::EntryType;
use tracing::{debug, warn};

use crate::config::DecodeLimits;
use crate::error::{BundleError, BundleResult};
use crate::types::{ArchiveEntry, EntryKind};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Upper bound for buffer pre-allocation; header sizes are untrusted.
const MAX_PREALLOC: u64 = 64 * 1024;

/// Parses a raw archive blob into ordered entries.
///
/// The decoder talks to archives only through this trait, so tests can hand it
/// prepared entries without encoding a real archive.
pub trait ArchiveReader: Send + Sync {
    /// Extract all entries, preserving archive order.
    fn extract(&self, blob: &[u8]) -> BundleResult<Vec<ArchiveEntry>>;
}

/// Whether the blob starts with the gzip magic bytes.
pub fn is_gzip(blob: &[u8]) -> bool {
    blob.starts_with(&GZIP_MAGIC)
}

/// Tar (optionally gzip) reader with resource limits.
#[derive(Debug, Clone, Default)]
pub struct TarArchiveReader {
    limits: DecodeLimits,
}

impl TarArchiveReader {
    pub fn new(limits: DecodeLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &DecodeLimits {
        &self.limits
    }

    fn read_tar<R: Read>(&self, reader: R) -> BundleResult<Vec<ArchiveEntry>> {
        let exceeded = Rc::new(Cell::new(false));
        let reader = LimitReader::new(reader, self.limits.max_archive_bytes, exceeded.clone());
        let mut archive = tar::Archive::new(reader);

        let stream_error = |context: String, err: std::io::Error| {
            if exceeded.get() {
                BundleError::Limit {
                    message: format!(
                        "decoded archive exceeds {} bytes",
                        self.limits.max_archive_bytes
                    ),
                }
            } else {
                BundleError::archive_io(context, err)
            }
        };

        let entries = archive
            .entries()
            .map_err(|e| stream_error("tar stream".to_string(), e))?;

        let mut out = Vec::new();
        for (i, entry) in entries.enumerate() {
            let mut entry = entry.map_err(|e| stream_error(format!("entry #{}", i), e))?;

            let path = entry
                .path()
                .map_err(|e| stream_error(format!("entry #{} path", i), e))?
                .to_string_lossy()
                .into_owned();

            if path.len() > self.limits.max_path_len {
                return Err(BundleError::Limit {
                    message: format!(
                        "path length {} exceeds limit {}",
                        path.len(),
                        self.limits.max_path_len
                    ),
                });
            }

            let kind = match entry.header().entry_type() {
                EntryType::Regular | EntryType::Continuous => EntryKind::File,
                EntryType::Directory => EntryKind::Directory,
                EntryType::XGlobalHeader => {
                    debug!(path = %path, "skipping pax global header");
                    continue;
                }
                other => {
                    warn!(
                        path = %path,
                        entry_type = ?other,
                        "skipping unsupported archive entry"
                    );
                    continue;
                }
            };

            if out.len() >= self.limits.max_entries {
                return Err(BundleError::Limit {
                    message: format!("archive has more than {} entries", self.limits.max_entries),
                });
            }

            let mode = entry
                .header()
                .mode()
                .map_err(|e| stream_error(format!("entry '{}' mode", path), e))?;

            if kind == EntryKind::Directory {
                out.push(ArchiveEntry::directory(path, mode));
                continue;
            }

            let size = entry.size();
            if size > self.limits.max_entry_bytes {
                return Err(BundleError::Limit {
                    message: format!(
                        "entry '{}' declared size {} exceeds limit {}",
                        path, size, self.limits.max_entry_bytes
                    ),
                });
            }

            let mut content = Vec::with_capacity(size.min(MAX_PREALLOC) as usize);
            entry
                .read_to_end(&mut content)
                .map_err(|e| stream_error(format!("entry '{}' content", path), e))?;

            if content.len() as u64 != size {
                return Err(BundleError::archive(format!(
                    "truncated entry '{}': read {} of {} bytes",
                    path,
                    content.len(),
                    size
                )));
            }

            out.push(ArchiveEntry::file(path, mode, content));
        }

        Ok(out)
    }
}

impl ArchiveReader for TarArchiveReader {
    fn extract(&self, blob: &[u8]) -> BundleResult<Vec<ArchiveEntry>> {
        if is_gzip(blob) {
            self.read_tar(GzDecoder::new(blob))
        } else {
            self.read_tar(blob)
        }
    }
}

/// A reader that limits the total number of bytes read and fails explicitly on overflow.
struct LimitReader<R> {
    inner: R,
    limit: u64,
    read: u64,
    exceeded: Rc<Cell<bool>>,
}

impl<R: Read> LimitReader<R> {
    fn new(inner: R, limit: u64, exceeded: Rc<Cell<bool>>) -> Self {
        Self {
            inner,
            limit,
            read: 0,
            exceeded,
        }
    }
}

impl<R: Read> Read for LimitReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.read >= self.limit {
            // Only fail if the stream actually has more data.
            let mut probe = [0_u8; 1];
            if self.inner.read(&mut probe)? == 0 {
                return Ok(0);
            }
            self.exceeded.set(true);
            return Err(std::io::Error::other(format!(
                "exceeded limit of {} bytes",
                self.limit
            )));
        }

        let max_to_read = (self.limit - self.read).min(buf.len() as u64) as usize;
        let n = self.inner.read(&mut buf[..max_to_read])?;
        self.read += n as u64;

        Ok(n)
    }
}
