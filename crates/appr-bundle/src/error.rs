//! Error types for bundle decoding.

use std::fmt;
use std::path::PathBuf;

use crate::types::RegistryCoordinates;

/// Pipeline stage an artifact was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Blob digest check (only when enabled).
    Verify,
    /// Archive extraction.
    Extract,
    /// Nested/flattened classification.
    Classify,
    /// Writing a nested bundle to storage.
    Materialize,
    /// Parsing a flattened manifest.
    Parse,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Verify => "verify",
            Self::Extract => "extract",
            Self::Classify => "classify",
            Self::Materialize => "materialize",
            Self::Parse => "parse",
        };
        f.write_str(s)
    }
}

/// Flat error classification, independent of the context wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Archive,
    Limit,
    Classification,
    Path,
    Io,
    Parse,
    Config,
    DigestMismatch,
    Cancelled,
}

/// Bundle decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    /// Corrupt or truncated archive stream.
    #[error("archive error: {message}")]
    Archive {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Archive exceeded a configured resource limit.
    #[error("limit exceeded: {message}")]
    Limit { message: String },

    /// No entries to classify.
    #[error("classification error: {message}")]
    Classification { message: String },

    /// Entry path would escape the destination root.
    #[error("invalid entry path '{path}': {reason}")]
    Path { path: String, reason: String },

    /// Filesystem failure while writing.
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed flattened manifest content.
    #[error("parse error: {message}")]
    Parse {
        message: String,
        #[source]
        source: Option<serde_yaml::Error>,
    },

    /// Invalid or unwritable output root.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Blob digest does not match the registry coordinates.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// Caller cancelled the batch.
    #[error("decode cancelled after {processed} of {total} artifacts")]
    Cancelled { processed: usize, total: usize },

    /// Per-artifact failure with coordinates and stage attached.
    #[error("{stage} failed for {coordinates}: {source}")]
    Artifact {
        coordinates: RegistryCoordinates,
        stage: Stage,
        #[source]
        source: Box<BundleError>,
    },
}

impl BundleError {
    pub(crate) fn archive(message: impl Into<String>) -> Self {
        Self::Archive {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn archive_io(context: impl Into<String>, err: std::io::Error) -> Self {
        Self::Archive {
            message: format!("{}: {}", context.into(), err),
            source: Some(err),
        }
    }

    pub(crate) fn path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Path {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
            source: None,
        }
    }

    /// Attach artifact coordinates and stage. Already-wrapped errors are kept as is.
    pub(crate) fn in_artifact(self, coordinates: &RegistryCoordinates, stage: Stage) -> Self {
        match self {
            Self::Artifact { .. } => self,
            other => Self::Artifact {
                coordinates: coordinates.clone(),
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Error kind, looking through the artifact context wrapper.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Archive { .. } => ErrorKind::Archive,
            Self::Limit { .. } => ErrorKind::Limit,
            Self::Classification { .. } => ErrorKind::Classification,
            Self::Path { .. } => ErrorKind::Path,
            Self::Io { .. } => ErrorKind::Io,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Config { .. } => ErrorKind::Config,
            Self::DigestMismatch { .. } => ErrorKind::DigestMismatch,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Artifact { source, .. } => source.kind(),
        }
    }

    /// Coordinates of the failing artifact, if the error is artifact-scoped.
    pub fn coordinates(&self) -> Option<&RegistryCoordinates> {
        match self {
            Self::Artifact { coordinates, .. } => Some(coordinates),
            _ => None,
        }
    }

    /// Stage of the failing artifact, if the error is artifact-scoped.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Artifact { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Whether a caller retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Io)
    }
}

/// Result type for bundle operations.
pub type BundleResult<T> = Result<T, BundleError>;
