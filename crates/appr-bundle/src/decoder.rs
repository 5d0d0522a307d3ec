//! Batch decoding of registry artifacts.
//!
//! Per artifact the pipeline is extract → classify → materialize (nested) or
//! parse (flattened). The first failure aborts the batch; no partial
//! [`DecodeResult`] is returned.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, info_span, warn, Span};

use crate::archive::{ArchiveReader, TarArchiveReader};
use crate::classify::{classify, BundleFormat};
use crate::config::{DecoderConfig, FlattenedPolicy};
use crate::digest::verify_digest;
use crate::error::{BundleError, BundleResult, Stage};
use crate::flattened::parse_flattened;
use crate::materialize::{bundle_directory, NestedMaterializer};
use crate::storage::{LocalStorage, Storage};
use crate::types::{Artifact, Bundle, DecodeResult, EntryKind};

/// Cooperative cancellation, checked between artifacts.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Builder for [`ManifestDecoder`].
pub struct DecoderBuilder {
    output_dir: PathBuf,
    span: Span,
    config: DecoderConfig,
    archive_reader: Option<Box<dyn ArchiveReader>>,
    storage: Option<Arc<dyn Storage>>,
}

impl DecoderBuilder {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            span: Span::none(),
            config: DecoderConfig::default(),
            archive_reader: None,
            storage: None,
        }
    }

    /// Diagnostic sink. Batch and artifact logs are emitted under this span.
    pub fn span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(mut self, config: DecoderConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the tar reader (defaults to [`TarArchiveReader`] with the configured limits).
    pub fn archive_reader(mut self, reader: impl ArchiveReader + 'static) -> Self {
        self.archive_reader = Some(Box::new(reader));
        self
    }

    /// Replace the storage port (defaults to [`LocalStorage`]).
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Build the decoder, creating the output directory if needed.
    pub fn build(self) -> BundleResult<ManifestDecoder> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(BundleError::Config {
                message: "output directory is empty".to_string(),
            });
        }

        let storage = self.storage.unwrap_or_else(|| Arc::new(LocalStorage));
        storage
            .create_dir_all(&self.output_dir)
            .map_err(|e| BundleError::Config {
                message: format!(
                    "cannot create output directory {}: {}",
                    self.output_dir.display(),
                    e
                ),
            })?;

        let limits = self.config.limits;
        let reader = self
            .archive_reader
            .unwrap_or_else(|| Box::new(TarArchiveReader::new(limits)));

        Ok(ManifestDecoder {
            span: self.span,
            output_dir: self.output_dir,
            config: self.config,
            reader,
            storage,
        })
    }
}

/// Decodes batches of registry artifacts.
///
/// Nested bundles are written to `output_dir/namespace/name/release`;
/// flattened bundles are parsed into [`DecodeResult::flattened`]. Only one
/// flattened manifest is kept per batch: with the default
/// [`FlattenedPolicy::LastWins`] the last flattened artifact in batch order
/// wins. Calls are independent; the decoder holds no per-batch state.
pub struct ManifestDecoder {
    span: Span,
    output_dir: PathBuf,
    config: DecoderConfig,
    reader: Box<dyn ArchiveReader>,
    storage: Arc<dyn Storage>,
}

impl ManifestDecoder {
    /// Decoder with default configuration writing to the local filesystem.
    ///
    /// Fails with `Config` if `output_dir` cannot be created.
    pub fn new(log: Span, output_dir: impl Into<PathBuf>) -> BundleResult<Self> {
        DecoderBuilder::new(output_dir).span(log).build()
    }

    pub fn builder(output_dir: impl Into<PathBuf>) -> DecoderBuilder {
        DecoderBuilder::new(output_dir)
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decode a batch. Fails fast on the first artifact error.
    pub fn decode(&self, batch: &[Artifact]) -> BundleResult<DecodeResult> {
        self.decode_with_cancel(batch, &CancelFlag::new())
    }

    /// Decode a batch, checking `cancel` before each artifact.
    ///
    /// Cancellation never interrupts an artifact mid-write.
    pub fn decode_with_cancel(
        &self,
        batch: &[Artifact],
        cancel: &CancelFlag,
    ) -> BundleResult<DecodeResult> {
        let span = info_span!(parent: &self.span, "decode", batch_size = batch.len());
        let _guard = span.enter();

        let mut result = DecodeResult::empty(self.output_dir.clone());

        for (processed, artifact) in batch.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(processed, total = batch.len(), "decode cancelled");
                return Err(BundleError::Cancelled {
                    processed,
                    total: batch.len(),
                });
            }

            match self.decode_artifact(artifact)? {
                Bundle::Nested { written_directory } => {
                    result.nested_count += 1;
                    result.nested_paths.push(written_directory);
                }
                Bundle::Flattened { manifest } => {
                    result.flattened_count += 1;
                    result.flattened =
                        match (result.flattened.take(), self.config.flattened_policy) {
                            (Some(mut existing), FlattenedPolicy::Merge) => {
                                existing.merge(manifest);
                                Some(existing)
                            }
                            _ => Some(manifest),
                        };
                }
            }
        }

        info!(
            nested_count = result.nested_count,
            flattened_count = result.flattened_count,
            "decoded batch"
        );
        Ok(result)
    }

    /// Decode one artifact. Errors carry the artifact's coordinates and stage.
    pub fn decode_artifact(&self, artifact: &Artifact) -> BundleResult<Bundle> {
        let coordinates = &artifact.coordinates;
        debug!(
            namespace = %coordinates.namespace,
            name = %coordinates.name,
            release = %coordinates.release,
            bytes = artifact.blob.len(),
            "decoding artifact"
        );

        if self.config.verify_digest {
            verify_digest(&coordinates.digest, &artifact.blob)
                .map_err(|e| e.in_artifact(coordinates, Stage::Verify))?;
        }

        let entries = self
            .reader
            .extract(&artifact.blob)
            .map_err(|e| e.in_artifact(coordinates, Stage::Extract))?;

        let format =
            classify(&entries).map_err(|e| e.in_artifact(coordinates, Stage::Classify))?;
        debug!(
            name = %coordinates.name,
            ?format,
            entries = entries.len(),
            "classified artifact"
        );

        match format {
            BundleFormat::Nested => {
                let destination = bundle_directory(&self.output_dir, coordinates)
                    .map_err(|e| e.in_artifact(coordinates, Stage::Materialize))?;
                let written_directory = NestedMaterializer::new(self.storage.as_ref())
                    .with_strip_prefix(self.config.strip_prefix.as_deref())
                    .write(&entries, &destination)
                    .map_err(|e| e.in_artifact(coordinates, Stage::Materialize))?;
                Ok(Bundle::Nested { written_directory })
            }
            BundleFormat::Flattened => {
                let file = entries
                    .iter()
                    .find(|e| e.kind == EntryKind::File)
                    .ok_or_else(|| {
                        BundleError::Classification {
                            message: "flattened bundle has no file".to_string(),
                        }
                        .in_artifact(coordinates, Stage::Classify)
                    })?;
                let manifest = parse_flattened(&file.content)
                    .map_err(|e| e.in_artifact(coordinates, Stage::Parse))?;
                Ok(Bundle::Flattened { manifest })
            }
        }
    }
}
