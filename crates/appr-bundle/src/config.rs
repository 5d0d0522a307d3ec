//! Decoder configuration and resource limits.

use serde::{Deserialize, Serialize};

/// What to keep in `DecodeResult::flattened` when a batch holds more than one
/// flattened artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlattenedPolicy {
    /// The most recently processed flattened artifact occupies the slot.
    #[default]
    LastWins,
    /// Resources of every flattened artifact are concatenated in batch order.
    Merge,
}

/// Resource limits applied while reading untrusted archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeLimits {
    /// Maximum decoded (decompressed) archive size.
    pub max_archive_bytes: u64,
    /// Maximum number of entries per archive.
    pub max_entries: usize,
    /// Maximum declared size of a single entry.
    pub max_entry_bytes: u64,
    /// Maximum entry path length in bytes.
    pub max_path_len: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_archive_bytes: 64_u64 * 1024 * 1024,
            max_entries: 10_000,
            max_entry_bytes: 16_u64 * 1024 * 1024,
            max_path_len: 1024,
        }
    }
}

/// Partial overrides for `DecodeLimits`, e.g. from a config file.
/// Unknown keys cause deserialization to fail (deny_unknown_fields).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecodeLimitsOverrides {
    pub max_archive_bytes: Option<u64>,
    pub max_entries: Option<usize>,
    pub max_entry_bytes: Option<u64>,
    pub max_path_len: Option<usize>,
}

impl DecodeLimits {
    /// Apply overrides onto these limits. Only `Some` values override.
    pub fn apply(self, overrides: DecodeLimitsOverrides) -> Self {
        Self {
            max_archive_bytes: overrides.max_archive_bytes.unwrap_or(self.max_archive_bytes),
            max_entries: overrides.max_entries.unwrap_or(self.max_entries),
            max_entry_bytes: overrides.max_entry_bytes.unwrap_or(self.max_entry_bytes),
            max_path_len: overrides.max_path_len.unwrap_or(self.max_path_len),
        }
    }
}

/// Decoder configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Source-relative prefix stripped from entry paths before writing
    /// (e.g. `manifests/` when archives were built from a checkout).
    pub strip_prefix: Option<String>,

    /// Policy for the single flattened result slot.
    pub flattened_policy: FlattenedPolicy,

    /// Check each blob's SHA-256 against its registry digest.
    pub verify_digest: bool,

    pub limits: DecodeLimits,
}

impl DecoderConfig {
    /// Set the source prefix to strip.
    pub fn with_strip_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.strip_prefix = Some(prefix.into());
        self
    }

    /// Set the flattened slot policy.
    pub fn with_flattened_policy(mut self, policy: FlattenedPolicy) -> Self {
        self.flattened_policy = policy;
        self
    }

    /// Enable or disable digest verification.
    pub fn with_verify_digest(mut self, verify: bool) -> Self {
        self.verify_digest = verify;
        self
    }

    /// Replace the resource limits.
    pub fn with_limits(mut self, limits: DecodeLimits) -> Self {
        self.limits = limits;
        self
    }
}
