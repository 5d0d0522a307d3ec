use sha2::{Digest, Sha256};

use crate::error::{BundleError, BundleResult};

/// SHA-256 of the blob as `sha256:<hex>`.
pub fn compute_digest(blob: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(blob)))
}

/// Check a blob against a registry digest (`sha256:<hex>` or bare hex).
///
/// A digest in any other form cannot be checked and is reported as a mismatch.
pub fn verify_digest(expected: &str, blob: &[u8]) -> BundleResult<()> {
    let actual = compute_digest(blob);
    let expected_hex = expected
        .strip_prefix("sha256:")
        .unwrap_or(expected)
        .to_ascii_lowercase();

    let well_formed =
        expected_hex.len() == 64 && expected_hex.bytes().all(|b| b.is_ascii_hexdigit());
    if !well_formed || actual["sha256:".len()..] != expected_hex {
        return Err(BundleError::DigestMismatch {
            expected: expected.to_string(),
            actual,
        });
    }

    Ok(())
}
