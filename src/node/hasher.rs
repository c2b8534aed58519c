//! SHA256 hash verification
//!
//! Verifies the native node library against a pinned hash before it is loaded.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Result of hash verification
#[derive(Debug, Clone)]
pub struct HashResult {
    /// The computed hash (lowercase hex)
    pub computed: String,
    /// The expected hash (lowercase hex)
    pub expected: String,
    /// Whether they match
    pub matches: bool,
}

/// Compute SHA256 hash of a file
pub fn compute_file_hash(path: &Path) -> std::io::Result<String> {
    let file = File::open(path)?;

    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Verify a file's SHA256 hash against expected value
pub fn verify_file_hash(path: &Path, expected_hash: &str) -> std::io::Result<HashResult> {
    let computed = compute_file_hash(path)?;
    let expected = expected_hash.trim().to_lowercase();
    let matches = computed == expected;

    log::info!(
        "Hash verification for {}: computed={}, expected={}, matches={}",
        path.display(),
        &computed[..16],
        &expected[..16.min(expected.len())],
        matches
    );

    Ok(HashResult {
        computed,
        expected,
        matches,
    })
}

/// Check a pinned hash, failing on mismatch
pub fn ensure_file_hash(path: &Path, expected_hash: &str) -> anyhow::Result<()> {
    let result = verify_file_hash(path, expected_hash)
        .map_err(|e| anyhow::anyhow!("Failed to hash {}: {}", path.display(), e))?;

    if !result.matches {
        anyhow::bail!(
            "SHA256 mismatch for {}: expected {}, got {}",
            path.display(),
            result.expected,
            result.computed
        );
    }
    Ok(())
}
