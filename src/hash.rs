//! Content addressing
//!
//! SHA-256 hex digests decide whether a write is needed and whether a
//! managed file was edited since the last sync.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Hex-encoded SHA-256 digest of `data`.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hex-encoded SHA-256 digest of a file's contents.
pub fn hash_file(path: &Path) -> Result<String> {
    let data = fs::read(path).with_context(|| format!("Failed to hash {}", path.display()))?;
    Ok(hash_bytes(&data))
}
