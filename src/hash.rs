//! Content hashing for index/methylome compatibility checks.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::Result;

/// SHA-256 of `bytes` as lowercase hex
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 of a file's contents as lowercase hex
pub fn sha256_hex_file<P: AsRef<Path>>(path: P) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(sha256_hex(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest() {
        // sha256 of the empty string
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn file_digest_matches_bytes_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, b"cpg").unwrap();
        assert_eq!(sha256_hex_file(&path).unwrap(), sha256_hex(b"cpg"));
    }
}
