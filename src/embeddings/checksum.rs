//! Model file integrity check

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::Path;

/// Compute lowercase hex SHA-256 of a file
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Failed to hash {}", path.display()))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Fail unless the file hashes to `expected` (case-insensitive hex)
pub fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
    let hash = sha256_file(path)?;
    if hash != expected.trim().to_lowercase() {
        bail!(
            "Checksum mismatch for {}\n  Expected: {}\n  Got: {}",
            path.display(),
            expected,
            hash
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_sha256_empty_file() {
        let file = NamedTempFile::new().unwrap();
        let hash = sha256_file(file.path()).unwrap();
        assert_eq!(
            hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_verify_known_content() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"test").unwrap();

        verify_sha256(
            file.path(),
            "9F86D081884C7D659A2FEAA0C55AD015A3BF4F1B2B0B822CD15D6C15B0F00A08",
        )
        .unwrap();

        let err = verify_sha256(file.path(), "deadbeef").unwrap_err();
        assert!(err.to_string().contains("Checksum mismatch"));
    }
}
