//! Checksum calculation for migration files, used by the Validator's
//! file-integrity check.

use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

use crate::error::CoreError;

/// SHA-256 hex digest of a migration file's raw bytes.
pub fn calculate_checksum(path: &Path) -> Result<String, CoreError> {
    let content = fs::read(path)
        .map_err(|e| CoreError::Other(format!("failed to read {}: {e}", path.display())))?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn same_content_same_checksum() {
        let mut a = tempfile::NamedTempFile::new().unwrap();
        a.write_all(b"create table t (id int);").unwrap();
        let mut b = tempfile::NamedTempFile::new().unwrap();
        b.write_all(b"create table t (id int);").unwrap();

        assert_eq!(calculate_checksum(a.path()).unwrap(), calculate_checksum(b.path()).unwrap());
    }

    #[test]
    fn different_content_different_checksum() {
        let mut a = tempfile::NamedTempFile::new().unwrap();
        a.write_all(b"create table t (id int);").unwrap();
        let mut b = tempfile::NamedTempFile::new().unwrap();
        b.write_all(b"create table t (id bigint);").unwrap();

        assert_ne!(calculate_checksum(a.path()).unwrap(), calculate_checksum(b.path()).unwrap());
    }

    #[test]
    fn missing_file_errors() {
        assert!(calculate_checksum(Path::new("/no/such/migration.sql")).is_err());
    }
}
