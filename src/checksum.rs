//! Content fingerprinting
//!
//! Files are fingerprinted with a streaming SHA-256 over their full
//! content, encoded as standard base64. The builder compares these
//! fingerprints against the previous run's manifest to decide whether a
//! file must be re-included in the container.

use crate::error::{PathError, PathErrorKind, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::trace;

/// Compute the base64 SHA-256 checksum of a file's content.
///
/// The file is read in 8 KB chunks so large files never need to fit in
/// memory.
pub fn file_checksum(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .map_err(|e| PathError::new(path, PathErrorKind::OpeningFile).with_source(e))?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];
    let mut total = 0u64;

    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|e| PathError::new(path, PathErrorKind::Digest).with_source(e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        total += read as u64;
    }

    let encoded = BASE64.encode(hasher.finalize());
    trace!(path = %path.display(), bytes = total, checksum = %encoded, "checksum calculated");
    Ok(encoded)
}

/// Compute the base64 SHA-256 checksum of in-memory bytes.
pub fn data_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    BASE64.encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_known_vectors() {
        // SHA-256("") and SHA-256("abc"), base64-encoded.
        assert_eq!(
            data_checksum(b""),
            "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
        assert_eq!(
            data_checksum(b"abc"),
            "ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0="
        );
    }

    #[test]
    fn test_file_checksum_matches_data_checksum() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob.bin");
        let content = vec![0xa5u8; 32 * 1024 + 7]; // spans several read chunks
        fs::write(&path, &content).unwrap();

        assert_eq!(file_checksum(&path).unwrap(), data_checksum(&content));
    }

    #[test]
    fn test_missing_file_is_a_path_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent");
        let err = file_checksum(&path).unwrap_err();
        match err {
            Error::Path(path_err) => {
                assert_eq!(path_err.kind, PathErrorKind::OpeningFile);
                assert_eq!(path_err.path, path);
            }
            other => panic!("expected path error, got {other}"),
        }
    }
}
