//! Content fingerprinting for change detection.
//!
//! The fingerprint is a truncated SHA-256 over the file size plus the first
//! and last 64 KiB of content. It is cheap (two seeks), robust against
//! partial copies, and intentionally ignores mtime so restores and
//! content-preserving re-copies do not trigger re-indexing.

use crate::error::{GazeError, Result};
use sha2::{Digest, Sha256};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Bytes hashed from each end of the file.
const EDGE_SIZE: usize = 64 * 1024;

/// Hex characters kept from the digest.
const FINGERPRINT_LEN: usize = 16;

/// Compute the content fingerprint for a file.
///
/// Empty files hash a fixed sentinel so they still get a stable identity.
pub fn compute_fingerprint(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let mut file = std::fs::File::open(path).map_err(|e| GazeError::io_with_path(e, path))?;
    let file_size = file
        .metadata()
        .map_err(|e| GazeError::io_with_path(e, path))?
        .len();

    if file_size == 0 {
        let digest = Sha256::digest(b"empty");
        return Ok(hex::encode(digest)[..FINGERPRINT_LEN].to_string());
    }

    let head_len = std::cmp::min(file_size as usize, EDGE_SIZE);
    let mut head = vec![0u8; head_len];
    file.read_exact(&mut head)
        .map_err(|e| GazeError::io_with_path(e, path))?;

    let tail = if file_size > EDGE_SIZE as u64 {
        file.seek(SeekFrom::End(-(EDGE_SIZE as i64)))
            .map_err(|e| GazeError::io_with_path(e, path))?;
        let mut buf = vec![0u8; EDGE_SIZE];
        file.read_exact(&mut buf)
            .map_err(|e| GazeError::io_with_path(e, path))?;
        buf
    } else {
        Vec::new()
    };

    let mut hasher = Sha256::new();
    hasher.update(file_size.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(&head);
    hasher.update(b":");
    hasher.update(&tail);

    Ok(hex::encode(hasher.finalize())[..FINGERPRINT_LEN].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_file_sentinel() {
        let a = NamedTempFile::new().unwrap();
        let b = NamedTempFile::new().unwrap();

        let fp_a = compute_fingerprint(a.path()).unwrap();
        let fp_b = compute_fingerprint(b.path()).unwrap();

        assert_eq!(fp_a.len(), FINGERPRINT_LEN);
        assert_eq!(fp_a, fp_b);
    }

    #[test]
    fn test_deterministic() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"some media bytes").unwrap();
        file.flush().unwrap();

        let fp1 = compute_fingerprint(file.path()).unwrap();
        let fp2 = compute_fingerprint(file.path()).unwrap();
        assert_eq!(fp1, fp2);
        assert_eq!(fp1.len(), FINGERPRINT_LEN);
    }

    #[test]
    fn test_content_sensitivity() {
        let mut a = NamedTempFile::new().unwrap();
        a.write_all(b"first contents").unwrap();
        a.flush().unwrap();

        let mut b = NamedTempFile::new().unwrap();
        b.write_all(b"other contents").unwrap();
        b.flush().unwrap();

        assert_ne!(
            compute_fingerprint(a.path()).unwrap(),
            compute_fingerprint(b.path()).unwrap()
        );
    }

    #[test]
    fn test_large_file_edges() {
        // Files differing only in the middle still collide; the fingerprint
        // reads the edges only.
        let mut data = vec![0u8; EDGE_SIZE * 3];
        let mut a = NamedTempFile::new().unwrap();
        a.write_all(&data).unwrap();
        a.flush().unwrap();

        data[EDGE_SIZE + 100] = 7;
        let mut b = NamedTempFile::new().unwrap();
        b.write_all(&data).unwrap();
        b.flush().unwrap();

        assert_eq!(
            compute_fingerprint(a.path()).unwrap(),
            compute_fingerprint(b.path()).unwrap()
        );

        // But an edge change is detected.
        data[0] = 9;
        let mut c = NamedTempFile::new().unwrap();
        c.write_all(&data).unwrap();
        c.flush().unwrap();

        assert_ne!(
            compute_fingerprint(a.path()).unwrap(),
            compute_fingerprint(c.path()).unwrap()
        );
    }
}
