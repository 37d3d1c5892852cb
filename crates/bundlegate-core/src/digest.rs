//! SHA-256 helpers for content-addressed file names and audit digests.

use std::fs::File;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

/// Hex length used for vendored resource names.
pub const VENDOR_HASH_LEN: usize = 12;

/// Hex length used for extracted inline scripts and styles.
pub const INLINE_HASH_LEN: usize = 16;

/// Full lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// First `len` hex characters of the SHA-256 of `data`.
pub fn short_hash(data: &[u8], len: usize) -> String {
    let mut full = sha256_hex(data);
    full.truncate(len);
    full
}

/// Stream a file through SHA-256.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(short_hash(b"abc", VENDOR_HASH_LEN), "ba7816bf8f01");
        assert_eq!(short_hash(b"abc", INLINE_HASH_LEN).len(), 16);
    }

    #[test]
    fn file_digest_matches_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.bin");
        std::fs::write(&path, b"abc").expect("write");
        assert_eq!(sha256_file(&path).expect("hash"), sha256_hex(b"abc"));
    }
}
