//! BLAKE3 content hashing.
//!
//! Hashes are only used to detect modification between snapshots, never to
//! deduplicate files during organization.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

const CHUNK: usize = 64 * 1024;

/// Hex digest of a file's full content.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; CHUNK];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Streams `reader` into `writer`, returning the hex digest and byte count.
pub fn copy_hashed<R: Read, W: Write>(reader: &mut R, writer: &mut W) -> io::Result<(String, u64)> {
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; CHUNK];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
    writer.flush()?;
    Ok((hasher.finalize().to_hex().to_string(), total))
}

pub fn hash_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_hash_file_matches_hash_bytes() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("data.txt");
        fs::write(&path, b"hello snapshot").expect("Failed to write file");

        let digest = hash_file(&path).unwrap();
        assert_eq!(digest, hash_bytes(b"hello snapshot"));
        assert_eq!(digest.len(), 64);
    }

    #[test]
    fn test_copy_hashed_copies_and_hashes() {
        let data = vec![7u8; CHUNK * 2 + 13];
        let mut out = Vec::new();
        let (digest, len) = copy_hashed(&mut data.as_slice(), &mut out).unwrap();
        assert_eq!(len, data.len() as u64);
        assert_eq!(out, data);
        assert_eq!(digest, hash_bytes(&data));
    }
}
