//! SHA-256 content hashing.
//!
//! Bundle identity is the lowercase hex SHA-256 of the payload bytes. The
//! same digest is used by the publisher when it writes a manifest and by the
//! sync engine when it verifies a downloaded payload.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};

/// Buffer size for reading files during checksum calculation (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Calculate the SHA-256 of an in-memory payload.
pub fn payload_hash(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Calculate SHA-256 checksum of a file.
///
/// # Returns
///
/// The lowercase hexadecimal SHA-256 hash of the file contents.
pub fn file_hash(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Compare a payload against an expected hash.
///
/// Returns the actual hash on mismatch. Comparison ignores ASCII case so
/// manifests written with uppercase hex still verify.
pub fn verify_payload(data: &[u8], expected: &str) -> Result<(), String> {
    let actual = payload_hash(data);
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(actual)
    }
}

/// 32-bit checksum derived from a SHA-256 digest (first four bytes, big-endian).
pub fn digest_u32(data: &[u8]) -> u32 {
    let digest = Sha256::digest(data);
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}
