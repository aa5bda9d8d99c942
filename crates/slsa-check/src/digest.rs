//! SHA-256 digest computation for artifacts.

use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256, Sha512};

use crate::error::{Result, VerifyError};

/// Compute the SHA-256 digest of a byte slice as lowercase hex.
#[must_use]
pub fn bytes_digest(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex_encode(&hasher.finalize())
}

/// Compute the SHA-256 digest of a file as lowercase hex.
///
/// Streams the file in chunks so large artifacts are not held in memory.
///
/// # Errors
///
/// Returns `VerifyError::Internal` if the file cannot be read.
pub fn file_digest(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| VerifyError::Internal(format!("open {}: {e}", path.display())))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| VerifyError::Internal(format!("read {}: {e}", path.display())))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_encode(&hasher.finalize()))
}

/// Compute the SHA-512 digest of a file as lowercase hex. npm tarball
/// subjects are sha512-addressed.
///
/// # Errors
///
/// Returns `VerifyError::Internal` if the file cannot be read.
pub fn file_digest_sha512(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| VerifyError::Internal(format!("open {}: {e}", path.display())))?;
    let mut hasher = Sha512::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| VerifyError::Internal(format!("read {}: {e}", path.display())))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_encode(&hasher.finalize()))
}

/// Lowercase hex encoding.
#[must_use]
pub fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Decode a lowercase or uppercase hex string.
///
/// # Errors
///
/// Returns `VerifyError::InvalidFormat` on odd length or non-hex characters.
pub fn hex_decode(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(VerifyError::InvalidFormat(format!(
            "odd-length hex string: {s:?}"
        )));
    }
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(s.len() / 2);
    for pair in bytes.chunks_exact(2) {
        let hi = hex_val(pair[0])?;
        let lo = hex_val(pair[1])?;
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

fn hex_val(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(VerifyError::InvalidFormat(format!(
            "invalid hex character: {:?}",
            c as char
        ))),
    }
}
