//! Streaming SHA-256 verification.

use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use super::error::Result;

/// Stream a file through SHA-256 in `buffer_size` blocks and compare the
/// digest against an expected hex string (case-insensitive). A mismatch is
/// an expected boolean outcome, not an error.
pub async fn verify_file(path: &Path, expected_hex: &str, buffer_size: usize) -> Result<bool> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; buffer_size.max(1)];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let digest = hex::encode(hasher.finalize());
    Ok(digest.eq_ignore_ascii_case(expected_hex.trim()))
}
