//! Content fingerprints for source files.
//!
//! A document's identity is the lowercase hex SHA-256 of its raw bytes, so
//! identical content at different paths shares one id and any byte change
//! yields a new one.

use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;

use crate::error::Result;

/// Files are hashed in blocks of this size; they are never read whole.
pub const BLOCK_SIZE: usize = 64 * 1024;

/// Hash a file's contents, streaming it in [`BLOCK_SIZE`] reads.
pub async fn file_digest(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BLOCK_SIZE];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Hash an in-memory byte slice.
pub fn bytes_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
