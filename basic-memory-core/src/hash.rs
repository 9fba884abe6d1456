//! Content hashing for change detection
//!
//! Every entity's `checksum` is the hex-encoded SHA-256 of its file's
//! bytes. The scanner never looks at mtimes: a file is "changed" only
//! if its hash differs from what's stored.

use sha2::{Digest, Sha256};

/// Hash raw bytes into a hex-encoded SHA-256 digest.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
