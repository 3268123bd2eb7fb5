use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of `input`.
///
/// Every persisted identity in the crate (episode keys, object unique ids,
/// stable-id fallbacks) goes through this one function so the values stay
/// comparable across runs.
pub fn content_hash(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// First `len` hex characters of [`content_hash`].
pub fn short_hash(input: &str, len: usize) -> String {
    let mut hash = content_hash(input);
    hash.truncate(len);
    hash
}
