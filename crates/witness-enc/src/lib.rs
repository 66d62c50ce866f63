//! Domain-separated hashing for the witness audit chain.
//!
//! Every hash in the chain is SHA-256. Merkle nodes are tagged with a
//! single-byte domain prefix so a leaf digest can never collide with an
//! interior digest; entry hashes are untagged because their preimage layout
//! (sequence, timestamp, kind, previous hash, payload bytes) is fixed by the
//! chain format.

use sha2::{Digest, Sha256};

/// Single-byte domain tags for Merkle node hashing.
pub mod domains {
    /// Prefix for leaf hashes.
    pub const LEAF: u8 = 0x00;
    /// Prefix for interior node hashes.
    pub const NODE: u8 = 0x01;
}

/// SHA-256 over a domain tag followed by each part in order, no separators.
pub fn domain_hash(tag: u8, parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([tag]);
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// SHA-256 over the concatenation of the parts, no tag, no separators.
pub fn digest_parts(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Lowercase-hex form of [`domain_hash`].
pub fn domain_hash_hex(tag: u8, parts: &[&[u8]]) -> String {
    hex::encode(domain_hash(tag, parts))
}

/// Lowercase-hex form of [`digest_parts`].
pub fn digest_hex(parts: &[&[u8]]) -> String {
    hex::encode(digest_parts(parts))
}
