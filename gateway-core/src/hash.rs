//! Bearer-token hashing.
//!
//! Token strings MUST be hashed before any cache or store operation (§4.1
//! guarantee). Centralised here so C1 and C2 never key a store on a raw
//! token by accident.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of a bearer token, used as the cache/store
/// key everywhere a token is looked up.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
