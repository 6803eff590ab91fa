//! Cryptographic utilities.
//!
//! Token generation and hashing for sessions, and HMAC verification of
//! wearable webhook signatures.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Prefix of the wearable signature header value.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Compute HMAC-SHA256 and return hex-encoded result.
///
/// # Panics
///
/// Never in practice: HMAC-SHA256 accepts keys of any size (RFC 2104).
#[must_use]
pub fn hmac_sha256_hex(secret: &str, message: &[u8]) -> String {
    // INVARIANT: `new_from_slice` only fails for fixed-size-key MACs.
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC-SHA256 accepts any key size");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Hex-encoded SHA-256 of `input`. This is what the store keeps for session
/// and CSRF tokens.
#[must_use]
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// A fresh random 64-character hex token.
#[must_use]
pub fn random_token() -> String {
    let a = uuid::Uuid::new_v4();
    let b = uuid::Uuid::new_v4();
    format!("{}{}", a.simple(), b.simple())
}

/// Constant-time string comparison to prevent timing attacks.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Verify a `sha256=<hex>` signature header over `body`.
#[must_use]
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(provided) = header.trim().strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let expected = hmac_sha256_hex(secret, body);
    constant_time_eq(&expected, &provided.to_ascii_lowercase())
}
