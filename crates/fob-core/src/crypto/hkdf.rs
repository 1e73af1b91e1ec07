//! HKDF-SHA-256 per RFC 5869.
//!
//! The envelope derives its AES key from the raw ECDH shared secret with an
//! empty salt and empty info, so the whole derivation collapses to a single
//! extract-and-expand round.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Computes HMAC-SHA-256 of a message using the given key.
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(message);
    let result = mac.finalize();
    let mut output = [0u8; 32];
    output.copy_from_slice(&result.into_bytes());
    output
}

/// HKDF-SHA-256 key derivation as specified in RFC 5869.
///
/// # Arguments
/// * `ikm` - Input keying material (the ECDH shared secret for envelopes)
/// * `salt` - Optional salt (empty salt is treated as 32 zero bytes)
/// * `info` - Context string (empty for envelope keys)
/// * `length` - Length of output keying material (1-8160 bytes)
///
/// # Panics
/// Panics if length is 0 or exceeds 8160 bytes (255 * 32)
pub fn hkdf_sha256(ikm: &[u8], salt: &[u8], info: &[u8], length: usize) -> Vec<u8> {
    let n = length.div_ceil(32);
    assert!(n >= 1 && n <= 255, "HKDF output length must be 1-8160 bytes");

    // Extract: PRK = HMAC(salt, IKM); empty salt means 32 zero bytes
    let prk = if salt.is_empty() {
        hmac_sha256(&[0u8; 32], ikm)
    } else {
        hmac_sha256(salt, ikm)
    };

    // Expand: T(i) = HMAC(PRK, T(i-1) || info || i)
    let mut output = Vec::with_capacity(length);
    let mut t = Vec::new();

    for i in 1..=n {
        let mut message = t.clone();
        message.extend_from_slice(info);
        message.push(i as u8);
        t = hmac_sha256(&prk, &message).to_vec();
        output.extend_from_slice(&t);
    }

    output.truncate(length);
    output
}
