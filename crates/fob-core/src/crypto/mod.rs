//! Cryptographic primitives for the fob blob store.
//!
//! - HKDF-SHA-256 key derivation (RFC 5869)
//! - The hybrid envelope: ephemeral P-256 ECDH -> HKDF -> AES-256-CBC/PKCS#7

pub mod envelope;
pub mod hkdf;

pub use envelope::{
    open, parse, seal, Envelope, EnvelopeError, ENVELOPE_IV_LEN, ENVELOPE_MIN_LEN,
    ENVELOPE_POINT_LEN,
};
pub use hkdf::{hkdf_sha256, hmac_sha256};

/// Size of the AES key derived for the envelope cipher.
pub const ENVELOPE_KEY_LEN: usize = 32;

/// Size of the ECDH shared secret (P-256 x-coordinate).
pub const SHARED_SECRET_LEN: usize = 32;
