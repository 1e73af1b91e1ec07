//! Hybrid encryption envelope wrapped around encrypted blob payloads.
//!
//! Wire format: `ephemeral_pub(65) || iv(16) || ciphertext`.
//!
//! Sealing generates an ephemeral P-256 key pair, runs ECDH against the
//! store's public key, derives a 32-byte AES key with HKDF-SHA-256 (empty
//! salt, empty info) and encrypts with AES-256-CBC under PKCS#7 padding.
//! Opening is split in two: [`parse`] extracts the ephemeral point so the
//! caller can obtain the shared secret from the device (the static private
//! key never leaves it), then [`open`] finishes the symmetric half.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use super::hkdf::hkdf_sha256;
use super::{ENVELOPE_KEY_LEN, SHARED_SECRET_LEN};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Length of the uncompressed P-256 point that opens the envelope.
pub const ENVELOPE_POINT_LEN: usize = 65;

/// Length of the CBC initialization vector.
pub const ENVELOPE_IV_LEN: usize = 16;

/// Smallest parseable envelope: point and IV, ciphertext may follow.
pub const ENVELOPE_MIN_LEN: usize = ENVELOPE_POINT_LEN + ENVELOPE_IV_LEN;

const AES_BLOCK_LEN: usize = 16;

/// Errors from sealing or opening an envelope.
///
/// Parse and padding failures are deliberately collapsed into one variant so
/// the error signal does not distinguish where decryption went wrong.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The peer public key is not a valid uncompressed P-256 point.
    #[error("peer public key is not a valid P-256 point")]
    MalformedPoint,

    /// The envelope is truncated, malformed, or fails to decrypt.
    #[error("corrupt envelope")]
    Corrupt,
}

/// A parsed (but still encrypted) envelope.
#[derive(Debug, Clone, Copy)]
pub struct Envelope<'a> {
    /// Ephemeral public key the sealer generated for this envelope.
    pub ephemeral_point: [u8; ENVELOPE_POINT_LEN],
    /// CBC initialization vector.
    pub iv: [u8; ENVELOPE_IV_LEN],
    /// AES-256-CBC ciphertext with PKCS#7 padding.
    pub ciphertext: &'a [u8],
}

/// Seals `plaintext` for the holder of the private key matching `peer_public`.
///
/// # Arguments
/// * `plaintext` - Payload bytes to protect
/// * `peer_public` - The store key's uncompressed P-256 point (65 bytes)
///
/// # Returns
/// The wire envelope `ephemeral_pub(65) || iv(16) || ct`, where
/// `ct.len()` is `plaintext.len()` rounded up to the next AES block.
pub fn seal(plaintext: &[u8], peer_public: &[u8; ENVELOPE_POINT_LEN]) -> Result<Vec<u8>, EnvelopeError> {
    let peer = PublicKey::from_sec1_bytes(peer_public).map_err(|_| EnvelopeError::MalformedPoint)?;

    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let ephemeral_point = ephemeral.public_key().to_encoded_point(false);

    let shared = ephemeral.diffie_hellman(&peer);
    let key = derive_cipher_key(shared.raw_secret_bytes().as_slice());

    let mut iv = [0u8; ENVELOPE_IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let ciphertext =
        Aes256CbcEnc::new(&key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut wire = Vec::with_capacity(ENVELOPE_MIN_LEN + ciphertext.len());
    wire.extend_from_slice(ephemeral_point.as_bytes());
    wire.extend_from_slice(&iv);
    wire.extend_from_slice(&ciphertext);
    Ok(wire)
}

/// Splits a wire envelope into its parts without decrypting anything.
pub fn parse(wire: &[u8]) -> Result<Envelope<'_>, EnvelopeError> {
    if wire.len() < ENVELOPE_MIN_LEN {
        return Err(EnvelopeError::Corrupt);
    }

    let mut ephemeral_point = [0u8; ENVELOPE_POINT_LEN];
    ephemeral_point.copy_from_slice(&wire[..ENVELOPE_POINT_LEN]);

    let mut iv = [0u8; ENVELOPE_IV_LEN];
    iv.copy_from_slice(&wire[ENVELOPE_POINT_LEN..ENVELOPE_MIN_LEN]);

    Ok(Envelope {
        ephemeral_point,
        iv,
        ciphertext: &wire[ENVELOPE_MIN_LEN..],
    })
}

/// Opens a wire envelope given the ECDH shared secret.
///
/// The caller obtains `shared_secret` by handing the parsed ephemeral point
/// to the device holding the static private key.
pub fn open(wire: &[u8], shared_secret: &[u8; SHARED_SECRET_LEN]) -> Result<Vec<u8>, EnvelopeError> {
    let envelope = parse(wire)?;

    // PKCS#7 always emits at least one full block.
    if envelope.ciphertext.is_empty() || envelope.ciphertext.len() % AES_BLOCK_LEN != 0 {
        return Err(EnvelopeError::Corrupt);
    }

    let key = derive_cipher_key(shared_secret);
    Aes256CbcDec::new(&key.into(), &envelope.iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(envelope.ciphertext)
        .map_err(|_| EnvelopeError::Corrupt)
}

fn derive_cipher_key(shared_secret: &[u8]) -> [u8; ENVELOPE_KEY_LEN] {
    let okm = hkdf_sha256(shared_secret, &[], &[], ENVELOPE_KEY_LEN);
    let mut key = [0u8; ENVELOPE_KEY_LEN];
    key.copy_from_slice(&okm);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::SecretKey;

    /// Local stand-in for the on-device half of the exchange.
    fn device_ecdh(device_secret: &SecretKey, point: &[u8; ENVELOPE_POINT_LEN]) -> [u8; 32] {
        let peer = PublicKey::from_sec1_bytes(point).unwrap();
        let shared =
            p256::ecdh::diffie_hellman(device_secret.to_nonzero_scalar(), peer.as_affine());
        let mut secret = [0u8; 32];
        secret.copy_from_slice(shared.raw_secret_bytes().as_slice());
        secret
    }

    fn device_keypair() -> (SecretKey, [u8; ENVELOPE_POINT_LEN]) {
        let secret = SecretKey::random(&mut OsRng);
        let point = secret.public_key().to_encoded_point(false);
        let bytes = point.as_bytes().try_into().unwrap();
        (secret, bytes)
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let (secret, public) = device_keypair();
        let plaintext = b"the fob holds twelve secrets";

        let wire = seal(plaintext, &public).unwrap();
        let envelope = parse(&wire).unwrap();
        let shared = device_ecdh(&secret, &envelope.ephemeral_point);

        assert_eq!(open(&wire, &shared).unwrap(), plaintext);
    }

    #[test]
    fn test_wire_size_bounds() {
        let (_, public) = device_keypair();

        for len in [0usize, 1, 15, 16, 17, 1000] {
            let plaintext = vec![0xA5u8; len];
            let wire = seal(&plaintext, &public).unwrap();
            // Padding adds between 1 and 16 bytes.
            assert!(wire.len() > ENVELOPE_MIN_LEN + len);
            assert!(wire.len() <= ENVELOPE_MIN_LEN + len + 16);
        }
    }

    #[test]
    fn test_open_with_wrong_secret_fails() {
        let (_, public) = device_keypair();
        let wire = seal(b"secret", &public).unwrap();

        let wrong = [0x13u8; 32];
        // Either the padding check trips or (1 in 2^something) garbage comes
        // back; the padding check failing is the overwhelmingly likely path.
        if let Ok(decrypted) = open(&wire, &wrong) {
            assert_ne!(decrypted, b"secret");
        }
    }

    #[test]
    fn test_truncated_wire_is_corrupt() {
        let (_, public) = device_keypair();
        let wire = seal(b"secret", &public).unwrap();

        assert_eq!(parse(&wire[..80]).unwrap_err(), EnvelopeError::Corrupt);
        let shared = [0u8; 32];
        assert_eq!(open(&wire[..80], &shared).unwrap_err(), EnvelopeError::Corrupt);
        // Point and IV but a ragged ciphertext tail.
        assert_eq!(
            open(&wire[..ENVELOPE_MIN_LEN + 7], &shared).unwrap_err(),
            EnvelopeError::Corrupt
        );
    }

    #[test]
    fn test_tampered_ciphertext_fails_unpad_or_differs() {
        let (secret, public) = device_keypair();
        let plaintext = b"payload that spans more than one block for certain";

        let mut wire = seal(plaintext, &public).unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;

        let envelope = parse(&wire).unwrap();
        let shared = device_ecdh(&secret, &envelope.ephemeral_point);
        match open(&wire, &shared) {
            Err(EnvelopeError::Corrupt) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(decrypted) => assert_ne!(decrypted, plaintext),
        }
    }

    #[test]
    fn test_malformed_peer_point() {
        let bogus = [0u8; ENVELOPE_POINT_LEN];
        assert_eq!(seal(b"x", &bogus).unwrap_err(), EnvelopeError::MalformedPoint);
    }

    #[test]
    fn test_envelopes_are_randomized() {
        let (_, public) = device_keypair();
        let a = seal(b"same plaintext", &public).unwrap();
        let b = seal(b"same plaintext", &public).unwrap();
        assert_ne!(a, b);
    }
}
