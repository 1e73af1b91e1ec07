//! In-memory token emulator.
//!
//! Mirrors the hardware semantics the store depends on: the never-written
//! sentinel, per-object write atomicity, administrative authentication, PIN
//! retry counting, on-device ECDH, and the ejection window - with a
//! configurable probability, any write can instead yank the token, leaving
//! exactly the prefix of the operation's writes on "flash".

use std::collections::HashMap;

use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use fob_core::{KeySlot, ManagementKey, ObjectId, Pin};

use crate::{Device, DeviceError, PUBLIC_POINT_LEN, SHARED_SECRET_LEN};

/// Default PIN of a factory-fresh token.
pub const DEFAULT_PIN: &str = "123456";

/// Default management key of a factory-fresh token.
pub const DEFAULT_MANAGEMENT_KEY: [u8; 24] = [
    0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07,
    0x08, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08,
];

const PIN_RETRIES: u8 = 3;

/// In-memory stand-in for a PIV-style token.
pub struct EmulatedToken {
    objects: HashMap<ObjectId, Vec<u8>>,
    keys: HashMap<KeySlot, SecretKey>,
    pin: Pin,
    pin_retries_left: u8,
    management_key: Vec<u8>,
    authed: bool,
    ejected: bool,
    ejection_probability: f64,
    eject_after: Option<usize>,
    rng: StdRng,
    write_count: usize,
}

impl EmulatedToken {
    /// Creates a token with factory defaults and no ejection simulation.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Creates a token whose ejection draws come from a fixed seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            objects: HashMap::new(),
            keys: HashMap::new(),
            pin: Pin::new(DEFAULT_PIN),
            pin_retries_left: PIN_RETRIES,
            management_key: DEFAULT_MANAGEMENT_KEY.to_vec(),
            authed: false,
            ejected: false,
            ejection_probability: 0.0,
            eject_after: None,
            rng: StdRng::seed_from_u64(seed),
            write_count: 0,
        }
    }

    /// Sets the probability that any single write ejects the token instead
    /// of landing.
    pub fn set_ejection_probability(&mut self, probability: f64) {
        self.ejection_probability = probability.clamp(0.0, 1.0);
    }

    /// Arms a deterministic ejection: the next `writes` writes land, the one
    /// after ejects. Used to replay every prefix of a write sequence.
    pub fn eject_after(&mut self, writes: usize) {
        self.eject_after = Some(writes);
    }

    /// Generates a fresh P-256 key in `slot` and returns its public point.
    pub fn generate_key(&mut self, slot: KeySlot) -> [u8; PUBLIC_POINT_LEN] {
        let secret = SecretKey::random(&mut self.rng);
        let point = secret.public_key().to_encoded_point(false);
        let mut out = [0u8; PUBLIC_POINT_LEN];
        out.copy_from_slice(point.as_bytes());
        self.keys.insert(slot, secret);
        out
    }

    /// Simulates pulling the token out of the reader.
    pub fn eject(&mut self) {
        self.ejected = true;
    }

    /// Puts the token back. Administrative authentication does not survive
    /// the reconnect.
    pub fn reinsert(&mut self) {
        self.ejected = false;
        self.authed = false;
    }

    /// Returns true while the token is out of the reader.
    pub fn is_ejected(&self) -> bool {
        self.ejected
    }

    /// Number of writes that actually landed.
    pub fn write_count(&self) -> usize {
        self.write_count
    }

    /// PIN retries remaining before the device blocks.
    pub fn pin_retries_left(&self) -> u8 {
        self.pin_retries_left
    }

    fn ensure_present(&self) -> Result<(), DeviceError> {
        if self.ejected {
            Err(DeviceError::Disconnected)
        } else {
            Ok(())
        }
    }
}

impl Default for EmulatedToken {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for EmulatedToken {
    fn read_object(&mut self, id: ObjectId) -> Result<Option<Vec<u8>>, DeviceError> {
        self.ensure_present()?;
        Ok(self.objects.get(&id).cloned())
    }

    fn auth_admin(&mut self, key: &ManagementKey) -> Result<(), DeviceError> {
        self.ensure_present()?;
        let accepted = match key {
            ManagementKey::Key(bytes) => bytes == &self.management_key,
            ManagementKey::Protected(pin) => pin == &self.pin,
        };
        if accepted {
            self.authed = true;
            Ok(())
        } else {
            Err(DeviceError::AuthFailed)
        }
    }

    fn write_object(&mut self, id: ObjectId, bytes: &[u8]) -> Result<(), DeviceError> {
        self.ensure_present()?;
        if !self.authed {
            return Err(DeviceError::AuthRequired);
        }
        let armed = match self.eject_after {
            Some(0) => {
                self.eject_after = None;
                true
            }
            Some(remaining) => {
                self.eject_after = Some(remaining - 1);
                false
            }
            None => false,
        };
        if armed
            || (self.ejection_probability > 0.0
                && self.rng.gen::<f64>() < self.ejection_probability)
        {
            // The token leaves before this write lands: the slot keeps its
            // old bytes and every later call fails until reinsertion.
            debug!(%id, "simulated ejection during write");
            self.ejected = true;
            return Err(DeviceError::Disconnected);
        }
        self.objects.insert(id, bytes.to_vec());
        self.write_count += 1;
        Ok(())
    }

    fn public_key(&mut self, slot: KeySlot) -> Result<[u8; PUBLIC_POINT_LEN], DeviceError> {
        self.ensure_present()?;
        let secret = self.keys.get(&slot).ok_or(DeviceError::KeyMissing(slot))?;
        let point = secret.public_key().to_encoded_point(false);
        let mut out = [0u8; PUBLIC_POINT_LEN];
        out.copy_from_slice(point.as_bytes());
        Ok(out)
    }

    fn ecdh(
        &mut self,
        slot: KeySlot,
        peer: &[u8; PUBLIC_POINT_LEN],
        pin: &Pin,
    ) -> Result<[u8; SHARED_SECRET_LEN], DeviceError> {
        self.ensure_present()?;
        let secret = self.keys.get(&slot).ok_or(DeviceError::KeyMissing(slot))?;

        if self.pin_retries_left == 0 {
            return Err(DeviceError::PinRejected { retries: Some(0) });
        }
        if pin != &self.pin {
            self.pin_retries_left -= 1;
            return Err(DeviceError::PinRejected {
                retries: Some(self.pin_retries_left),
            });
        }
        self.pin_retries_left = PIN_RETRIES;

        let peer = PublicKey::from_sec1_bytes(peer)
            .map_err(|_| DeviceError::Malformed("peer point is not on P-256".into()))?;
        let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());

        let mut out = [0u8; SHARED_SECRET_LEN];
        out.copy_from_slice(shared.raw_secret_bytes().as_slice());
        Ok(out)
    }
}
