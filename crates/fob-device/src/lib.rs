//! Fob Device - the device abstraction the store core consumes.
//!
//! Two implementations expose identical semantics:
//! - [`PivDevice`] drives real hardware through the PIV toolchain
//! - [`EmulatedToken`] is an in-memory double for tests, including the
//!   partial-write window a physical ejection opens
//!
//! The core never talks to a device any other way, so everything above this
//! crate is testable against the emulator alone.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod emulator;
pub mod piv;

use thiserror::Error;

use fob_core::{KeySlot, ManagementKey, ObjectId, Pin};

pub use emulator::EmulatedToken;
pub use piv::PivDevice;

/// Length of an uncompressed P-256 public point.
pub const PUBLIC_POINT_LEN: usize = 65;

/// Length of the ECDH shared secret a device returns.
pub const SHARED_SECRET_LEN: usize = 32;

/// Errors surfaced by a device backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// Transient I/O failure; the operation may be retried.
    #[error("transient device I/O error: {0}")]
    Transient(String),

    /// The device is gone. A write sequence may have landed only partially.
    #[error("device disconnected")]
    Disconnected,

    /// A write was attempted without prior administrative authentication.
    #[error("administrative authentication required")]
    AuthRequired,

    /// The administrative credential was rejected.
    #[error("administrative authentication failed")]
    AuthFailed,

    /// The user PIN was rejected during an on-device key operation.
    #[error("PIN rejected")]
    PinRejected {
        /// Retries remaining before the device blocks the PIN, when the
        /// backend can report them.
        retries: Option<u8>,
    },

    /// The requested key slot holds no usable EC key.
    #[error("no P-256 key in slot {0}")]
    KeyMissing(KeySlot),

    /// The device answered with something the backend cannot interpret.
    #[error("malformed device response: {0}")]
    Malformed(String),
}

impl DeviceError {
    /// Returns true for errors worth a single retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Identifies one physical device to a backend.
///
/// Carries both of a device's names: the transport-level reader string used
/// for object I/O and the stable serial used to select the ECDH channel.
/// Callers resolve the pairing once, up front; nothing downstream ever maps
/// one onto the other again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    reader: String,
    serial: String,
}

impl DeviceHandle {
    /// Pairs a reader name with the device serial behind it.
    pub fn new(reader: impl Into<String>, serial: impl Into<String>) -> Self {
        Self {
            reader: reader.into(),
            serial: serial.into(),
        }
    }

    /// The PC/SC reader name.
    pub fn reader(&self) -> &str {
        &self.reader
    }

    /// The stable device serial.
    pub fn serial(&self) -> &str {
        &self.serial
    }
}

/// Capability surface of a PIV-style token, as seen by the store core.
///
/// All calls may block on device I/O. Writes are atomic per object: after any
/// failure a slot holds either its old bytes or the new ones, never a blend.
pub trait Device {
    /// Reads the last-written bytes of an object, or `None` if the object
    /// was never written.
    fn read_object(&mut self, id: ObjectId) -> Result<Option<Vec<u8>>, DeviceError>;

    /// Presents the administrative credential, enabling subsequent writes.
    fn auth_admin(&mut self, key: &ManagementKey) -> Result<(), DeviceError>;

    /// Writes an object. Requires a prior successful [`Device::auth_admin`].
    fn write_object(&mut self, id: ObjectId, bytes: &[u8]) -> Result<(), DeviceError>;

    /// Returns the uncompressed P-256 point of the key in `slot`.
    fn public_key(&mut self, slot: KeySlot) -> Result<[u8; PUBLIC_POINT_LEN], DeviceError>;

    /// Performs ECDH on-device between the key in `slot` and `peer`,
    /// returning the 32-byte shared secret. The private key never leaves
    /// the device.
    fn ecdh(
        &mut self,
        slot: KeySlot,
        peer: &[u8; PUBLIC_POINT_LEN],
        pin: &Pin,
    ) -> Result<[u8; SHARED_SECRET_LEN], DeviceError>;
}
