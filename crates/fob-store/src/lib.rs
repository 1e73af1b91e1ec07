//! Fob Store - the on-device object store.
//!
//! Provides:
//! - `StoreImage` - in-memory image of all object slots with dirty tracking
//! - `sanitize` - the three-phase consistency pass
//! - `TokenStore` - the public operations (`format`, `store`, `fetch`,
//!   `remove`, `list`, `fsck`, `public_key`)
//!
//! Crash consistency rests on three legs: commits happen in ascending slot
//! index order, chunk ages within a chain are strictly consecutive, and the
//! sanitizer is deterministic. There is no transaction log.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod blob;
pub mod config;
pub mod image;
pub mod ops;
pub mod sanitize;

pub use config::SlotLayout;
pub use image::StoreImage;
pub use ops::{FsckObject, FsckReport, ListEntry, TokenStore};
pub use sanitize::sanitize;

use thiserror::Error;

use fob_core::EnvelopeError;
use fob_device::DeviceError;
use fob_proto::CodecError;

/// Errors surfaced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object 0 is absent or carries the wrong magic; only `format` recovers.
    #[error("store is not formatted")]
    NotFormatted,

    /// No free object slot is available.
    #[error("store is full")]
    StoreFull,

    /// No blob with the requested name.
    #[error("no blob named {0:?}")]
    NotFound(String),

    /// Blob names are 1-255 bytes of UTF-8.
    #[error("invalid blob name")]
    InvalidName,

    /// The administrative credential was rejected or missing.
    #[error("administrative authentication failed")]
    Auth,

    /// The blob is encrypted and no PIN was supplied.
    #[error("blob is encrypted, PIN required")]
    PinRequired,

    /// The device rejected the user PIN.
    #[error("PIN rejected")]
    Pin {
        /// Retries remaining before the device blocks, when known.
        retries: Option<u8>,
    },

    /// The crypto envelope around the payload is malformed.
    #[error("crypto failure: {0}")]
    Crypto(#[from] EnvelopeError),

    /// The 4-byte age counter ran out; only `format` recovers.
    #[error("store age counter exhausted")]
    AgeExhausted,

    /// The configured slot layout cannot host this store.
    #[error("invalid slot layout: {0}")]
    Layout(&'static str),

    /// A record failed to encode; indicates invalid store parameters.
    #[error("codec failure: {0}")]
    Codec(#[from] CodecError),

    /// The device failed; writes may have landed partially.
    #[error("device failure: {0}")]
    Device(DeviceError),
}

impl From<DeviceError> for StoreError {
    fn from(e: DeviceError) -> Self {
        match e {
            DeviceError::AuthRequired | DeviceError::AuthFailed => Self::Auth,
            DeviceError::PinRejected { retries } => Self::Pin { retries },
            other => Self::Device(other),
        }
    }
}
