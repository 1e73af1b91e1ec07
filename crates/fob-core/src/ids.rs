//! Identifier and credential types shared across the fob crates.
//!
//! - `ObjectId` - device-local id of one PIV data object (3 bytes on the wire)
//! - `KeySlot` - id of an on-device asymmetric key slot (0 = none)
//! - `Pin` - user PIN presented for on-device ECDH
//! - `ManagementKey` - administrative credential required for writes

use std::fmt;

use serde::{Deserialize, Serialize};

/// Device-local identifier of one PIV data object.
///
/// Ids are opaque 3-byte values; the store is configured with an explicit
/// list of them and never assumes any numeric relationship between ids.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(u32);

impl ObjectId {
    /// Largest representable id (3 bytes).
    pub const MAX: u32 = 0x00FF_FFFF;

    /// Creates an object id, rejecting values wider than 3 bytes.
    pub const fn new(id: u32) -> Option<Self> {
        if id <= Self::MAX {
            Some(Self(id))
        } else {
            None
        }
    }

    /// Returns the raw id value.
    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({:#08x})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#08x}", self.0)
    }
}

/// Identifier of an on-device asymmetric key slot.
///
/// Slot 0 is reserved to mean "no key": a store formatted with `KeySlot::NONE`
/// cannot hold encrypted blobs, and a blob whose encryption slot is
/// `KeySlot::NONE` is stored in the clear.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct KeySlot(pub u8);

impl KeySlot {
    /// The "no key" sentinel.
    pub const NONE: Self = Self(0);

    /// Returns true if this slot refers to an actual key.
    pub const fn is_some(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Debug for KeySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeySlot({:#04x})", self.0)
    }
}

impl fmt::Display for KeySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// User PIN presented when the device performs an ECDH operation.
///
/// Deliberately opaque: no `Display`, `Debug` redacts the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Pin(String);

impl Pin {
    /// Wraps a PIN string.
    pub fn new(pin: impl Into<String>) -> Self {
        Self(pin.into())
    }

    /// Exposes the PIN for presentation to the device.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pin(****)")
    }
}

/// Administrative credential required for object writes.
///
/// Either a raw management key (hex-encoded for the PIV toolchain) or a PIN
/// that unlocks a device-held management key.
#[derive(Clone, PartialEq, Eq)]
pub enum ManagementKey {
    /// A static management key, presented as raw bytes.
    Key(Vec<u8>),
    /// PIN-protected mode: the device derives the management key itself.
    Protected(Pin),
}

impl ManagementKey {
    /// Parses a hex-encoded static management key.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        Ok(Self::Key(hex::decode(s)?))
    }

    /// Hex rendering of a static key, for handing to the PIV toolchain.
    pub fn to_hex(&self) -> Option<String> {
        match self {
            Self::Key(bytes) => Some(hex::encode(bytes)),
            Self::Protected(_) => None,
        }
    }
}

impl fmt::Debug for ManagementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(_) => f.write_str("ManagementKey::Key(****)"),
            Self::Protected(_) => f.write_str("ManagementKey::Protected(****)"),
        }
    }
}
