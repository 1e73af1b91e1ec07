//! Object record codec.
//!
//! Serializes and deserializes one object's record to and from exactly
//! `object_size` bytes. Records are a tagged variant: empty slot, head chunk
//! (chunk metadata plus blob metadata) or body chunk (chunk metadata only).

use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use thiserror::Error;

use fob_core::{KeySlot, Mtime};

use crate::layout::*;

/// Errors during record encoding or decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Not enough bytes to decode the record.
    #[error("object too short: expected {expected} bytes, got {available}")]
    ObjectTooShort {
        /// Bytes the decoder needed.
        expected: usize,
        /// Bytes actually available.
        available: usize,
    },

    /// The magic constant does not match.
    #[error("bad magic: {found:#010x}")]
    BadMagic {
        /// Value found at offset 0.
        found: u32,
    },

    /// A header field disagrees with the store-wide parameters.
    #[error("corrupt header: {field} disagrees with the store parameters")]
    ParamsMismatch {
        /// Name of the offending field.
        field: &'static str,
    },

    /// The blob name is empty or not valid UTF-8.
    #[error("corrupt header: invalid blob name")]
    BadName,

    /// An encode-side value does not fit its declared field width or capacity.
    #[error("field out of range: {field}")]
    FieldRange {
        /// Name of the offending field.
        field: &'static str,
    },
}

/// Store-wide parameters, duplicated in every object header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreParams {
    /// Number of objects in the store.
    pub object_count: u8,
    /// Size of every object, in bytes.
    pub object_size: u16,
    /// Device key slot whose private key decrypts the store's blobs,
    /// or `KeySlot::NONE` for a store without an associated key.
    pub encryption_key_slot: KeySlot,
}

impl StoreParams {
    /// Validates the parameter ranges.
    pub fn validate(&self) -> Result<(), CodecError> {
        if self.object_count < MIN_OBJECT_COUNT || self.object_count > MAX_OBJECT_COUNT {
            return Err(CodecError::FieldRange {
                field: "object_count",
            });
        }
        if self.object_size < OBJECT_MIN_SIZE || self.object_size > OBJECT_MAX_SIZE {
            return Err(CodecError::FieldRange {
                field: "object_size",
            });
        }
        Ok(())
    }

    /// Payload capacity of a body chunk.
    pub fn body_capacity(&self) -> usize {
        self.object_size as usize - BODY_OVERHEAD
    }

    /// Payload capacity of a head chunk carrying a name of `name_len` bytes.
    pub fn head_capacity(&self, name_len: usize) -> usize {
        self.object_size as usize - HEAD_OVERHEAD_FIXED - name_len
    }
}

/// Blob metadata carried by a head chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobMeta {
    /// Blob modification time.
    pub mtime: Mtime,
    /// Total payload size across all chunks, post-envelope if encrypted.
    pub stored_size: u32,
    /// Key slot that decrypts the payload, `KeySlot::NONE` when clear.
    pub encryption_key_slot: KeySlot,
    /// Size handed back to the caller after decryption.
    pub plain_size: u32,
    /// Blob name, 1-255 UTF-8 bytes.
    pub name: String,
}

impl BlobMeta {
    /// Returns true if the blob payload is wrapped in a crypto envelope.
    pub fn is_encrypted(&self) -> bool {
        self.encryption_key_slot.is_some()
    }
}

/// One object's record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ObjectRecord {
    /// Slot not in use; zero age, zero-padded payload.
    Empty,
    /// First chunk of a blob; implies chunk position 0.
    Head {
        /// Age stamped when the chunk was written; never zero.
        age: u32,
        /// Index of the next chunk, or this object's own index to terminate.
        next: u8,
        /// Blob metadata.
        meta: BlobMeta,
        /// Payload bytes contributed by this chunk, padded to capacity.
        payload: Vec<u8>,
    },
    /// Later chunk of a blob.
    Body {
        /// Age stamped when the chunk was written; never zero.
        age: u32,
        /// Position within the blob, 1-based for body chunks.
        pos: u16,
        /// Index of the next chunk, or this object's own index to terminate.
        next: u8,
        /// Payload bytes contributed by this chunk, padded to capacity.
        payload: Vec<u8>,
    },
}

impl ObjectRecord {
    /// The object age; zero exactly for empty slots.
    pub fn age(&self) -> u32 {
        match self {
            Self::Empty => 0,
            Self::Head { age, .. } | Self::Body { age, .. } => *age,
        }
    }

    /// Chunk position within its blob, if the slot is in use.
    pub fn pos(&self) -> Option<u16> {
        match self {
            Self::Empty => None,
            Self::Head { .. } => Some(0),
            Self::Body { pos, .. } => Some(*pos),
        }
    }

    /// Next-chunk index, if the slot is in use.
    pub fn next(&self) -> Option<u8> {
        match self {
            Self::Empty => None,
            Self::Head { next, .. } | Self::Body { next, .. } => Some(*next),
        }
    }

    /// Payload bytes, if the slot is in use.
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Self::Empty => None,
            Self::Head { payload, .. } | Self::Body { payload, .. } => Some(payload),
        }
    }

    /// Head-chunk metadata, if this is a head.
    pub fn meta(&self) -> Option<&BlobMeta> {
        match self {
            Self::Head { meta, .. } => Some(meta),
            _ => None,
        }
    }

    /// Returns true for unused slots.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns true for head chunks.
    pub fn is_head(&self) -> bool {
        matches!(self, Self::Head { .. })
    }
}

/// A record decoded from the device, with the store-age high-water mark its
/// header carried at write time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedObject {
    /// Store age stored in this object's header.
    pub store_age: u32,
    /// The decoded record.
    pub record: ObjectRecord,
}

fn need(buf: &[u8], at: usize, len: usize) -> Result<(), CodecError> {
    if at + len > buf.len() {
        return Err(CodecError::ObjectTooShort {
            expected: at + len,
            available: buf.len(),
        });
    }
    Ok(())
}

/// Extracts the store-wide parameters and stored store-age from a raw object.
///
/// Used on object 0 to bootstrap a load; the caller maps `BadMagic` and
/// `ObjectTooShort` to its "store not formatted" condition.
pub fn decode_params(bytes: &[u8]) -> Result<(StoreParams, u32), CodecError> {
    need(bytes, 0, COMMON_HEADER_LEN)?;
    let mut buf = bytes;

    let magic = buf.get_u32_le();
    if magic != MAGIC {
        return Err(CodecError::BadMagic { found: magic });
    }

    let object_count = buf.get_u8();
    let object_size = buf.get_u16_le();
    let encryption_key_slot = KeySlot(buf.get_u8());
    let store_age = buf.get_u32_le();

    let params = StoreParams {
        object_count,
        object_size,
        encryption_key_slot,
    };
    Ok((params, store_age))
}

/// Decodes one object against the store-wide parameters.
///
/// The raw input must be exactly `params.object_size` bytes: the device
/// always hands back whole objects, anything shorter was truncated in
/// transit and anything longer never came from this store.
pub fn decode_object(params: &StoreParams, bytes: &[u8]) -> Result<DecodedObject, CodecError> {
    if bytes.len() < params.object_size as usize {
        return Err(CodecError::ObjectTooShort {
            expected: params.object_size as usize,
            available: bytes.len(),
        });
    }
    if bytes.len() > params.object_size as usize {
        return Err(CodecError::ParamsMismatch {
            field: "object_size",
        });
    }

    let mut buf = bytes;

    let magic = buf.get_u32_le();
    if magic != MAGIC {
        return Err(CodecError::BadMagic { found: magic });
    }
    if buf.get_u8() != params.object_count {
        return Err(CodecError::ParamsMismatch {
            field: "object_count",
        });
    }
    if buf.get_u16_le() != params.object_size {
        return Err(CodecError::ParamsMismatch {
            field: "object_size",
        });
    }
    if KeySlot(buf.get_u8()) != params.encryption_key_slot {
        return Err(CodecError::ParamsMismatch {
            field: "store_encryption_key_slot",
        });
    }

    let store_age = buf.get_u32_le();
    let age = buf.get_u32_le();

    if age == 0 {
        return Ok(DecodedObject {
            store_age,
            record: ObjectRecord::Empty,
        });
    }

    let pos = buf.get_u16_le();
    let next = buf.get_u8();

    if pos != 0 {
        return Ok(DecodedObject {
            store_age,
            record: ObjectRecord::Body {
                age,
                pos,
                next,
                payload: buf.to_vec(),
            },
        });
    }

    let mtime = Mtime::new(buf.get_u64_le());
    let stored_size = buf.get_u32_le();
    let encryption_key_slot = KeySlot(buf.get_u8());
    let plain_size = buf.get_u32_le();
    let name_len = buf.get_u8() as usize;

    if name_len == 0 {
        return Err(CodecError::BadName);
    }
    if buf.remaining() < name_len {
        return Err(CodecError::ObjectTooShort {
            expected: name_len,
            available: buf.remaining(),
        });
    }
    let name =
        String::from_utf8(buf[..name_len].to_vec()).map_err(|_| CodecError::BadName)?;
    buf.advance(name_len);

    Ok(DecodedObject {
        store_age,
        record: ObjectRecord::Head {
            age,
            next,
            meta: BlobMeta {
                mtime,
                stored_size,
                encryption_key_slot,
                plain_size,
                name,
            },
            payload: buf.to_vec(),
        },
    })
}

/// Encodes one object to exactly `params.object_size` bytes.
///
/// Validates every field range and zero-pads the payload tail.
pub fn encode_object(
    params: &StoreParams,
    store_age: u32,
    record: &ObjectRecord,
) -> Result<Vec<u8>, CodecError> {
    params.validate()?;

    let object_size = params.object_size as usize;
    let mut buf = BytesMut::with_capacity(object_size);

    buf.put_u32_le(MAGIC);
    buf.put_u8(params.object_count);
    buf.put_u16_le(params.object_size);
    buf.put_u8(params.encryption_key_slot.0);
    buf.put_u32_le(store_age);
    buf.put_u32_le(record.age());

    match record {
        ObjectRecord::Empty => {}
        ObjectRecord::Body {
            age,
            pos,
            next,
            payload,
        } => {
            if *age == 0 {
                return Err(CodecError::FieldRange { field: "object_age" });
            }
            if *pos == 0 {
                return Err(CodecError::FieldRange {
                    field: "chunk_pos_in_blob",
                });
            }
            if *next as usize >= params.object_count as usize {
                return Err(CodecError::FieldRange {
                    field: "next_chunk_index",
                });
            }
            if payload.len() > params.body_capacity() {
                return Err(CodecError::FieldRange {
                    field: "chunk_payload",
                });
            }
            buf.put_u16_le(*pos);
            buf.put_u8(*next);
            buf.put_slice(payload);
        }
        ObjectRecord::Head {
            age,
            next,
            meta,
            payload,
        } => {
            if *age == 0 {
                return Err(CodecError::FieldRange { field: "object_age" });
            }
            if *next as usize >= params.object_count as usize {
                return Err(CodecError::FieldRange {
                    field: "next_chunk_index",
                });
            }
            let name_len = meta.name.len();
            if name_len == 0 || name_len > MAX_NAME_LEN {
                return Err(CodecError::FieldRange { field: "blob_name" });
            }
            if payload.len() > params.head_capacity(name_len) {
                return Err(CodecError::FieldRange {
                    field: "chunk_payload",
                });
            }
            buf.put_u16_le(0);
            buf.put_u8(*next);
            buf.put_u64_le(meta.mtime.as_secs());
            buf.put_u32_le(meta.stored_size);
            buf.put_u8(meta.encryption_key_slot.0);
            buf.put_u32_le(meta.plain_size);
            buf.put_u8(name_len as u8);
            buf.put_slice(meta.name.as_bytes());
            buf.put_slice(payload);
        }
    }

    debug_assert!(buf.len() <= object_size);
    buf.resize(object_size, 0);
    Ok(buf.to_vec())
}
