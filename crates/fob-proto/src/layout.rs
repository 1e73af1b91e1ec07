//! Record layout constants.
//!
//! All integers are little-endian. Offsets are implicit in field order:
//!
//! ```text
//! common    : magic(4) | object_count(1) | object_size(2) |
//!             store_encryption_key_slot(1) | store_age(4) | object_age(4)
//! age != 0  : chunk_pos_in_blob(2) | next_chunk_index(1)
//! pos == 0  : blob_mtime(8) | blob_size(4) | blob_enc_key_slot(1) |
//!             blob_unenc_size(4) | blob_name_len(1) | blob_name(<=255)
//! then      : chunk_payload ... zero padding
//! ```

/// Magic constant at offset 0 of every object, empty ones included.
pub const MAGIC: u32 = 0xF2ED_5F0B;

/// Width of the magic field.
pub const MAGIC_LEN: usize = 4;
/// Width of the object-count field.
pub const OBJECT_COUNT_LEN: usize = 1;
/// Width of the object-size field.
pub const OBJECT_SIZE_LEN: usize = 2;
/// Width of the store encryption-key-slot field.
pub const STORE_KEY_SLOT_LEN: usize = 1;
/// Width of the store-age field.
pub const STORE_AGE_LEN: usize = 4;
/// Width of the object-age field.
pub const OBJECT_AGE_LEN: usize = 4;

/// Common header present in every object.
pub const COMMON_HEADER_LEN: usize = MAGIC_LEN
    + OBJECT_COUNT_LEN
    + OBJECT_SIZE_LEN
    + STORE_KEY_SLOT_LEN
    + STORE_AGE_LEN
    + OBJECT_AGE_LEN;

/// Width of the chunk-position field.
pub const CHUNK_POS_LEN: usize = 2;
/// Width of the next-chunk-index field.
pub const NEXT_INDEX_LEN: usize = 1;

/// Fixed overhead of a body chunk (common header plus chunk metadata).
pub const BODY_OVERHEAD: usize = COMMON_HEADER_LEN + CHUNK_POS_LEN + NEXT_INDEX_LEN;

/// Width of the blob modification-time field.
pub const BLOB_MTIME_LEN: usize = 8;
/// Width of the stored-size field.
pub const BLOB_SIZE_LEN: usize = 4;
/// Width of the blob encryption-key-slot field.
pub const BLOB_KEY_SLOT_LEN: usize = 1;
/// Width of the unencrypted-size field.
pub const BLOB_PLAIN_SIZE_LEN: usize = 4;
/// Width of the name-length prefix.
pub const BLOB_NAME_LEN_LEN: usize = 1;

/// Fixed part of the head-only metadata (everything but the name bytes).
pub const HEAD_META_FIXED_LEN: usize =
    BLOB_MTIME_LEN + BLOB_SIZE_LEN + BLOB_KEY_SLOT_LEN + BLOB_PLAIN_SIZE_LEN + BLOB_NAME_LEN_LEN;

/// Fixed overhead of a head chunk; the blob name comes on top.
pub const HEAD_OVERHEAD_FIXED: usize = BODY_OVERHEAD + HEAD_META_FIXED_LEN;

/// Longest allowed blob name, in UTF-8 bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Smallest supported object size.
pub const OBJECT_MIN_SIZE: u16 = 512;

/// Largest supported object size.
///
/// This is the certificate-object ceiling of the reference device, kept as a
/// named default rather than a codec assumption; other transports may raise
/// it.
pub const OBJECT_MAX_SIZE: u16 = 3052;

/// Smallest supported object count.
pub const MIN_OBJECT_COUNT: u8 = 1;

/// Largest supported object count.
pub const MAX_OBJECT_COUNT: u8 = 16;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overheads_match_layout() {
        assert_eq!(COMMON_HEADER_LEN, 16);
        assert_eq!(BODY_OVERHEAD, 19);
        assert_eq!(HEAD_OVERHEAD_FIXED, 37);
    }

    #[test]
    fn test_minimum_object_fits_longest_name() {
        // A head chunk with a 255-byte name must still have payload room.
        assert!(OBJECT_MIN_SIZE as usize > HEAD_OVERHEAD_FIXED + MAX_NAME_LEN);
    }
}
