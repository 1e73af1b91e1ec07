//! Fob Proto - On-device object record layout and codec.
//!
//! Every PIV data object used by the store holds one fixed-size record:
//! a common header carrying the store-wide parameters, optional chunk
//! metadata, optional blob metadata (head chunks only) and the chunk
//! payload, zero-padded to the object size.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod layout;
pub mod object;

pub use layout::*;
pub use object::{
    decode_object, decode_params, encode_object, BlobMeta, CodecError, DecodedObject,
    ObjectRecord, StoreParams,
};
