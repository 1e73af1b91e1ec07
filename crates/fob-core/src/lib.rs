//! Fob Core - Core types and cryptographic primitives for the fob blob store.
//!
//! This crate provides:
//! - Identifier types (`ObjectId`, `KeySlot`) and credential wrappers
//! - HKDF-SHA-256 key derivation
//! - The hybrid ECDH + AES-CBC envelope wrapped around encrypted blobs
//! - Blob modification timestamps

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod crypto;
pub mod ids;
pub mod time;

pub use crypto::*;
pub use ids::*;
pub use time::*;
