//! Public store operations.
//!
//! `TokenStore` ties the device, the codec, the image model and the
//! sanitizer together. Every operation loads a fresh image, sanitizes it
//! (except `fsck`, whose whole point is the raw view), works in memory and
//! syncs dirty slots back in ascending index order.

use serde::Serialize;
use tracing::{debug, info};

use fob_core::{envelope, KeySlot, ManagementKey, Mtime, Pin};
use fob_device::Device;
use fob_proto::{
    decode_object, decode_params, BlobMeta, ObjectRecord, StoreParams, MAX_NAME_LEN,
};

use crate::blob::{assemble, chunk_count, split_payload};
use crate::image::{read_with_retry, StoreImage};
use crate::sanitize::sanitize;
use crate::{SlotLayout, StoreError};

/// One row of a `list` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListEntry {
    /// Blob name.
    pub name: String,
    /// True if the payload is wrapped in a crypto envelope.
    pub encrypted: bool,
    /// Number of chunks the blob occupies.
    pub chunks: usize,
    /// Size handed back by `fetch`, in bytes.
    pub size: u32,
    /// Modification time recorded at store time.
    pub mtime: Mtime,
}

/// Raw decode outcome of one slot, as reported by `fsck`.
#[derive(Debug, Clone, Serialize)]
pub enum FsckObject {
    /// The object was never written.
    Missing,
    /// The object did not decode against the store parameters.
    Corrupt {
        /// Human-readable decode failure.
        error: String,
    },
    /// The object decoded.
    Decoded {
        /// Store-age high-water mark its header carried at write time.
        store_age: u32,
        /// The decoded record.
        record: ObjectRecord,
    },
}

/// The full decoded image, verbatim, with no sanitize pass applied.
#[derive(Debug, Clone, Serialize)]
pub struct FsckReport {
    /// Store-wide parameters from object 0.
    pub params: StoreParams,
    /// High-water mark over all readable headers and ages.
    pub store_age: u32,
    /// Per-slot decode outcomes, in slot order.
    pub objects: Vec<FsckObject>,
}

/// A session against one device's blob store.
pub struct TokenStore<D: Device> {
    device: D,
    layout: SlotLayout,
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(StoreError::InvalidName);
    }
    Ok(())
}

impl<D: Device> TokenStore<D> {
    /// Creates a session over `device` with the given slot layout.
    pub fn new(device: D, layout: SlotLayout) -> Self {
        Self { device, layout }
    }

    /// The underlying device. Primarily for tests driving the emulator.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Consumes the session, returning the device.
    pub fn into_device(self) -> D {
        self.device
    }

    fn load_sanitized(&mut self) -> Result<StoreImage, StoreError> {
        let mut image = StoreImage::load(&mut self.device, &self.layout)?;
        sanitize(&mut image);
        Ok(image)
    }

    /// Initializes the store: `object_count` empty objects of `object_size`
    /// bytes, ages zeroed. Existing contents are ignored.
    pub fn format(
        &mut self,
        params: StoreParams,
        auth: &ManagementKey,
    ) -> Result<(), StoreError> {
        params.validate()?;
        if params.object_count as usize > self.layout.len() {
            return Err(StoreError::Layout("store spans more ids than configured"));
        }

        self.device.auth_admin(auth)?;
        let mut image = StoreImage::format(params);
        image.sync(&mut self.device, &self.layout)?;
        info!(
            object_count = params.object_count,
            object_size = params.object_size,
            key_slot = %params.encryption_key_slot,
            "formatted store"
        );
        Ok(())
    }

    /// Stores `payload` under `name`, replacing any existing blob with that
    /// name. With `encrypted`, the payload is sealed for the store's
    /// encryption key before chunking; no PIN is needed to store.
    pub fn store(
        &mut self,
        name: &str,
        payload: &[u8],
        encrypted: bool,
        auth: &ManagementKey,
    ) -> Result<(), StoreError> {
        validate_name(name)?;
        let mut image = self.load_sanitized()?;

        let plain_size = payload.len() as u32;
        let (wire, blob_key_slot) = if encrypted {
            let slot = image.params().encryption_key_slot;
            let public = self.device.public_key(slot)?;
            (envelope::seal(payload, &public)?, slot)
        } else {
            (payload.to_vec(), KeySlot::NONE)
        };

        // Replacing: free the old chain in memory first so its slots are
        // allocatable. The old blob survives on the device until sync
        // overwrites it.
        if let Some(head) = image.find_blob(name) {
            debug!(name, "replacing existing blob");
            for index in image.chain_indices(head) {
                image.reset_object(index);
            }
        }

        let count = chunk_count(image.params(), name.len(), wire.len());
        let mut indices = Vec::with_capacity(count);
        for _ in 0..count {
            indices.push(image.allocate_free_index()?);
        }

        let base_age = image.store_age();
        if u32::MAX - base_age < count as u32 {
            return Err(StoreError::AgeExhausted);
        }
        let mtime = Mtime::now();
        let slices = split_payload(image.params(), name.len(), &wire, count);

        for (pos, (&index, chunk)) in indices.iter().zip(&slices).enumerate() {
            let next_index = if pos == count - 1 {
                index
            } else {
                indices[pos + 1]
            };
            let next = next_index as u8;
            let age = base_age + 1 + pos as u32;
            let record = if pos == 0 {
                ObjectRecord::Head {
                    age,
                    next,
                    meta: BlobMeta {
                        mtime,
                        stored_size: wire.len() as u32,
                        encryption_key_slot: blob_key_slot,
                        plain_size,
                        name: name.to_string(),
                    },
                    payload: chunk.to_vec(),
                }
            } else {
                ObjectRecord::Body {
                    age,
                    pos: pos as u16,
                    next,
                    payload: chunk.to_vec(),
                }
            };
            image.commit_object(index, record);
        }

        self.device.auth_admin(auth)?;
        image.sync(&mut self.device, &self.layout)?;
        info!(name, bytes = payload.len(), chunks = count, encrypted, "stored blob");
        Ok(())
    }

    /// Fetches the blob called `name`. Encrypted blobs need the user PIN for
    /// the on-device ECDH.
    pub fn fetch(&mut self, name: &str, pin: Option<&Pin>) -> Result<Vec<u8>, StoreError> {
        validate_name(name)?;
        let image = self.load_sanitized()?;

        let head = image
            .find_blob(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        let (key_slot, plain_size) = match image.record(head).meta() {
            Some(meta) => (meta.encryption_key_slot, meta.plain_size),
            None => return Err(StoreError::NotFound(name.to_string())),
        };

        let wire = assemble(&image, head);

        if !key_slot.is_some() {
            debug!(name, bytes = wire.len(), "fetched blob");
            return Ok(wire);
        }

        let pin = pin.ok_or(StoreError::PinRequired)?;
        let parsed = envelope::parse(&wire)?;
        let shared = self.device.ecdh(key_slot, &parsed.ephemeral_point, pin)?;
        let plain = envelope::open(&wire, &shared)?;
        if plain.len() != plain_size as usize {
            return Err(StoreError::Crypto(fob_core::EnvelopeError::Corrupt));
        }
        debug!(name, bytes = plain.len(), "fetched encrypted blob");
        Ok(plain)
    }

    /// Removes the blob called `name`. Ages are not consumed.
    pub fn remove(&mut self, name: &str, auth: &ManagementKey) -> Result<(), StoreError> {
        validate_name(name)?;
        let mut image = self.load_sanitized()?;

        let head = image
            .find_blob(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        for index in image.chain_indices(head) {
            image.reset_object(index);
        }

        self.device.auth_admin(auth)?;
        image.sync(&mut self.device, &self.layout)?;
        info!(name, "removed blob");
        Ok(())
    }

    /// Lists all blobs, sorted by name.
    pub fn list(&mut self) -> Result<Vec<ListEntry>, StoreError> {
        let image = self.load_sanitized()?;

        let mut entries = Vec::new();
        for head in image.head_indices() {
            if let Some(meta) = image.record(head).meta() {
                entries.push(ListEntry {
                    name: meta.name.clone(),
                    encrypted: meta.is_encrypted(),
                    chunks: image.chain_indices(head).len(),
                    size: meta.plain_size,
                    mtime: meta.mtime,
                });
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Returns the raw decoded image for diagnostics. No sanitize pass, no
    /// repair: what the device holds is what the report shows.
    pub fn fsck(&mut self) -> Result<FsckReport, StoreError> {
        let id_zero = self
            .layout
            .id(0)
            .ok_or(StoreError::Layout("no object ids"))?;
        let raw_zero = read_with_retry(&mut self.device, id_zero)
            .map_err(StoreError::from)?
            .ok_or(StoreError::NotFormatted)?;
        let (params, _) = decode_params(&raw_zero).map_err(|_| StoreError::NotFormatted)?;
        params.validate().map_err(|_| StoreError::NotFormatted)?;
        if params.object_count as usize > self.layout.len() {
            return Err(StoreError::Layout("store spans more ids than configured"));
        }

        let mut store_age = 0u32;
        let mut objects = Vec::with_capacity(params.object_count as usize);
        for index in 0..params.object_count as usize {
            let raw = if index == 0 {
                Some(raw_zero.clone())
            } else {
                let id = self
                    .layout
                    .id(index)
                    .ok_or(StoreError::Layout("id list too short"))?;
                read_with_retry(&mut self.device, id).map_err(StoreError::from)?
            };

            let object = match raw {
                None => FsckObject::Missing,
                Some(bytes) => match decode_object(&params, &bytes) {
                    Ok(decoded) => {
                        store_age = store_age
                            .max(decoded.store_age)
                            .max(decoded.record.age());
                        FsckObject::Decoded {
                            store_age: decoded.store_age,
                            record: decoded.record,
                        }
                    }
                    Err(error) => FsckObject::Corrupt {
                        error: error.to_string(),
                    },
                },
            };
            objects.push(object);
        }

        Ok(FsckReport {
            params,
            store_age,
            objects,
        })
    }

    /// Returns the uncompressed public point of the key in `slot`.
    pub fn public_key(&mut self, slot: KeySlot) -> Result<[u8; 65], StoreError> {
        Ok(self.device.public_key(slot)?)
    }
}
