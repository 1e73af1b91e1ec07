//! In-memory image of all object slots.
//!
//! One `StoreImage` corresponds to one operation against one device: it is
//! loaded, sanitized, mutated in memory, then synced back. Slots carry a
//! dirty bit (state differs from the device) and a reservation bit (handed
//! out by the allocator within the current operation).

use tracing::{debug, warn};

use fob_core::ObjectId;
use fob_device::{Device, DeviceError};
use fob_proto::{decode_object, decode_params, encode_object, ObjectRecord, StoreParams};

use crate::{SlotLayout, StoreError};

struct Slot {
    record: ObjectRecord,
    dirty: bool,
    reserved: bool,
}

impl Slot {
    fn empty(dirty: bool) -> Self {
        Self {
            record: ObjectRecord::Empty,
            dirty,
            reserved: false,
        }
    }
}

/// Decoded image of the whole store.
pub struct StoreImage {
    params: StoreParams,
    store_age: u32,
    slots: Vec<Slot>,
}

/// Reads one object, retrying a single time on a transient failure.
pub(crate) fn read_with_retry<D: Device>(
    device: &mut D,
    id: ObjectId,
) -> Result<Option<Vec<u8>>, DeviceError> {
    match device.read_object(id) {
        Err(e) if e.is_transient() => {
            warn!(%id, error = %e, "transient read failure, retrying once");
            device.read_object(id)
        }
        other => other,
    }
}

impl StoreImage {
    /// Builds the image of a freshly formatted store: every slot empty and
    /// dirty, `store_age` zero.
    pub fn format(params: StoreParams) -> Self {
        let slots = (0..params.object_count as usize)
            .map(|_| Slot::empty(true))
            .collect();
        Self {
            params,
            store_age: 0,
            slots,
        }
    }

    /// Loads the image from a device.
    ///
    /// Object 0 seeds the store parameters; an absent, truncated or
    /// wrong-magic object 0 means the store was never formatted. Objects
    /// that fail to decode against the parameters are taken as corrupt and
    /// replaced by dirty empty slots for the sanitizer to settle.
    pub fn load<D: Device>(device: &mut D, layout: &SlotLayout) -> Result<Self, StoreError> {
        let id_zero = layout.id(0).ok_or(StoreError::Layout("no object ids"))?;
        let raw_zero = read_with_retry(device, id_zero)
            .map_err(StoreError::from)?
            .ok_or(StoreError::NotFormatted)?;

        let (params, _) = decode_params(&raw_zero).map_err(|_| StoreError::NotFormatted)?;
        params.validate().map_err(|_| StoreError::NotFormatted)?;
        if params.object_count as usize > layout.len() {
            return Err(StoreError::Layout("store spans more ids than configured"));
        }

        let mut store_age = 0u32;
        let mut slots = Vec::with_capacity(params.object_count as usize);

        for index in 0..params.object_count as usize {
            let raw = if index == 0 {
                Some(raw_zero.clone())
            } else {
                let id = layout.id(index).ok_or(StoreError::Layout("id list too short"))?;
                read_with_retry(device, id).map_err(StoreError::from)?
            };

            let slot = match raw {
                None => Slot::empty(true),
                Some(bytes) => match decode_object(&params, &bytes) {
                    Ok(decoded) => {
                        store_age = store_age
                            .max(decoded.store_age)
                            .max(decoded.record.age());
                        Slot {
                            record: decoded.record,
                            dirty: false,
                            reserved: false,
                        }
                    }
                    Err(error) => {
                        warn!(index, %error, "corrupt object, scheduling reset");
                        Slot::empty(true)
                    }
                },
            };
            slots.push(slot);
        }

        debug!(
            object_count = params.object_count,
            object_size = params.object_size,
            store_age,
            "loaded store image"
        );
        Ok(Self {
            params,
            store_age,
            slots,
        })
    }

    /// The store-wide parameters.
    pub fn params(&self) -> &StoreParams {
        &self.params
    }

    /// The store-age high-water mark.
    pub fn store_age(&self) -> u32 {
        self.store_age
    }

    /// Number of object slots.
    pub fn object_count(&self) -> usize {
        self.slots.len()
    }

    /// The record currently held by slot `index`.
    pub fn record(&self, index: usize) -> &ObjectRecord {
        &self.slots[index].record
    }

    /// Whether slot `index` differs from the device.
    pub fn is_dirty(&self, index: usize) -> bool {
        self.slots[index].dirty
    }

    /// Lowest empty, unreserved slot index; the slot stays reserved for the
    /// rest of this operation.
    pub fn allocate_free_index(&mut self) -> Result<usize, StoreError> {
        let index = self
            .slots
            .iter()
            .position(|s| s.record.is_empty() && !s.reserved)
            .ok_or(StoreError::StoreFull)?;
        self.slots[index].reserved = true;
        Ok(index)
    }

    /// Replaces the record in slot `index`, marking it dirty and raising the
    /// store age to cover the record's own age.
    pub fn commit_object(&mut self, index: usize, record: ObjectRecord) {
        self.store_age = self.store_age.max(record.age());
        let slot = &mut self.slots[index];
        slot.record = record;
        slot.dirty = true;
        slot.reserved = false;
    }

    /// Resets slot `index` to empty and marks it dirty.
    pub fn reset_object(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        slot.record = ObjectRecord::Empty;
        slot.dirty = true;
        slot.reserved = false;
    }

    /// Finds the head chunk of the blob called `name`.
    pub fn find_blob(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| {
            s.record
                .meta()
                .map(|meta| meta.name == name)
                .unwrap_or(false)
        })
    }

    /// Indices of all head chunks, in slot order.
    pub fn head_indices(&self) -> Vec<usize> {
        (0..self.slots.len())
            .filter(|&i| self.slots[i].record.is_head())
            .collect()
    }

    /// Walks the chain starting at `head`, following next-pointers until the
    /// terminal self-loop. Cycles and out-of-range pointers stop the walk;
    /// on a sanitized image neither occurs.
    pub fn chain_indices(&self, head: usize) -> Vec<usize> {
        let mut visited = vec![false; self.slots.len()];
        let mut chain = Vec::new();
        let mut current = head;

        loop {
            if current >= self.slots.len() || visited[current] {
                break;
            }
            visited[current] = true;
            chain.push(current);
            match self.slots[current].record.next() {
                Some(next) if next as usize != current => current = next as usize,
                _ => break,
            }
        }
        chain
    }

    /// Writes every dirty slot back to the device, in ascending index order.
    ///
    /// Dirty bits clear as writes land; on failure the remaining bits stay
    /// set and the error surfaces. The index order is what makes an
    /// interrupted operation recoverable: any prefix of the planned writes
    /// sanitizes to a deterministic state on the next load.
    pub fn sync<D: Device>(
        &mut self,
        device: &mut D,
        layout: &SlotLayout,
    ) -> Result<(), StoreError> {
        let mut written = 0usize;
        for index in 0..self.slots.len() {
            if !self.slots[index].dirty {
                continue;
            }
            let id = layout.id(index).ok_or(StoreError::Layout("id list too short"))?;
            let bytes = encode_object(&self.params, self.store_age, &self.slots[index].record)?;
            device.write_object(id, &bytes)?;
            self.slots[index].dirty = false;
            written += 1;
        }
        debug!(written, "synced store image");
        Ok(())
    }
}
