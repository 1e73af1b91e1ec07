//! Test harness for the fob blob store.
//!
//! Provides an emulator-backed store builder, a reference filesystem as
//! ground truth, a seeded operation generator, and an invariant audit that
//! checks the on-device image against the store's documented guarantees.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod ops;
pub mod reference;

use fob_core::{KeySlot, ManagementKey};
use fob_device::emulator::{EmulatedToken, DEFAULT_MANAGEMENT_KEY};
use fob_proto::{ObjectRecord, StoreParams};
use fob_store::{FsckObject, FsckReport, SlotLayout, TokenStore};

pub use ops::{Op, OpGenerator};
pub use reference::ReferenceFs;

/// The factory administrative credential of the emulated token.
pub fn admin() -> ManagementKey {
    ManagementKey::Key(DEFAULT_MANAGEMENT_KEY.to_vec())
}

/// Builds an emulator-backed store, formatted with the given geometry.
///
/// When `key_slot` refers to a key, one is generated on the token first so
/// encrypted blobs work out of the box.
pub fn formatted_store(
    object_count: u8,
    object_size: u16,
    key_slot: KeySlot,
) -> TokenStore<EmulatedToken> {
    let mut token = EmulatedToken::new();
    if key_slot.is_some() {
        token.generate_key(key_slot);
    }

    let mut store = TokenStore::new(token, SlotLayout::reference());
    store
        .format(
            StoreParams {
                object_count,
                object_size,
                encryption_key_slot: key_slot,
            },
            &admin(),
        )
        .expect("formatting the emulated store cannot fail");
    store
}

/// Audits a raw `fsck` image against the store guarantees that hold after
/// every completed operation:
///
/// - every object decodes and agrees with object 0 on the store parameters
/// - chain ages are consecutive and ascending
/// - chain positions run 0,1,... and the last chunk self-loops
/// - no two heads share a name
/// - the union of all chains is exactly the set of aged objects
/// - each chain's payload covers the head's stored size
///
/// Panics with a description on the first violation.
pub fn audit_invariants(report: &FsckReport) {
    let records: Vec<&ObjectRecord> = report
        .objects
        .iter()
        .enumerate()
        .map(|(index, object)| match object {
            FsckObject::Decoded { record, .. } => record,
            FsckObject::Missing => panic!("object {index} missing from a formatted store"),
            FsckObject::Corrupt { error } => panic!("object {index} corrupt: {error}"),
        })
        .collect();

    let count = records.len();
    assert_eq!(count, report.params.object_count as usize, "object count");

    let mut reached = vec![false; count];
    let mut names = Vec::new();

    for head_index in 0..count {
        let ObjectRecord::Head { age, meta, .. } = records[head_index] else {
            continue;
        };

        assert!(
            !names.contains(&meta.name),
            "duplicate head for {:?}",
            meta.name
        );
        names.push(meta.name.clone());

        // Walk the chain, checking ages and positions as we go.
        let mut chain_payload = 0usize;
        let mut expected_age = *age;
        let mut expected_pos = 0u16;
        let mut current = head_index;
        loop {
            assert!(!reached[current], "object {current} claimed twice");
            reached[current] = true;

            let record = records[current];
            assert_eq!(record.age(), expected_age, "age sequence at {current}");
            assert_eq!(
                record.pos(),
                Some(expected_pos),
                "position sequence at {current}"
            );
            chain_payload += record.payload().map(<[u8]>::len).unwrap_or(0);

            let next = record.next().expect("chain member has a next pointer") as usize;
            assert!(next < count, "next pointer out of range at {current}");
            if next == current {
                break;
            }
            current = next;
            expected_age += 1;
            expected_pos += 1;
        }

        assert!(
            chain_payload >= meta.stored_size as usize,
            "chain of {:?} holds {chain_payload} bytes, stored size {}",
            meta.name,
            meta.stored_size
        );
    }

    for (index, record) in records.iter().enumerate() {
        assert_eq!(
            record.age() != 0,
            reached[index],
            "object {index} aged/reachable mismatch"
        );
    }
}
