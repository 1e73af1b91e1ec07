//! End-to-end scenarios against the emulated token.

use fob_core::{KeySlot, Pin};
use fob_device::emulator::DEFAULT_PIN;
use fob_device::EmulatedToken;
use fob_proto::StoreParams;
use fob_store::{SlotLayout, StoreError, TokenStore};
use fob_tests::{admin, audit_invariants, formatted_store};

#[test]
fn hello_world_roundtrip() {
    let mut store = formatted_store(12, 3052, KeySlot(0x9e));

    store
        .store("hello", b"Hello, world!\n", false, &admin())
        .unwrap();

    let entries = store.list().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "hello");
    assert!(!entries[0].encrypted);
    assert_eq!(entries[0].chunks, 1);
    assert_eq!(entries[0].size, 14);

    assert_eq!(store.fetch("hello", None).unwrap(), b"Hello, world!\n");
    audit_invariants(&store.fsck().unwrap());
}

#[test]
fn multi_chunk_blob_roundtrip() {
    let mut store = formatted_store(12, 3052, KeySlot(0x9e));

    let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    store.store("big", &payload, false, &admin()).unwrap();

    let params = StoreParams {
        object_count: 12,
        object_size: 3052,
        encryption_key_slot: KeySlot(0x9e),
    };
    let head_capacity = params.head_capacity("big".len());
    let body_capacity = params.body_capacity();
    let expected_chunks = 1 + (20_000 - head_capacity).div_ceil(body_capacity);

    let entries = store.list().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].size, 20_000);
    assert_eq!(entries[0].chunks, expected_chunks);

    assert_eq!(store.fetch("big", None).unwrap(), payload);
    audit_invariants(&store.fsck().unwrap());
}

#[test]
fn replacing_store_keeps_only_newest() {
    let mut store = formatted_store(12, 3052, KeySlot(0x9e));

    store.store("x", b"hi", false, &admin()).unwrap();
    store.store("x", b"bye", false, &admin()).unwrap();

    let entries = store.list().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "x");
    assert_eq!(entries[0].chunks, 1);
    assert_eq!(entries[0].size, 3);

    assert_eq!(store.fetch("x", None).unwrap(), b"bye");
    audit_invariants(&store.fsck().unwrap());
}

#[test]
fn store_full_then_remove_frees_a_slot() {
    let mut store = formatted_store(12, 3052, KeySlot(0x9e));
    let payload = vec![0xAB; 3000];

    // 3000-byte blobs with short names are single-chunk at this geometry.
    for i in 0..12 {
        store
            .store(&format!("blob-{i:02}"), &payload, false, &admin())
            .unwrap();
    }

    assert!(matches!(
        store.store("blob-12", &payload, false, &admin()),
        Err(StoreError::StoreFull)
    ));
    // A failed store mutates nothing.
    assert_eq!(store.list().unwrap().len(), 12);

    store.remove("blob-05", &admin()).unwrap();
    store.store("blob-12", &payload, false, &admin()).unwrap();

    let entries = store.list().unwrap();
    assert_eq!(entries.len(), 12);
    assert!(entries.iter().all(|e| e.name != "blob-05"));
    assert!(entries.iter().any(|e| e.name == "blob-12"));
    audit_invariants(&store.fsck().unwrap());
}

#[test]
fn encrypted_roundtrip_with_pin() {
    let mut store = formatted_store(12, 3052, KeySlot(0x9e));

    // Storing needs no PIN, only the public key.
    store.store("s", b"secret", true, &admin()).unwrap();

    let entries = store.list().unwrap();
    assert!(entries[0].encrypted);
    assert_eq!(entries[0].size, 6);

    let pin = Pin::new(DEFAULT_PIN);
    assert_eq!(store.fetch("s", Some(&pin)).unwrap(), b"secret");

    // The stored payload on the device is the envelope, not the plaintext.
    match store.fsck().unwrap().objects.first() {
        Some(fob_store::FsckObject::Decoded { record, .. }) => {
            let meta = record.meta().expect("slot 0 holds the head");
            assert!(meta.stored_size as usize >= 6 + 81);
            assert!(meta.stored_size as usize <= 6 + 81 + 16);
            assert_eq!(meta.plain_size, 6);
        }
        other => panic!("unexpected slot 0 state: {other:?}"),
    }
    audit_invariants(&store.fsck().unwrap());
}

#[test]
fn encrypted_fetch_with_wrong_pin_reports_retries() {
    let mut store = formatted_store(12, 3052, KeySlot(0x9e));
    store.store("s", b"secret", true, &admin()).unwrap();

    let wrong = Pin::new("999999");
    match store.fetch("s", Some(&wrong)) {
        Err(StoreError::Pin { retries }) => assert_eq!(retries, Some(2)),
        other => panic!("expected PIN rejection, got {other:?}"),
    }

    // The right PIN still works and resets the counter.
    let pin = Pin::new(DEFAULT_PIN);
    assert_eq!(store.fetch("s", Some(&pin)).unwrap(), b"secret");
    assert_eq!(store.device_mut().pin_retries_left(), 3);
}

#[test]
fn encrypted_fetch_without_pin_is_rejected() {
    let mut store = formatted_store(12, 3052, KeySlot(0x9e));
    store.store("s", b"secret", true, &admin()).unwrap();

    assert!(matches!(
        store.fetch("s", None),
        Err(StoreError::PinRequired)
    ));
}

#[test]
fn fetch_and_remove_of_absent_blob() {
    let mut store = formatted_store(12, 3052, KeySlot::NONE);

    assert!(matches!(
        store.fetch("ghost", None),
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.remove("ghost", &admin()),
        Err(StoreError::NotFound(_))
    ));
}

#[test]
fn invalid_names_are_rejected_before_any_io() {
    let mut store = TokenStore::new(EmulatedToken::new(), SlotLayout::reference());

    // The device is not even formatted; name validation fires first.
    assert!(matches!(
        store.store("", b"x", false, &admin()),
        Err(StoreError::InvalidName)
    ));
    let long = "n".repeat(256);
    assert!(matches!(
        store.store(&long, b"x", false, &admin()),
        Err(StoreError::InvalidName)
    ));
    assert!(matches!(store.fetch("", None), Err(StoreError::InvalidName)));
    assert!(matches!(
        store.remove(&long, &admin()),
        Err(StoreError::InvalidName)
    ));
}

#[test]
fn operations_on_unformatted_store() {
    let mut store = TokenStore::new(EmulatedToken::new(), SlotLayout::reference());

    assert!(matches!(
        store.store("a", b"x", false, &admin()),
        Err(StoreError::NotFormatted)
    ));
    assert!(matches!(store.list(), Err(StoreError::NotFormatted)));
    assert!(matches!(store.fsck(), Err(StoreError::NotFormatted)));
}

#[test]
fn format_wipes_existing_contents() {
    let mut store = formatted_store(8, 512, KeySlot::NONE);
    store.store("keep?", b"no", false, &admin()).unwrap();

    store
        .format(
            StoreParams {
                object_count: 8,
                object_size: 512,
                encryption_key_slot: KeySlot::NONE,
            },
            &admin(),
        )
        .unwrap();

    assert!(store.list().unwrap().is_empty());
    audit_invariants(&store.fsck().unwrap());
}

#[test]
fn format_rejects_bad_geometry() {
    let mut store = TokenStore::new(EmulatedToken::new(), SlotLayout::reference());

    for params in [
        StoreParams {
            object_count: 0,
            object_size: 512,
            encryption_key_slot: KeySlot::NONE,
        },
        StoreParams {
            object_count: 17,
            object_size: 512,
            encryption_key_slot: KeySlot::NONE,
        },
        StoreParams {
            object_count: 8,
            object_size: 511,
            encryption_key_slot: KeySlot::NONE,
        },
        StoreParams {
            object_count: 8,
            object_size: 3053,
            encryption_key_slot: KeySlot::NONE,
        },
    ] {
        assert!(store.format(params, &admin()).is_err());
    }
}

#[test]
fn wrong_management_key_is_an_auth_error() {
    let mut store = formatted_store(8, 512, KeySlot::NONE);

    let bad = fob_core::ManagementKey::Key(vec![0u8; 24]);
    assert!(matches!(
        store.store("a", b"x", false, &bad),
        Err(StoreError::Auth)
    ));
    // Nothing was written.
    assert!(store.list().unwrap().is_empty());
}

#[test]
fn empty_payload_roundtrip() {
    let mut store = formatted_store(8, 512, KeySlot::NONE);
    store.store("empty", b"", false, &admin()).unwrap();

    let entries = store.list().unwrap();
    assert_eq!(entries[0].size, 0);
    assert_eq!(entries[0].chunks, 1);
    assert_eq!(store.fetch("empty", None).unwrap(), Vec::<u8>::new());
    audit_invariants(&store.fsck().unwrap());
}

#[test]
fn longest_name_roundtrip() {
    let mut store = formatted_store(8, 512, KeySlot::NONE);
    let name = "n".repeat(255);
    store.store(&name, b"payload", false, &admin()).unwrap();
    assert_eq!(store.fetch(&name, None).unwrap(), b"payload");
    audit_invariants(&store.fsck().unwrap());
}

#[test]
fn list_is_sorted_by_name() {
    let mut store = formatted_store(12, 512, KeySlot::NONE);
    for name in ["zeta", "alpha", "mid"] {
        store.store(name, b"x", false, &admin()).unwrap();
    }

    let names: Vec<String> = store.list().unwrap().into_iter().map(|e| e.name).collect();
    assert_eq!(names, vec!["alpha", "mid", "zeta"]);
}

#[test]
fn public_key_matches_generated_key() {
    let mut store = formatted_store(8, 512, KeySlot(0x9e));
    let point = store.public_key(KeySlot(0x9e)).unwrap();
    assert_eq!(point.len(), 65);
    assert_eq!(point[0], 0x04);

    assert!(matches!(
        store.public_key(KeySlot(0x9a)),
        Err(StoreError::Device(_))
    ));
}

#[test]
fn store_survives_reload_across_sessions() {
    let mut store = formatted_store(12, 3052, KeySlot::NONE);
    store.store("persist", b"still here", false, &admin()).unwrap();

    // A new session against the same token sees the same store.
    let token = store.into_device();
    let mut second = TokenStore::new(token, SlotLayout::reference());
    assert_eq!(second.fetch("persist", None).unwrap(), b"still here");
}
