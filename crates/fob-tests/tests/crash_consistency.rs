//! Interruption safety: every prefix of a write sequence must sanitize to a
//! well-defined state on the next load.

use std::collections::BTreeMap;

use fob_core::KeySlot;
use fob_device::EmulatedToken;
use fob_store::{StoreError, TokenStore};
use fob_tests::{admin, audit_invariants, formatted_store, Op, OpGenerator, ReferenceFs};

/// Snapshot of the store as seen through `list` + `fetch`.
fn snapshot(store: &mut TokenStore<EmulatedToken>) -> BTreeMap<String, Vec<u8>> {
    store
        .list()
        .unwrap()
        .into_iter()
        .map(|entry| {
            let payload = store.fetch(&entry.name, None).unwrap();
            (entry.name, payload)
        })
        .collect()
}

fn reference_map(fs: &ReferenceFs) -> BTreeMap<String, Vec<u8>> {
    fs.names()
        .into_iter()
        .map(|name| {
            let payload = fs.fetch(&name).unwrap().to_vec();
            (name, payload)
        })
        .collect()
}

/// Builds the fixed starting point for the prefix-replay tests: a store with
/// one small and one multi-chunk blob already committed.
fn seeded_store() -> TokenStore<EmulatedToken> {
    let mut store = formatted_store(12, 512, KeySlot::NONE);
    store.store("small", b"tiny payload", false, &admin()).unwrap();
    let big: Vec<u8> = (0..2000u32).map(|i| (i % 256) as u8).collect();
    store.store("large", &big, false, &admin()).unwrap();
    store
}

/// Runs `op` against a fresh seeded store with an ejection armed after
/// `prefix` writes. Returns the post-reinsert snapshot, or `None` when the
/// operation completed before the armed ejection fired.
fn replay_prefix(
    op: impl Fn(&mut TokenStore<EmulatedToken>) -> Result<(), StoreError>,
    prefix: usize,
) -> Option<BTreeMap<String, Vec<u8>>> {
    let mut store = seeded_store();
    store.device_mut().eject_after(prefix);

    match op(&mut store) {
        Err(StoreError::Device(_)) => {
            store.device_mut().reinsert();
            let observed = snapshot(&mut store);

            // The raw image may hold orphans until a mutating operation
            // syncs the repairs; after one, it must audit clean again.
            store.store("probe", b"probe", false, &admin()).unwrap();
            store.remove("probe", &admin()).unwrap();
            audit_invariants(&store.fsck().unwrap());

            Some(observed)
        }
        Ok(()) => None,
        Err(other) => panic!("unexpected failure: {other:?}"),
    }
}

#[test]
fn interrupted_new_store_is_all_or_nothing() {
    // Without interruption, record the before and after states.
    let mut store = seeded_store();
    let before = snapshot(&mut store);
    let payload: Vec<u8> = (0..1500u32).map(|i| (i * 7 % 256) as u8).collect();
    store.store("incoming", &payload, false, &admin()).unwrap();
    let after = snapshot(&mut store);
    assert_ne!(before, after);

    for prefix in 0..32 {
        let Some(observed) = replay_prefix(
            |store| store.store("incoming", &payload, false, &admin()),
            prefix,
        ) else {
            // The operation needs fewer writes than this prefix; every
            // longer prefix completes too.
            return;
        };
        assert!(
            observed == before || observed == after,
            "prefix {prefix}: intermediate state leaked: {:?}",
            observed.keys()
        );
    }
    panic!("armed ejection never let the operation finish");
}

#[test]
fn interrupted_remove_completes_or_never_happened() {
    let mut store = seeded_store();
    let before = snapshot(&mut store);
    store.remove("large", &admin()).unwrap();
    let after = snapshot(&mut store);

    for prefix in 0..32 {
        let Some(observed) =
            replay_prefix(|store| store.remove("large", &admin()), prefix)
        else {
            return;
        };
        assert!(
            observed == before || observed == after,
            "prefix {prefix}: remove left an intermediate state"
        );
    }
    panic!("armed ejection never let the operation finish");
}

#[test]
fn interrupted_replacing_store_may_lose_both() {
    // Replacing reuses the old chain's slots; an interruption may lose the
    // old and the new version at once. The name must still never resolve to
    // a torn payload.
    let mut store = seeded_store();
    let before = snapshot(&mut store);
    let replacement: Vec<u8> = (0..1800u32).map(|i| (i * 3 % 256) as u8).collect();
    store.store("large", &replacement, false, &admin()).unwrap();
    let after = snapshot(&mut store);

    for prefix in 0..32 {
        let Some(observed) = replay_prefix(
            |store| store.store("large", &replacement, false, &admin()),
            prefix,
        ) else {
            return;
        };

        let mut both_lost = before.clone();
        both_lost.remove("large");
        assert!(
            observed == before || observed == after || observed == both_lost,
            "prefix {prefix}: replace left an intermediate state"
        );
    }
    panic!("armed ejection never let the operation finish");
}

#[test]
fn ejection_fuzz_matches_reference_filesystem() {
    let mut store = formatted_store(12, 512, KeySlot::NONE);
    store.device_mut().set_ejection_probability(0.01);

    let mut generator = OpGenerator::new(42, 8, 3000);
    let mut reference = ReferenceFs::new();
    let mut ejections = 0usize;
    // Set while crash repairs are pending on the device; the raw image only
    // audits clean once a mutating operation has synced them.
    let mut needs_repair_sync = false;

    for step in 0..10_000 {
        let op = generator.next_op();
        match &op {
            Op::Store { name, payload } => {
                let existed = reference.fetch(name).is_some();
                match store.store(name, payload, false, &admin()) {
                    Ok(()) => {
                        reference.store(name, payload.clone());
                        needs_repair_sync = false;
                    }
                    Err(StoreError::StoreFull) => {
                        // Reference unchanged; the store must be too.
                    }
                    Err(StoreError::Device(_)) => {
                        ejections += 1;
                        needs_repair_sync = true;
                        store.device_mut().reinsert();

                        let observed = snapshot(&mut store);
                        let before = reference_map(&reference);
                        let mut with_new = reference.clone();
                        with_new.store(name, payload.clone());
                        let after = reference_map(&with_new);

                        if observed == after {
                            reference = with_new;
                        } else if observed == before {
                            // Nothing landed.
                        } else if existed {
                            // Replace window: both versions gone is legal.
                            let mut both_lost = reference.clone();
                            both_lost.remove(name);
                            assert_eq!(
                                observed,
                                reference_map(&both_lost),
                                "step {step}: torn replace"
                            );
                            reference = both_lost;
                        } else {
                            panic!("step {step}: state matches neither side of the store");
                        }
                    }
                    Err(other) => panic!("step {step}: unexpected error {other:?}"),
                }
            }
            Op::Remove { name } => match store.remove(name, &admin()) {
                Ok(()) => {
                    assert!(reference.remove(name), "step {step}: removed a ghost");
                    needs_repair_sync = false;
                }
                Err(StoreError::NotFound(_)) => {
                    assert!(reference.fetch(name).is_none(), "step {step}");
                }
                Err(StoreError::Device(_)) => {
                    ejections += 1;
                    needs_repair_sync = true;
                    store.device_mut().reinsert();

                    let observed = snapshot(&mut store);
                    let before = reference_map(&reference);
                    let mut removed = reference.clone();
                    removed.remove(name);

                    if observed == reference_map(&removed) {
                        reference = removed;
                    } else {
                        assert_eq!(observed, before, "step {step}: torn remove");
                    }
                }
                Err(other) => panic!("step {step}: unexpected error {other:?}"),
            },
            Op::Fetch { name } => match (store.fetch(name, None), reference.fetch(name)) {
                (Ok(payload), Some(expected)) => {
                    assert_eq!(payload, expected, "step {step}: payload mismatch")
                }
                (Err(StoreError::NotFound(_)), None) => {}
                (result, expected) => panic!(
                    "step {step}: fetch disagreement: {:?} vs expected {:?}",
                    result.map(|p| p.len()),
                    expected.map(<[u8]>::len)
                ),
            },
            Op::List => {
                let names: Vec<String> =
                    store.list().unwrap().into_iter().map(|e| e.name).collect();
                assert_eq!(names, reference.names(), "step {step}: listing diverged");
            }
        }

        if step % 1000 == 0 && !needs_repair_sync {
            audit_invariants(&store.fsck().unwrap());
        }
    }

    assert!(ejections > 0, "fuzz never exercised an ejection");
}
