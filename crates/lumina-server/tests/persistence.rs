//! Store laws, checked against the real file-backed store.
//!
//! The property test drives arbitrary push sequences and verifies the
//! counter invariants plus a full save/reopen cycle, simulating server
//! restarts the way the crash recovery tests in the transport layer do for
//! sessions.

use bytes::Bytes;
use lumina_proto::{FuncMd, Metadata, Signature};
use lumina_server::Store;
use proptest::prelude::*;
use tempfile::tempdir;

fn func_md(name: &str, sig_bytes: &[u8]) -> FuncMd {
    FuncMd {
        metadata: Metadata {
            func_name: name.to_string(),
            func_size: name.len() as u32,
            serialized_data: Bytes::copy_from_slice(name.as_bytes()),
        },
        signature: Signature { version: 1, bytes: Bytes::copy_from_slice(sig_bytes) },
    }
}

fn signature(sig_bytes: &[u8]) -> Signature {
    Signature { version: 1, bytes: Bytes::copy_from_slice(sig_bytes) }
}

/// Push sequences over a small signature alphabet so collisions are common.
fn arbitrary_pushes() -> impl Strategy<Value = Vec<(u8, String)>> {
    prop::collection::vec((0u8..6, "[a-z]{1,12}"), 1..40)
}

proptest! {
    // File-backed stores are slower than pure data structures; keep the
    // case count civil.
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn push_pull_and_reload_obey_the_counter_laws(pushes in arbitrary_pushes()) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("laws.db");

        let store = Store::open(&path).unwrap();
        let mut expected: std::collections::HashMap<u8, Vec<String>> =
            std::collections::HashMap::new();

        for (sig, name) in &pushes {
            let newly_inserted = store.push(&func_md(name, &[*sig]));

            // push returns true exactly when the signature was absent
            prop_assert_eq!(newly_inserted, !expected.contains_key(sig));
            expected.entry(*sig).or_default().push(name.clone());
        }

        prop_assert_eq!(store.signature_count(), expected.len());

        // pull sees the most recent push and the accumulated popularity
        for (sig, names) in &expected {
            let info = store.pull(&signature(&[*sig])).unwrap();
            prop_assert_eq!(&info.metadata.func_name, names.last().unwrap());
            prop_assert_eq!(info.popularity as usize, names.len());
        }

        // pull misses exactly the signatures never pushed
        for sig in 0u8..6 {
            prop_assert_eq!(store.pull(&signature(&[sig])).is_some(), expected.contains_key(&sig));
        }

        // save/reopen preserves keys, per-key order and popularity
        store.close(true).unwrap();
        let reopened = Store::open(&path).unwrap();

        prop_assert_eq!(reopened.signature_count(), expected.len());
        for (sig, names) in &expected {
            let info = reopened.pull(&signature(&[*sig])).unwrap();
            prop_assert_eq!(&info.metadata.func_name, names.last().unwrap());
            prop_assert_eq!(info.popularity as usize, names.len());
        }
    }
}

#[test]
fn repeated_save_load_cycles_are_stable() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cycles.db");

    {
        let store = Store::open(&path).unwrap();
        store.push(&func_md("alpha", b"\x01"));
        store.push(&func_md("beta", b"\x01"));
        store.close(true).unwrap();
    }

    // Load and save twice without mutating; nothing may drift
    for _ in 0..2 {
        let store = Store::open(&path).unwrap();
        assert_eq!(store.signature_count(), 1);
        store.close(true).unwrap();
    }

    let store = Store::open(&path).unwrap();
    let info = store.pull(&signature(b"\x01")).unwrap();
    assert_eq!(info.metadata.func_name, "beta");
    assert_eq!(info.popularity, 2);
}

#[test]
fn save_failure_leaves_memory_intact() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("subdir").join("unwritable.db");

    // Opening under a missing directory fails up front
    assert!(Store::open(&path).is_err());

    // A store whose directory disappears can still serve from memory
    let live_dir = tempdir().unwrap();
    let live_path = live_dir.path().join("live.db");
    let store = Store::open(&live_path).unwrap();
    store.push(&func_md("gamma", b"\x02"));

    drop(live_dir);
    assert!(store.save().is_err());

    // In-memory contents are untouched by the failed save
    let info = store.pull(&signature(b"\x02")).unwrap();
    assert_eq!(info.metadata.func_name, "gamma");
    assert_eq!(info.popularity, 1);
}
