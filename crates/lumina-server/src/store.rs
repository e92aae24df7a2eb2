//! Signature-keyed metadata store.
//!
//! One map from raw signature bytes to everything ever pushed under them.
//! The canonical key is the signature's byte string itself, compared
//! byte-for-byte; the version tag rides along on the wire but is not part
//! of the key. No deduplication and no merging: every accepted push appends
//! its metadata and bumps the popularity counter, so `popularity` always
//! equals the number of stored entries for a key.
//!
//! Persistence is a whole-file snapshot: a versioned CBOR document written
//! to a sibling temporary file, fsynced, then renamed over the target. A
//! reader therefore sees either the previous snapshot or the new one, never
//! a torn write. A zero-byte file is a valid empty store.

use std::{
    collections::HashMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
};

use bytes::Bytes;
use lumina_proto::{FuncInfo, FuncMd, Metadata, SIGNATURE_VERSION, Signature};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Bumped when the snapshot document changes shape.
const SNAPSHOT_VERSION: u32 = 1;

/// On-disk document root.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    entries: Vec<SnapshotEntry>,
}

/// One signature key with its accumulated pushes, in push order.
#[derive(Serialize, Deserialize)]
struct SnapshotEntry {
    signature: Bytes,
    metadata: Vec<Metadata>,
    popularity: u32,
}

#[derive(Debug, Default)]
struct StoreEntry {
    /// Every pushed metadata in insertion order
    entries: Vec<Metadata>,
    /// Number of pushes accepted for this key
    popularity: u32,
}

/// Shared, signature-keyed metadata store.
///
/// Clones share the same underlying map (the inner state is behind an
/// `Arc`), so every session handler works against one store. A single
/// reader-writer lock guards the whole map: pushes are small appends and
/// pulls are one hash lookup, so finer striping buys nothing here.
///
/// Lock poisoning is recovered by taking the inner value: mutations build
/// their entry before touching the map, so a panicking thread cannot leave
/// it structurally invalid.
#[derive(Clone)]
pub struct Store {
    inner: Arc<RwLock<HashMap<Bytes, StoreEntry>>>,
    path: Arc<PathBuf>,
}

impl Store {
    /// Open a store file, creating it empty if absent.
    ///
    /// The whole file is parsed up front; a snapshot that does not parse is
    /// fatal and nothing of it is served.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let map = load_snapshot(&path)?;

        tracing::info!(path = %path.display(), signatures = map.len(), "store loaded");

        Ok(Self { inner: Arc::new(RwLock::new(map)), path: Arc::new(path) })
    }

    /// Accept one pushed function.
    ///
    /// Returns `true` if the signature was absent beforehand, `false` if
    /// the push appended to an existing key. Either way the metadata is
    /// kept and the key's popularity increments.
    pub fn push(&self, func_md: &FuncMd) -> bool {
        warn_unsupported_version(&func_md.signature);

        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let entry = map.entry(func_md.signature.bytes.clone()).or_default();

        let new_signature = entry.entries.is_empty();
        entry.entries.push(func_md.metadata.clone());
        entry.popularity += 1;

        debug_assert_eq!(entry.popularity as usize, entry.entries.len());

        new_signature
    }

    /// Look up a signature.
    ///
    /// Returns the most recently pushed metadata for the key plus its
    /// popularity, or `None` if nothing was ever pushed under it. "Most
    /// recent" is the documented tie-break between colliding pushes.
    pub fn pull(&self, signature: &Signature) -> Option<FuncInfo> {
        warn_unsupported_version(signature);

        let map = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let entry = map.get(&signature.bytes)?;
        let metadata = entry.entries.last()?.clone();

        Some(FuncInfo { metadata, popularity: entry.popularity })
    }

    /// Number of distinct signature keys currently stored.
    pub fn signature_count(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Write the whole map to the backing file.
    ///
    /// Holds the write lock for the duration so the snapshot is a
    /// consistent cut; concurrent pushes simply queue behind it. On failure
    /// the in-memory map is untouched and the previous on-disk snapshot
    /// survives, so the caller may retry.
    pub fn save(&self) -> Result<(), StoreError> {
        let map = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        tracing::info!(path = %self.path.display(), signatures = map.len(), "saving store");
        write_snapshot(&self.path, &map)
    }

    /// Optionally save, then drop this handle's view of the store.
    pub fn close(&self, save: bool) -> Result<(), StoreError> {
        if save {
            self.save()?;
        }
        Ok(())
    }
}

fn warn_unsupported_version(signature: &Signature) {
    if signature.version != SIGNATURE_VERSION {
        tracing::warn!(
            version = signature.version,
            "unsupported signature version, results may be inconsistent"
        );
    }
}

fn load_snapshot(path: &Path) -> Result<HashMap<Bytes, StoreEntry>, StoreError> {
    let file = fs::OpenOptions::new().read(true).append(true).create(true).open(path)?;

    if file.metadata()?.len() == 0 {
        return Ok(HashMap::new());
    }

    let snapshot: Snapshot = ciborium::de::from_reader(io::BufReader::new(file))
        .map_err(|e| StoreError::Decode(e.to_string()))?;

    if snapshot.version != SNAPSHOT_VERSION {
        return Err(StoreError::UnsupportedVersion(snapshot.version));
    }

    let mut map = HashMap::with_capacity(snapshot.entries.len());
    for entry in snapshot.entries {
        map.insert(
            entry.signature,
            StoreEntry { entries: entry.metadata, popularity: entry.popularity },
        );
    }
    Ok(map)
}

fn write_snapshot(path: &Path, map: &HashMap<Bytes, StoreEntry>) -> Result<(), StoreError> {
    let snapshot = Snapshot {
        version: SNAPSHOT_VERSION,
        entries: map
            .iter()
            .map(|(signature, entry)| SnapshotEntry {
                signature: signature.clone(),
                metadata: entry.entries.clone(),
                popularity: entry.popularity,
            })
            .collect(),
    };

    // Write beside the target, then rename over it. The reader in
    // load_snapshot only ever sees a complete document.
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut file = fs::File::create(&tmp_path)?;
    ciborium::ser::into_writer(&snapshot, &mut file)
        .map_err(|e| StoreError::Encode(e.to_string()))?;
    file.flush()?;
    file.sync_all()?;

    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn func_md(name: &str, sig_bytes: &'static [u8]) -> FuncMd {
        FuncMd {
            metadata: Metadata {
                func_name: name.to_string(),
                func_size: 0x10,
                serialized_data: Bytes::from_static(&[1, 2, 3]),
            },
            signature: Signature { version: 1, bytes: Bytes::from_static(sig_bytes) },
        }
    }

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("test.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn missing_file_loads_empty() {
        let (_dir, store) = temp_store();
        assert_eq!(store.signature_count(), 0);
    }

    #[test]
    fn zero_byte_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.db");
        fs::File::create(&path).unwrap();

        let store = Store::open(&path).unwrap();
        assert_eq!(store.signature_count(), 0);
    }

    #[test]
    fn push_reports_new_signatures_only() {
        let (_dir, store) = temp_store();

        assert!(store.push(&func_md("f", b"\xAA\xBB")));
        assert!(!store.push(&func_md("f2", b"\xAA\xBB")));
        assert!(store.push(&func_md("g", b"\xCC\xDD")));

        assert_eq!(store.signature_count(), 2);
    }

    #[test]
    fn pull_returns_last_push_and_popularity() {
        let (_dir, store) = temp_store();

        store.push(&func_md("first", b"\xAA\xBB"));
        store.push(&func_md("second", b"\xAA\xBB"));

        let sig = Signature { version: 1, bytes: Bytes::from_static(b"\xAA\xBB") };
        let info = store.pull(&sig).unwrap();
        assert_eq!(info.metadata.func_name, "second");
        assert_eq!(info.popularity, 2);
    }

    #[test]
    fn pull_misses_unknown_signatures() {
        let (_dir, store) = temp_store();
        store.push(&func_md("f", b"\xAA\xBB"));

        let sig = Signature { version: 1, bytes: Bytes::from_static(b"\xCC\xDD") };
        assert!(store.pull(&sig).is_none());
    }

    #[test]
    fn signature_version_is_not_part_of_the_key() {
        let (_dir, store) = temp_store();
        store.push(&func_md("f", b"\xAA\xBB"));

        // Same bytes, different version: still a hit
        let sig = Signature { version: 9, bytes: Bytes::from_static(b"\xAA\xBB") };
        assert!(store.pull(&sig).is_some());
    }

    #[test]
    fn save_then_open_preserves_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("round.db");

        {
            let store = Store::open(&path).unwrap();
            store.push(&func_md("a", b"\x01"));
            store.push(&func_md("b", b"\x01"));
            store.push(&func_md("c", b"\x02"));
            store.close(true).unwrap();
        }

        let store = Store::open(&path).unwrap();
        assert_eq!(store.signature_count(), 2);

        let info = store
            .pull(&Signature { version: 1, bytes: Bytes::from_static(b"\x01") })
            .unwrap();
        assert_eq!(info.metadata.func_name, "b");
        assert_eq!(info.popularity, 2);
    }

    #[test]
    fn garbage_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.db");
        fs::write(&path, b"not a snapshot").unwrap();

        assert!(matches!(Store::open(&path), Err(StoreError::Decode(_))));
    }

    #[test]
    fn clones_share_state() {
        let (_dir, store) = temp_store();
        let clone = store.clone();

        store.push(&func_md("f", b"\xAA"));
        assert_eq!(clone.signature_count(), 1);
    }
}
