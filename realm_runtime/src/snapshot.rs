//! Snapshot layer — deterministic store snapshots.
//!
//! Snapshots contain the codec's JSON plus two digests: the file digest of
//! that JSON and the engine's `store_hash` of the committed object view.
//! No timestamps in snapshot content (determinism).
//!
//! If a snapshot fails verification, the session falls back to full replay.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use realm_engine::hashing::{sha256_hex, store_hash};
use realm_engine::{RealmStore, ENGINE_VERSION};

use crate::error::Result;
use crate::snapshot_codec::{encode_snapshot, restore_snapshot, SnapshotError};

/// Snapshot on-disk format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Snapshot {
    /// Step at which this snapshot was taken.
    pub step: u64,
    /// Codec JSON of the store (UTF-8).
    pub canonical_json: String,
    /// SHA-256 of `canonical_json`.
    pub hash: String,
    /// `store_hash` of the store at snapshot time.
    pub store_hash: String,
    /// Engine version at snapshot time.
    pub engine_version: u32,
}

fn snapshot_path(dir: &Path, step: u64) -> PathBuf {
    dir.join(format!("snapshot_{:06}.json", step))
}

impl Snapshot {
    /// Build an in-memory snapshot of a committed store.
    pub fn capture(store: &RealmStore) -> Result<Self> {
        let canonical_json = encode_snapshot(store)?;
        let hash = sha256_hex(canonical_json.as_bytes());
        Ok(Self {
            step: store.step,
            canonical_json,
            hash,
            store_hash: store_hash(store)?,
            engine_version: ENGINE_VERSION,
        })
    }

    /// Verify both digests and the engine invariants, then hand back the
    /// store.
    pub fn restore(&self) -> Result<RealmStore> {
        if !verify_snapshot_hash(self) {
            return Err(SnapshotError::DigestMismatch {
                expected: self.hash.clone(),
                computed: sha256_hex(self.canonical_json.as_bytes()),
            }
            .into());
        }
        if self.engine_version != ENGINE_VERSION {
            return Err(SnapshotError::InvariantViolation(format!(
                "snapshot written by engine v{}, running v{}",
                self.engine_version, ENGINE_VERSION
            ))
            .into());
        }
        let store = restore_snapshot(&self.canonical_json)?;
        if store.step != self.step {
            return Err(SnapshotError::InvariantViolation(format!(
                "snapshot labelled step {} holds step {}",
                self.step, store.step
            ))
            .into());
        }
        let computed = store_hash(&store)?;
        if computed != self.store_hash {
            return Err(SnapshotError::DigestMismatch {
                expected: self.store_hash.clone(),
                computed,
            }
            .into());
        }
        Ok(store)
    }
}

/// Save a deterministic snapshot of a committed store.
pub fn save_snapshot(dir: &Path, store: &RealmStore) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;

    let snap = Snapshot::capture(store)?;
    let path = snapshot_path(dir, snap.step);
    let content = serde_json::to_string(&snap)?;

    let mut file = File::create(&path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;

    debug!(step = snap.step, path = %path.display(), "snapshot saved");
    Ok(path)
}

/// Load the snapshot taken at `step`, if there is one.
pub fn load_snapshot(dir: &Path, step: u64) -> Result<Option<Snapshot>> {
    let path = snapshot_path(dir, step);
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(&path)?;
    let snap: Snapshot = serde_json::from_str(&content)
        .map_err(|e| SnapshotError::DeserializationError(format!("Bad snapshot: {}", e)))?;
    Ok(Some(snap))
}

/// Step numbers of every snapshot in `dir`, ascending.
pub fn list_snapshots(dir: &Path) -> Result<Vec<u64>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut steps = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if let Some(step) = name_str
            .strip_prefix("snapshot_")
            .and_then(|s| s.strip_suffix(".json"))
            .and_then(|s| s.parse::<u64>().ok())
        {
            steps.push(step);
        }
    }
    steps.sort_unstable();
    Ok(steps)
}

/// Load the latest snapshot in a directory.
pub fn load_latest_snapshot(dir: &Path) -> Result<Option<Snapshot>> {
    match list_snapshots(dir)?.last() {
        Some(step) => load_snapshot(dir, *step),
        None => Ok(None),
    }
}

/// Returns true if the file digest matches the canonical JSON content.
pub fn verify_snapshot_hash(snap: &Snapshot) -> bool {
    sha256_hex(snap.canonical_json.as_bytes()) == snap.hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;
    use realm_engine::{CompositeKind, Engine, Field};

    fn committed_store() -> RealmStore {
        let mut engine = Engine::new("gno.land/r/snapshots");
        let mut step = engine.begin_step();
        let a = step
            .alloc(CompositeKind::Struct, vec![Field::nil_pointer("V")])
            .unwrap();
        step.bind_root("a", a).unwrap();
        let v = step.alloc(CompositeKind::Struct, vec![Field::int(7)]).unwrap();
        step.attach(a, 0, v).unwrap();
        step.commit().unwrap();
        engine.into_store()
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("realm_snapshot_tests").join(name);
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn save_then_load_latest() {
        let dir = scratch("latest");
        let store = committed_store();
        save_snapshot(&dir, &store).unwrap();
        let snap = load_latest_snapshot(&dir).unwrap().unwrap();
        assert_eq!(snap.step, 1);
        assert_eq!(snap.engine_version, ENGINE_VERSION);
        assert!(verify_snapshot_hash(&snap));
        assert_eq!(snap.restore().unwrap(), store);
    }

    #[test]
    fn missing_snapshot_is_none() {
        let dir = scratch("missing");
        assert!(load_snapshot(&dir, 5).unwrap().is_none());
        assert!(load_latest_snapshot(&dir).unwrap().is_none());
    }

    #[test]
    fn tampered_json_fails_digest() {
        let mut snap = Snapshot::capture(&committed_store()).unwrap();
        snap.canonical_json = snap.canonical_json.replace("\"step\":1", "\"step\":2");
        assert!(!verify_snapshot_hash(&snap));
        assert!(matches!(
            snap.restore().unwrap_err(),
            RuntimeError::Snapshot(SnapshotError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn wrong_store_hash_is_rejected() {
        let mut snap = Snapshot::capture(&committed_store()).unwrap();
        snap.store_hash = "0".repeat(64);
        assert!(matches!(
            snap.restore().unwrap_err(),
            RuntimeError::Snapshot(SnapshotError::DigestMismatch { .. })
        ));
    }
}
