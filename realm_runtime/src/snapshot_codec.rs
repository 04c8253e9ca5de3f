//! Snapshot Codec — deterministic RealmStore encoder/decoder.
//!
//! Pure codec layer. No side-effects, no timestamps, no envelope.
//!
//! - `encode_snapshot`:  RealmStore → canonical JSON string
//! - `decode_snapshot`:  JSON string → RealmStore (strict, no defaults)
//! - `restore_snapshot`: decode + invariant validation
//! - `export_snapshot_to_file` / `import_snapshot_from_file`: file I/O
//! - `snapshot_hash`:    SHA-256 of canonical JSON (lowercase hex)

use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

use realm_engine::hashing::sha256_hex;
use realm_engine::invariants::validate_invariants;
use realm_engine::RealmStore;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// All possible snapshot codec failures.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// JSON serialization failed.
    #[error("SerializationError: {0}")]
    SerializationError(String),
    /// JSON deserialization failed (malformed, missing fields, unknown fields).
    #[error("DeserializationError: {0}")]
    DeserializationError(String),
    /// Loaded store violates engine invariants.
    #[error("InvariantViolation: {0}")]
    InvariantViolation(String),
    /// Snapshot digest does not match its content.
    #[error("DigestMismatch: expected {expected}, computed {computed}")]
    DigestMismatch { expected: String, computed: String },
    /// File I/O error.
    #[error("IoError: {0}")]
    IoError(String),
}

impl From<io::Error> for SnapshotError {
    fn from(err: io::Error) -> Self {
        SnapshotError::IoError(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Encode a RealmStore to a canonical JSON string.
///
/// BTreeMaps keep node, root and identity keys sorted. No whitespace,
/// no timestamps, deterministic output.
pub fn encode_snapshot(store: &RealmStore) -> Result<String, SnapshotError> {
    serde_json::to_string(store).map_err(|e| SnapshotError::SerializationError(e.to_string()))
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Decode a JSON string into a RealmStore.
///
/// Strict: unknown fields are rejected and missing fields fail. No
/// invariant validation; use `restore_snapshot` for validated loading.
pub fn decode_snapshot(json: &str) -> Result<RealmStore, SnapshotError> {
    serde_json::from_str::<RealmStore>(json)
        .map_err(|e| SnapshotError::DeserializationError(e.to_string()))
}

// ---------------------------------------------------------------------------
// Restore (decode + validate)
// ---------------------------------------------------------------------------

/// Decode a JSON string and validate invariants immediately.
///
/// This is the safe entry point for loading a store from untrusted sources.
pub fn restore_snapshot(json: &str) -> Result<RealmStore, SnapshotError> {
    let store = decode_snapshot(json)?;
    validate_invariants(&store).map_err(|e| SnapshotError::InvariantViolation(e.to_string()))?;
    Ok(store)
}

// ---------------------------------------------------------------------------
// File I/O
// ---------------------------------------------------------------------------

/// Export a RealmStore to a file as canonical JSON.
pub fn export_snapshot_to_file(store: &RealmStore, path: &Path) -> Result<(), SnapshotError> {
    let json = encode_snapshot(store)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, json.as_bytes())?;
    Ok(())
}

/// Import a RealmStore from a JSON file, validating invariants.
pub fn import_snapshot_from_file(path: &Path) -> Result<RealmStore, SnapshotError> {
    let content = fs::read_to_string(path)?;
    restore_snapshot(&content)
}

// ---------------------------------------------------------------------------
// Hash
// ---------------------------------------------------------------------------

/// SHA-256 of the serde JSON encoding. Lowercase hex string.
///
/// NOTE: This is a file-integrity digest, NOT `hashing::store_hash`
/// (which covers only the committed object view and binds the engine
/// version).
pub fn snapshot_hash(store: &RealmStore) -> Result<String, SnapshotError> {
    Ok(sha256_hex(encode_snapshot(store)?.as_bytes()))
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
