//! Runtime error type.
//!
//! Engine failures pass through unchanged so callers can still tell an
//! invariant violation from an unresolvable reference or a hash mismatch.

use std::io;

use thiserror::Error;

use realm_engine::EngineError;

use crate::snapshot_codec::SnapshotError;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A log frame or protobuf message could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The step log rejected an append.
    #[error("Step log error: {0}")]
    StepLog(String),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("Determinism failure: {0}")]
    Determinism(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Session lock poisoned")]
    LockPoisoned,
}

impl From<prost::DecodeError> for RuntimeError {
    fn from(err: prost::DecodeError) -> Self {
        RuntimeError::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
