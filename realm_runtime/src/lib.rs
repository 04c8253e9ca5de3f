#![forbid(unsafe_code)]

//! RealmEngine v1 — Rust Runtime
//!
//! Wraps the realm engine with persistence, replay, snapshots, a replica
//! object table, session management, and drift detection.
//!
//! No ownership logic lives here. Every mutation, hash and invariant is
//! delegated to the engine.

pub mod config;
pub mod drift;
pub mod error;
pub mod object_table;
pub mod proto_bridge;
pub mod proto_types;
pub mod replay;
pub mod session;
pub mod snapshot;
pub mod snapshot_codec;
pub mod step_log;

pub use config::RuntimeConfig;
pub use error::{Result, RuntimeError};
pub use session::{Session, SharedSession};
