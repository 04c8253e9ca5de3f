#![forbid(unsafe_code)]

/// RealmEngine v1. The canonical encoding is frozen per version; any
/// change to hashing or record shape requires a version bump.
pub const ENGINE_VERSION: u32 = 1;

pub mod arithmetic;
pub mod error;
pub mod value;
pub mod domain;
pub mod identity;
pub mod state;
pub mod graph;
pub mod hashing;
pub mod modtime;
pub mod ownership;
pub mod escape;
pub mod changeset;
pub mod events;
pub mod transitions;
pub mod invariants;
pub mod engine;

pub use changeset::{Changeset, ObjectRecord, RecordBody, RecordKind};
pub use domain::{Hashlet, Holder, ObjectId, ObjectInfo, RealmId};
pub use engine::{Engine, EngineConfig, Step};
pub use error::{EngineError, Result};
pub use events::{MutationEvent, StepEnvelope};
pub use state::RealmStore;
pub use value::{CompositeKind, Field, NodeId, TypeTag, Value};
