/// RealmEngine v1 — Error Taxonomy
///
/// Every failure is local to one execution step. The step that raised it
/// is discarded wholesale; nothing is retried here.

use thiserror::Error;

use crate::domain::ObjectId;
use crate::value::NodeId;

/// Errors raised while applying mutations or committing a step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Engine bug: the object graph broke one of its structural invariants.
    #[error("Invariant violation: [INVARIANT:{check}] {detail}")]
    InvariantViolation {
        /// Short tag naming the violated invariant.
        check: &'static str,
        /// Human-readable description.
        detail: String,
    },

    /// A reference slot points at a node or identity with no object behind it.
    #[error("Unresolvable reference: {0}")]
    UnresolvableReference(String),

    /// A replica recomputed a different content hash for the same identity.
    #[error("Hash mismatch for {id}: expected {expected}, got {actual}")]
    HashMismatch {
        id: ObjectId,
        expected: String,
        actual: String,
    },

    /// The mutation stream named a node handle the store does not hold.
    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    /// The mutation stream addressed a slot past the end of a field list.
    #[error("Slot {slot} out of range for {node} ({len} fields)")]
    SlotOutOfRange { node: NodeId, slot: usize, len: usize },

    /// A field value does not fit the field's type tag.
    #[error("Type mismatch at {node}[{slot}]: tag {tag} cannot hold {value}")]
    TypeMismatch {
        node: NodeId,
        slot: usize,
        tag: String,
        value: String,
    },

    /// A detach was requested on a slot that does not own its value.
    #[error("Slot {node}[{slot}] does not own a composite value")]
    NotOwningSlot { node: NodeId, slot: usize },

    /// Attaching would make a value (transitively) own itself.
    #[error("Ownership cycle: attaching {value} under {owner} would close a cycle")]
    OwnershipCycle { owner: NodeId, value: NodeId },

    /// Composite links must go through attach/add_reference, not plain writes.
    #[error("Invalid field write at {node}[{slot}]: {reason}")]
    InvalidField {
        node: NodeId,
        slot: usize,
        reason: String,
    },

    /// A root name was bound twice or unbound while free.
    #[error("Root binding error: {0}")]
    RootBinding(String),

    /// A monotonic counter overflowed.
    #[error("Counter overflow: {0}")]
    Overflow(&'static str),
}

impl EngineError {
    /// Shorthand for an invariant violation with a formatted detail.
    pub fn invariant(check: &'static str, detail: impl Into<String>) -> Self {
        EngineError::InvariantViolation {
            check,
            detail: detail.into(),
        }
    }

    /// True for the failure classes that indicate an engine bug or replica
    /// divergence rather than a malformed mutation stream.
    pub fn is_fatal_fault(&self) -> bool {
        matches!(
            self,
            EngineError::InvariantViolation { .. }
                | EngineError::UnresolvableReference(_)
                | EngineError::HashMismatch { .. }
        )
    }
}

/// Result alias used across the engine.
pub type Result<T> = std::result::Result<T, EngineError>;
