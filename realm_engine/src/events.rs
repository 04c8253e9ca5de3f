/// RealmEngine v1 — Mutation Events
///
/// Events are pure data: the (owner, slot, value) attach/detach and
/// (slot, value) reference add/remove stream produced by program
/// execution, plus allocation, root binding and primitive writes. They
/// carry no transition logic.
///
/// Node handles are assigned sequentially by `Alloc`, so a recorded
/// stream replays onto the same handles.

use serde::{Deserialize, Serialize};

use crate::value::{CompositeKind, Field, NodeId, Value};

/// Schema version for v1 step envelopes. Hardcoded, never changes.
pub const SCHEMA_VERSION: u32 = 1;

/// One mutation within a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MutationEvent {
    /// New unattached composite. Fields may not hold composite references.
    Alloc {
        kind: CompositeKind,
        fields: Vec<Field>,
    },
    BindRoot {
        name: String,
        value: NodeId,
    },
    UnbindRoot {
        name: String,
    },
    Attach {
        owner: NodeId,
        slot: usize,
        value: NodeId,
    },
    Detach {
        owner: NodeId,
        slot: usize,
    },
    AddReference {
        from: NodeId,
        slot: usize,
        value: NodeId,
    },
    RemoveReference {
        from: NodeId,
        slot: usize,
    },
    SetValue {
        node: NodeId,
        slot: usize,
        value: Value,
    },
}

impl MutationEvent {
    /// Wire name, matching the serde `op` tag.
    pub fn op(&self) -> &'static str {
        match self {
            MutationEvent::Alloc { .. } => "alloc",
            MutationEvent::BindRoot { .. } => "bind_root",
            MutationEvent::UnbindRoot { .. } => "unbind_root",
            MutationEvent::Attach { .. } => "attach",
            MutationEvent::Detach { .. } => "detach",
            MutationEvent::AddReference { .. } => "add_reference",
            MutationEvent::RemoveReference { .. } => "remove_reference",
            MutationEvent::SetValue { .. } => "set_value",
        }
    }
}

/// All mutations of one execution step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEnvelope {
    pub schema_version: u32,
    pub step: u64,
    pub events: Vec<MutationEvent>,
}

impl StepEnvelope {
    pub fn new(step: u64, events: Vec<MutationEvent>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            step,
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::TypeTag;

    #[test]
    fn events_serialize_with_op_tag() {
        let ev = MutationEvent::Attach {
            owner: NodeId(1),
            slot: 0,
            value: NodeId(2),
        };
        let text = serde_json::to_string(&ev).unwrap();
        assert_eq!(text, r#"{"op":"attach","owner":1,"slot":0,"value":2}"#);
        assert_eq!(ev.op(), "attach");
        let back: MutationEvent = serde_json::from_str(&text).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn alloc_fields_carry_type_tags_as_text() {
        let ev = MutationEvent::Alloc {
            kind: CompositeKind::Struct,
            fields: vec![Field::new(TypeTag::pointer_to(TypeTag::named("Node")), Value::Nil)],
        };
        let text = serde_json::to_string(&ev).unwrap();
        assert!(text.contains(r##""tag":"*#Node""##));
    }

    #[test]
    fn envelope_defaults_to_current_schema() {
        let env = StepEnvelope::new(4, vec![]);
        assert_eq!(env.schema_version, SCHEMA_VERSION);
        assert_eq!(env.step, 4);
    }
}
