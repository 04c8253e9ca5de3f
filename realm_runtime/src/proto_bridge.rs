//! Proto ↔ engine conversion bridge.
//!
//! Converts between the protobuf wire types (proto_types.rs) and the
//! engine's `StepEnvelope`. Decoding is strict: a frame with a missing
//! oneof, an unparsable type tag or an out-of-range slot is rejected
//! rather than defaulted.

use realm_engine::{CompositeKind, Field, MutationEvent, NodeId, ObjectId, StepEnvelope, TypeTag, Value};
use realm_engine::Hashlet;

use crate::error::{Result, RuntimeError};
use crate::proto_types::*;

/// Convert a protobuf step to the engine's envelope.
pub fn proto_to_step(proto: &ProtoStepEnvelope) -> Result<StepEnvelope> {
    let events = proto
        .events
        .iter()
        .map(proto_to_event)
        .collect::<Result<Vec<_>>>()?;
    Ok(StepEnvelope {
        schema_version: proto.schema_version,
        step: proto.step,
        events,
    })
}

/// Convert an engine envelope to its protobuf form for the step log.
pub fn step_to_proto(step: &StepEnvelope) -> ProtoStepEnvelope {
    ProtoStepEnvelope {
        schema_version: step.schema_version,
        step: step.step,
        events: step.events.iter().map(event_to_proto).collect(),
    }
}

fn proto_to_event(proto: &ProtoMutation) -> Result<MutationEvent> {
    let kind = proto
        .kind
        .as_ref()
        .ok_or_else(|| RuntimeError::Decode("mutation has no kind".to_string()))?;
    let event = match kind {
        MutationKind::Alloc(a) => MutationEvent::Alloc {
            kind: a
                .kind
                .parse::<CompositeKind>()
                .map_err(RuntimeError::Decode)?,
            fields: a.fields.iter().map(proto_to_field).collect::<Result<_>>()?,
        },
        MutationKind::BindRoot(b) => MutationEvent::BindRoot {
            name: b.name.clone(),
            value: NodeId(b.value),
        },
        MutationKind::UnbindRoot(u) => MutationEvent::UnbindRoot {
            name: u.name.clone(),
        },
        MutationKind::Attach(a) => MutationEvent::Attach {
            owner: NodeId(a.owner),
            slot: slot(a.slot)?,
            value: NodeId(a.value),
        },
        MutationKind::Detach(d) => MutationEvent::Detach {
            owner: NodeId(d.owner),
            slot: slot(d.slot)?,
        },
        MutationKind::AddReference(a) => MutationEvent::AddReference {
            from: NodeId(a.from),
            slot: slot(a.slot)?,
            value: NodeId(a.value),
        },
        MutationKind::RemoveReference(r) => MutationEvent::RemoveReference {
            from: NodeId(r.from),
            slot: slot(r.slot)?,
        },
        MutationKind::SetValue(s) => MutationEvent::SetValue {
            node: NodeId(s.node),
            slot: slot(s.slot)?,
            value: proto_to_value(s.value.as_ref())?,
        },
    };
    Ok(event)
}

fn event_to_proto(event: &MutationEvent) -> ProtoMutation {
    let kind = match event {
        MutationEvent::Alloc { kind, fields } => MutationKind::Alloc(Alloc {
            kind: kind.as_str().to_string(),
            fields: fields.iter().map(field_to_proto).collect(),
        }),
        MutationEvent::BindRoot { name, value } => MutationKind::BindRoot(BindRoot {
            name: name.clone(),
            value: value.0,
        }),
        MutationEvent::UnbindRoot { name } => MutationKind::UnbindRoot(UnbindRoot { name: name.clone() }),
        MutationEvent::Attach { owner, slot, value } => MutationKind::Attach(Attach {
            owner: owner.0,
            slot: *slot as u64,
            value: value.0,
        }),
        MutationEvent::Detach { owner, slot } => MutationKind::Detach(Detach {
            owner: owner.0,
            slot: *slot as u64,
        }),
        MutationEvent::AddReference { from, slot, value } => MutationKind::AddReference(AddReference {
            from: from.0,
            slot: *slot as u64,
            value: value.0,
        }),
        MutationEvent::RemoveReference { from, slot } => MutationKind::RemoveReference(RemoveReference {
            from: from.0,
            slot: *slot as u64,
        }),
        MutationEvent::SetValue { node, slot, value } => MutationKind::SetValue(SetValue {
            node: node.0,
            slot: *slot as u64,
            value: Some(value_to_proto(value)),
        }),
    };
    ProtoMutation { kind: Some(kind) }
}

fn slot(raw: u64) -> Result<usize> {
    usize::try_from(raw).map_err(|_| RuntimeError::Decode(format!("slot {} out of range", raw)))
}

fn proto_to_field(proto: &ProtoField) -> Result<Field> {
    let tag = proto.tag.parse::<TypeTag>().map_err(RuntimeError::Decode)?;
    Ok(Field::new(tag, proto_to_value(proto.value.as_ref())?))
}

fn field_to_proto(field: &Field) -> ProtoField {
    ProtoField {
        tag: field.tag.to_string(),
        value: Some(value_to_proto(&field.value)),
    }
}

fn proto_to_value(proto: Option<&ProtoValue>) -> Result<Value> {
    let kind = proto
        .and_then(|v| v.kind.as_ref())
        .ok_or_else(|| RuntimeError::Decode("value has no kind".to_string()))?;
    let value = match kind {
        ValueKind::Nil(_) => Value::Nil,
        ValueKind::Bool(b) => Value::Bool(*b),
        ValueKind::Int(i) => Value::Int(*i),
        ValueKind::Uint(u) => Value::Uint(*u),
        ValueKind::Str(s) => Value::Str(s.clone()),
        ValueKind::Ref(n) => Value::Ref(NodeId(*n)),
        ValueKind::Foreign(f) => Value::Foreign {
            id: f.id.parse::<ObjectId>().map_err(RuntimeError::Decode)?,
            hash: Hashlet(f.hash.clone()),
        },
    };
    Ok(value)
}

fn value_to_proto(value: &Value) -> ProtoValue {
    let kind = match value {
        Value::Nil => ValueKind::Nil(true),
        Value::Bool(b) => ValueKind::Bool(*b),
        Value::Int(i) => ValueKind::Int(*i),
        Value::Uint(u) => ValueKind::Uint(*u),
        Value::Str(s) => ValueKind::Str(s.clone()),
        Value::Ref(n) => ValueKind::Ref(n.0),
        Value::Foreign { id, hash } => ValueKind::Foreign(ProtoForeign {
            id: id.to_string(),
            hash: hash.0.clone(),
        }),
    };
    ProtoValue { kind: Some(kind) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;
    use realm_engine::RealmId;

    #[test]
    fn step_survives_wire_encoding() {
        let foreign = ObjectId::new(RealmId::from_path("gno.land/r/other"), 4);
        let step = StepEnvelope::new(
            3,
            vec![
                MutationEvent::Alloc {
                    kind: CompositeKind::Array,
                    fields: vec![
                        Field::nil_pointer("Node"),
                        Field::new(TypeTag::Int, Value::Int(-7)),
                        Field::new(
                            TypeTag::pointer_to(TypeTag::named("Ext")),
                            Value::Foreign {
                                id: foreign,
                                hash: Hashlet("ab".repeat(20)),
                            },
                        ),
                    ],
                },
                MutationEvent::Detach {
                    owner: NodeId(1),
                    slot: 2,
                },
            ],
        );
        let bytes = step_to_proto(&step).encode_to_vec();
        let decoded = ProtoStepEnvelope::decode(bytes.as_slice()).unwrap();
        assert_eq!(proto_to_step(&decoded).unwrap(), step);
    }

    #[test]
    fn empty_mutation_is_rejected() {
        let proto = ProtoStepEnvelope {
            schema_version: 1,
            step: 1,
            events: vec![ProtoMutation { kind: None }],
        };
        assert!(matches!(
            proto_to_step(&proto).unwrap_err(),
            RuntimeError::Decode(_)
        ));
    }

    #[test]
    fn bad_type_tag_is_rejected() {
        let proto = ProtoStepEnvelope {
            schema_version: 1,
            step: 1,
            events: vec![ProtoMutation {
                kind: Some(MutationKind::Alloc(Alloc {
                    kind: "struct".to_string(),
                    fields: vec![ProtoField {
                        tag: "float".to_string(),
                        value: Some(ProtoValue {
                            kind: Some(ValueKind::Nil(true)),
                        }),
                    }],
                })),
            }],
        };
        assert!(proto_to_step(&proto).is_err());
    }
}
