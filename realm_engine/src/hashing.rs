/// RealmEngine v1 — Content Hasher
///
/// Deterministic canonical encoding of field lists + SHA-256 hashlets.
/// Produces byte-identical output across platforms.
///
/// Rules:
///   - Fields in slot order, each `{"T": <tag>, "V": <value>}`; nil omits "V"
///   - Integers as decimal strings (no float anywhere)
///   - Inline composites embedded recursively
///   - Owning slot to an object: `{"@type":"ref","id":..,"hash":..}`
///   - Non-owning slot to an object: `{"@type":"ref","id":..,"escaped":true}`
///   - UTF-8 JSON, no whitespace, insertion-ordered keys
///
/// Hash inputs only follow owning edges, so the acyclic owner forest
/// makes every hash well-founded even when back-references form cycles.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value as Json};
use sha2::{Digest, Sha256};

use crate::domain::{Hashlet, Holder};
use crate::error::{EngineError, Result};
use crate::state::RealmStore;
use crate::value::{Field, NodeId, Value};
use crate::ENGINE_VERSION;

/// Hashlet width in bytes.
pub const HASHLET_LEN: usize = 20;

/// First 20 bytes of SHA-256, lowercase hex.
pub fn hashlet_of_bytes(bytes: &[u8]) -> Hashlet {
    let digest = Sha256::digest(bytes);
    Hashlet(
        digest[..HASHLET_LEN]
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<String>(),
    )
}

/// Full SHA-256, lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Canonical bytes of an encoded JSON value. No whitespace.
pub fn canonical_bytes(value: &Json) -> Vec<u8> {
    value.to_string().into_bytes()
}

/// Hash of an already encoded field list. Replicas use this to check a
/// record's `content_hash` against its `fields` without the object graph.
pub fn hash_encoded_fields(fields: &Json) -> Hashlet {
    hashlet_of_bytes(&canonical_bytes(fields))
}

/// Content hash of the composite at `node`.
pub fn content_hash(store: &RealmStore, node: NodeId) -> Result<Hashlet> {
    Ok(hash_encoded_fields(&encode_fields(store, node)?))
}

/// Canonical encoding of the field list of `node`.
pub fn encode_fields(store: &RealmStore, node: NodeId) -> Result<Json> {
    let n = store.node(node)?;
    let mut out = Vec::with_capacity(n.fields.len());
    for (slot, field) in n.fields.iter().enumerate() {
        out.push(encode_field(store, node, slot, field)?);
    }
    Ok(Json::Array(out))
}

fn encode_field(store: &RealmStore, node: NodeId, slot: usize, field: &Field) -> Result<Json> {
    let mut entry = Map::new();
    entry.insert("T".to_string(), Json::String(field.tag.to_string()));
    if !field.value.is_nil() {
        entry.insert("V".to_string(), encode_value(store, node, slot, &field.value)?);
    }
    Ok(Json::Object(entry))
}

fn encode_value(store: &RealmStore, node: NodeId, slot: usize, value: &Value) -> Result<Json> {
    let encoded = match value {
        Value::Nil => Json::Null,
        Value::Bool(b) => json!({"@type": "bool", "value": b}),
        Value::Int(i) => json!({"@type": "int", "value": i.to_string()}),
        Value::Uint(u) => json!({"@type": "uint", "value": u.to_string()}),
        Value::Str(s) => json!({"@type": "str", "value": s}),
        Value::Foreign { id, hash } => {
            json!({"@type": "ref", "id": id.to_string(), "hash": hash.as_str()})
        }
        Value::Ref(target) => {
            let t = store.nodes.get(target).ok_or_else(|| {
                EngineError::UnresolvableReference(format!(
                    "{}[{}] points at missing {}",
                    node, slot, target
                ))
            })?;
            let owning = t.holder == (Holder::Slot { parent: node, slot });
            match (&t.object, owning) {
                (Some(info), true) => json!({
                    "@type": "ref",
                    "id": info.id.to_string(),
                    "hash": info.content_hash.as_str(),
                }),
                (Some(info), false) => json!({
                    "@type": "ref",
                    "id": info.id.to_string(),
                    "escaped": true,
                }),
                (None, true) => {
                    let mut inline = Map::new();
                    inline.insert("@type".to_string(), Json::String("inline".to_string()));
                    inline.insert("kind".to_string(), Json::String(t.kind.as_str().to_string()));
                    inline.insert("fields".to_string(), encode_fields(store, *target)?);
                    Json::Object(inline)
                }
                (None, false) => {
                    return Err(EngineError::invariant(
                        "single_owner",
                        format!(
                            "inline {} is referenced from {}[{}] which does not own it",
                            target, node, slot
                        ),
                    ))
                }
            }
        }
    };
    Ok(encoded)
}

/// Identities referenced by an encoded field list, in encounter order,
/// paired with whether the reference carries a hash (owning edge).
pub fn referenced_ids(fields: &Json) -> Vec<(String, bool)> {
    referenced_hashes(fields)
        .into_iter()
        .map(|(id, hash)| (id, hash.is_some()))
        .collect()
}

/// Like [`referenced_ids`], but yields the hash an owning reference pins.
pub fn referenced_hashes(fields: &Json) -> Vec<(String, Option<String>)> {
    let mut out = Vec::new();
    let mut stack = vec![fields];
    while let Some(v) = stack.pop() {
        match v {
            Json::Array(items) => stack.extend(items.iter().rev()),
            Json::Object(map) => {
                if map.get("@type").and_then(|t| t.as_str()) == Some("ref") {
                    if let Some(id) = map.get("id").and_then(|i| i.as_str()) {
                        let hash = map.get("hash").and_then(|h| h.as_str()).map(str::to_string);
                        out.push((id.to_string(), hash));
                    }
                    continue;
                }
                if let Some(f) = map.get("fields") {
                    stack.push(f);
                }
                if let Some(inner) = map.get("V") {
                    stack.push(inner);
                }
            }
            _ => {}
        }
    }
    out
}

/// Canonical digest of a whole committed store: every object's
/// `(id, owner_id, ref_count, is_escaped, mod_time, content_hash)` in
/// identity order, plus the root table and allocator state. Two replicas
/// agree on this iff they agree on every object triple.
pub fn store_hash(store: &RealmStore) -> Result<String> {
    let mut objects = Vec::with_capacity(store.objects.len());
    for (seq, node) in &store.objects {
        let n = store.node(*node)?;
        let info = n.object.as_ref().ok_or_else(|| {
            EngineError::invariant(
                "identity_index",
                format!("index entry {} points at {} which has no identity", seq, node),
            )
        })?;
        let mut m = Map::new();
        m.insert("id".to_string(), Json::String(info.id.to_string()));
        m.insert(
            "owner_id".to_string(),
            info.owner_id
                .as_ref()
                .map(|o| Json::String(o.to_string()))
                .unwrap_or(Json::Null),
        );
        m.insert("ref_count".to_string(), Json::String(n.ref_count.to_string()));
        m.insert("is_escaped".to_string(), Json::Bool(info.is_escaped));
        m.insert("mod_time".to_string(), Json::String(info.mod_time.to_string()));
        m.insert("hash".to_string(), Json::String(info.content_hash.0.clone()));
        objects.push(Json::Object(m));
    }

    let mut roots = Map::new();
    let by_name: BTreeMap<&String, &NodeId> = store.roots.iter().collect();
    for (name, node) in by_name {
        let id = store
            .object_id(*node)
            .map(|i| Json::String(i.to_string()))
            .unwrap_or(Json::Null);
        roots.insert(name.clone(), id);
    }

    // engine_version MUST be first: it binds the digest to the encoding rules.
    let mut root = Map::new();
    root.insert(
        "engine_version".to_string(),
        Json::Number((ENGINE_VERSION as i64).into()),
    );
    root.insert("realm".to_string(), Json::String(store.realm.0.clone()));
    root.insert("step".to_string(), Json::String(store.step.to_string()));
    root.insert(
        "last_id".to_string(),
        Json::String(store.identities.last_allocated().to_string()),
    );
    root.insert("roots".to_string(), Json::Object(roots));
    root.insert("objects".to_string(), Json::Array(objects));

    Ok(sha256_hex(&canonical_bytes(&Json::Object(root))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ObjectInfo;
    use crate::state::create_initial_store;
    use crate::value::{CompositeKind, TypeTag};

    fn ptr() -> Field {
        Field::nil_pointer("T")
    }

    #[test]
    fn hashlet_is_forty_hex_chars() {
        let h = hashlet_of_bytes(b"abc");
        assert_eq!(h.as_str().len(), 40);
        // SHA-256("abc") starts with ba7816bf8f01cfea414140de5dae2223b00361a3
        assert_eq!(h.as_str(), "ba7816bf8f01cfea414140de5dae2223b00361a3");
    }

    #[test]
    fn identical_field_lists_hash_identically() {
        let mut store = create_initial_store("gno.land/r/h");
        let a = store
            .insert_node(CompositeKind::Struct, vec![Field::int(1), Field::string("x")])
            .unwrap();
        let b = store
            .insert_node(CompositeKind::Struct, vec![Field::int(1), Field::string("x")])
            .unwrap();
        assert_eq!(content_hash(&store, a).unwrap(), content_hash(&store, b).unwrap());
    }

    #[test]
    fn field_order_and_type_tags_are_hash_inputs() {
        let mut store = create_initial_store("gno.land/r/h");
        let a = store
            .insert_node(CompositeKind::Struct, vec![Field::int(1), Field::string("x")])
            .unwrap();
        let b = store
            .insert_node(CompositeKind::Struct, vec![Field::string("x"), Field::int(1)])
            .unwrap();
        let c = store
            .insert_node(
                CompositeKind::Struct,
                vec![
                    Field::new(TypeTag::named("Count"), Value::Int(1)),
                    Field::string("x"),
                ],
            )
            .unwrap();
        let ha = content_hash(&store, a).unwrap();
        assert_ne!(ha, content_hash(&store, b).unwrap());
        assert_ne!(ha, content_hash(&store, c).unwrap());
    }

    #[test]
    fn nil_fields_omit_value() {
        let mut store = create_initial_store("gno.land/r/h");
        let a = store.insert_node(CompositeKind::Struct, vec![ptr()]).unwrap();
        let enc = encode_fields(&store, a).unwrap();
        assert_eq!(enc.to_string(), r##"[{"T":"*#T"}]"##);
    }

    #[test]
    fn inline_child_is_embedded_and_object_child_is_referenced() {
        let mut store = create_initial_store("gno.land/r/h");
        let parent = store
            .insert_node(CompositeKind::Struct, vec![ptr(), ptr()])
            .unwrap();
        let inline = store
            .insert_node(CompositeKind::Struct, vec![Field::int(5)])
            .unwrap();
        let obj = store
            .insert_node(CompositeKind::Struct, vec![Field::int(6)])
            .unwrap();
        store.field_mut(parent, 0).unwrap().value = Value::Ref(inline);
        store.node_mut(inline).unwrap().holder = Holder::Slot { parent, slot: 0 };
        store.field_mut(parent, 1).unwrap().value = Value::Ref(obj);
        let id = store.identities.allocate().unwrap();
        {
            let o = store.node_mut(obj).unwrap();
            o.holder = Holder::Realm;
            o.object = Some(ObjectInfo {
                id: id.clone(),
                owner_id: None,
                mod_time: 1,
                is_escaped: true,
                content_hash: Hashlet::zero(),
            });
        }
        let enc = encode_fields(&store, parent).unwrap();
        let text = enc.to_string();
        assert!(text.contains(r#""@type":"inline""#));
        assert!(text.contains(r#""value":"5""#));
        assert!(text.contains(&format!(r#""id":"{}","escaped":true"#, id)));
        assert_eq!(referenced_ids(&enc), vec![(id.to_string(), false)]);
    }

    #[test]
    fn inline_reference_without_ownership_is_rejected() {
        let mut store = create_initial_store("gno.land/r/h");
        let parent = store.insert_node(CompositeKind::Struct, vec![ptr()]).unwrap();
        let stray = store.insert_node(CompositeKind::Struct, vec![]).unwrap();
        store.field_mut(parent, 0).unwrap().value = Value::Ref(stray);
        let err = encode_fields(&store, parent).unwrap_err();
        assert!(err.to_string().contains("single_owner"));
    }

    #[test]
    fn missing_target_is_unresolvable() {
        let mut store = create_initial_store("gno.land/r/h");
        let parent = store.insert_node(CompositeKind::Struct, vec![ptr()]).unwrap();
        store.field_mut(parent, 0).unwrap().value = Value::Ref(NodeId(404));
        assert!(matches!(
            encode_fields(&store, parent).unwrap_err(),
            EngineError::UnresolvableReference(_)
        ));
    }

    #[test]
    fn store_hash_is_deterministic() {
        let store = create_initial_store("gno.land/r/h");
        let h1 = store_hash(&store).unwrap();
        let h2 = store_hash(&store.clone()).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
    }
}
