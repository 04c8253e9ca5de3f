//! Replica object table — the committed object view rebuilt purely from
//! changesets, the way a remote store would see the realm.
//!
//! Each changeset is applied atomically: records go into a copy of the
//! table, the copy is checked, and only then swapped in.

use std::collections::BTreeMap;

use tracing::debug;

use realm_engine::hashing::{encode_fields, hash_encoded_fields, referenced_hashes};
use realm_engine::{
    Changeset, EngineError, ObjectId, RealmId, RealmStore, RecordBody, RecordKind,
};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTable {
    realm: RealmId,
    step: u64,
    objects: BTreeMap<u64, RecordBody>,
}

impl ObjectTable {
    /// Empty table for a realm that has committed nothing yet.
    pub fn new(realm: RealmId) -> Self {
        Self {
            realm,
            step: 0,
            objects: BTreeMap::new(),
        }
    }

    /// Table matching a committed store, for resuming from a snapshot.
    pub fn from_store(store: &RealmStore) -> Result<Self> {
        let mut objects = BTreeMap::new();
        for (seq, node) in &store.objects {
            let n = store.node(*node)?;
            let info = n.object.as_ref().ok_or_else(|| {
                EngineError::invariant("identity_index", format!("{} has no identity", node))
            })?;
            objects.insert(
                *seq,
                RecordBody {
                    fields: encode_fields(store, *node)?,
                    owner_id: info.owner_id.clone(),
                    ref_count: n.ref_count,
                    mod_time: info.mod_time,
                    is_escaped: info.is_escaped,
                    content_hash: info.content_hash.clone(),
                },
            );
        }
        Ok(Self {
            realm: store.realm.clone(),
            step: store.step,
            objects,
        })
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, id: &ObjectId) -> Option<&RecordBody> {
        if id.realm != self.realm {
            return None;
        }
        self.objects.get(&id.seq)
    }

    /// Apply one step's changeset. On error the table is left untouched.
    pub fn apply(&mut self, changeset: &Changeset) -> Result<()> {
        if changeset.realm != self.realm {
            return Err(EngineError::invariant(
                "replica_realm",
                format!("changeset for {} applied to {}", changeset.realm, self.realm),
            )
            .into());
        }
        if changeset.step != self.step + 1 {
            return Err(EngineError::invariant(
                "step_sequence",
                format!("expected changeset {}, got {}", self.step + 1, changeset.step),
            )
            .into());
        }

        let mut next = self.objects.clone();
        for record in &changeset.records {
            let id = &record.id;
            if id.realm != self.realm {
                return Err(EngineError::invariant(
                    "replica_realm",
                    format!("record {} belongs to another realm", id),
                )
                .into());
            }
            match (record.kind, &record.body) {
                (RecordKind::Create, Some(body)) => {
                    if next.contains_key(&id.seq) {
                        return Err(EngineError::invariant(
                            "identity_unique",
                            format!("create for existing {}", id),
                        )
                        .into());
                    }
                    check_body_hash(id, body)?;
                    next.insert(id.seq, body.clone());
                }
                (RecordKind::Update, Some(body)) => {
                    if !next.contains_key(&id.seq) {
                        return Err(EngineError::UnresolvableReference(format!(
                            "update for unknown {}",
                            id
                        ))
                        .into());
                    }
                    check_body_hash(id, body)?;
                    next.insert(id.seq, body.clone());
                }
                (RecordKind::Delete, None) => {
                    if next.remove(&id.seq).is_none() {
                        return Err(EngineError::UnresolvableReference(format!(
                            "delete for unknown {}",
                            id
                        ))
                        .into());
                    }
                }
                (kind, _) => {
                    return Err(EngineError::invariant(
                        "record_shape",
                        format!("{}[{}] has the wrong body shape", kind.prefix(), id),
                    )
                    .into());
                }
            }
        }

        check_references(&self.realm, &next)?;

        self.objects = next;
        self.step = changeset.step;
        debug!(step = self.step, objects = self.objects.len(), "replica applied changeset");
        Ok(())
    }
}

fn check_body_hash(id: &ObjectId, body: &RecordBody) -> Result<()> {
    let computed = hash_encoded_fields(&body.fields);
    if computed != body.content_hash {
        return Err(EngineError::HashMismatch {
            id: id.clone(),
            expected: body.content_hash.to_string(),
            actual: computed.to_string(),
        }
        .into());
    }
    Ok(())
}

/// Every same-realm reference resolves, and every owning reference pins
/// the hash its target currently carries. Cross-realm references are
/// left to the other realm's table.
fn check_references(realm: &RealmId, objects: &BTreeMap<u64, RecordBody>) -> Result<()> {
    for (seq, body) in objects {
        for (target, hash) in referenced_hashes(&body.fields) {
            let id: ObjectId = target.parse().map_err(|e: String| {
                EngineError::UnresolvableReference(format!("object {}: {}", seq, e))
            })?;
            if &id.realm != realm {
                continue;
            }
            let Some(stored) = objects.get(&id.seq) else {
                return Err(EngineError::UnresolvableReference(format!(
                    "{}:{} references missing {}",
                    realm, seq, id
                ))
                .into());
            };
            if let Some(hash) = hash {
                if hash != stored.content_hash.as_str() {
                    return Err(EngineError::HashMismatch {
                        id,
                        expected: hash,
                        actual: stored.content_hash.to_string(),
                    }
                    .into());
                }
            }
        }
    }
    Ok(())
}
