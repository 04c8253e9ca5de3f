/// RealmEngine v1 — Changeset Emitter
///
/// Turns one step's touched set into an ordered record list:
///   1. creates, children before the parents that own them, otherwise
///      ascending identity order
///   2. updates, in first-touched order
///   3. deletes, in release order
///
/// Only objects whose committed view actually changed produce an update.
/// An object created and released within the same step produces nothing.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::debug;

use crate::domain::{Hashlet, Holder, ObjectId, ObjectInfo, RealmId};
use crate::error::{EngineError, Result};
use crate::graph::{enclosing_object, object_depth, owner_id, owner_object};
use crate::hashing::{content_hash, encode_fields, hash_encoded_fields, referenced_ids};
use crate::modtime::{mark_dirty, StepTracker};
use crate::state::RealmStore;
use crate::value::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Create,
    Update,
    Delete,
}

impl RecordKind {
    /// Prefix used by [`Changeset::render`].
    pub fn prefix(&self) -> &'static str {
        match self {
            RecordKind::Create => "c",
            RecordKind::Update => "u",
            RecordKind::Delete => "d",
        }
    }
}

/// Committed view of one object as carried by create and update records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordBody {
    pub fields: Json,
    pub owner_id: Option<ObjectId>,
    pub ref_count: u64,
    pub mod_time: u64,
    pub is_escaped: bool,
    pub content_hash: Hashlet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub kind: RecordKind,
    pub id: ObjectId,
    /// Absent on deletes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<RecordBody>,
}

/// Ordered records produced by one committed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    pub realm: RealmId,
    pub step: u64,
    pub records: Vec<ObjectRecord>,
}

impl Changeset {
    pub fn empty(realm: RealmId, step: u64) -> Self {
        Self {
            realm,
            step,
            records: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn of_kind(&self, kind: RecordKind) -> impl Iterator<Item = &ObjectRecord> {
        self.records.iter().filter(move |r| r.kind == kind)
    }

    pub fn creates(&self) -> impl Iterator<Item = &ObjectRecord> {
        self.of_kind(RecordKind::Create)
    }

    pub fn updates(&self) -> impl Iterator<Item = &ObjectRecord> {
        self.of_kind(RecordKind::Update)
    }

    pub fn deletes(&self) -> impl Iterator<Item = &ObjectRecord> {
        self.of_kind(RecordKind::Delete)
    }

    /// Record for `id`, if this step produced one.
    pub fn record(&self, id: &ObjectId) -> Option<&ObjectRecord> {
        self.records.iter().find(|r| &r.id == id)
    }

    /// `(creates, updates, deletes)`.
    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.creates().count(),
            self.updates().count(),
            self.deletes().count(),
        )
    }

    /// One line per record: `c[id]=<body>`, `u[id]=<body>`, `d[id]`.
    pub fn render(&self) -> Result<String> {
        let mut out = String::new();
        for r in &self.records {
            out.push_str(r.kind.prefix());
            out.push('[');
            out.push_str(&r.id.to_string());
            out.push(']');
            if let Some(body) = &r.body {
                out.push('=');
                out.push_str(&serde_json::to_string(body).map_err(|e| encoding_error(&r.id, e))?);
            }
            out.push('\n');
        }
        Ok(out)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            EngineError::invariant("changeset_encoding", format!("cannot encode changeset: {}", e))
        })
    }

    /// Compare against a changeset another replica produced for the same
    /// step. Any divergence surfaces as a hash mismatch on the first
    /// identity that differs.
    pub fn verify_against(&self, expected: &Changeset) -> Result<()> {
        if self.realm != expected.realm || self.step != expected.step {
            return Err(EngineError::invariant(
                "replica_divergence",
                format!(
                    "changeset for {} step {} compared with {} step {}",
                    self.realm, self.step, expected.realm, expected.step
                ),
            ));
        }
        let len = self.records.len().max(expected.records.len());
        for i in 0..len {
            match (self.records.get(i), expected.records.get(i)) {
                (Some(ours), Some(theirs)) if ours == theirs => {}
                (Some(ours), Some(theirs)) if ours.id == theirs.id && ours.kind == theirs.kind => {
                    return Err(EngineError::HashMismatch {
                        id: ours.id.clone(),
                        expected: body_digest(theirs),
                        actual: body_digest(ours),
                    });
                }
                (ours, theirs) => {
                    return Err(EngineError::invariant(
                        "replica_divergence",
                        format!(
                            "record {} differs: ours {} theirs {}",
                            i,
                            describe(ours),
                            describe(theirs)
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    /// A record may only name an owned object by identity once that
    /// object's create record has been seen (or it predates the step).
    pub fn check_referential_order(&self) -> Result<()> {
        let created: BTreeSet<String> = self.creates().map(|r| r.id.to_string()).collect();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        for r in &self.records {
            if let Some(body) = &r.body {
                for (target, owning) in referenced_ids(&body.fields) {
                    if owning && created.contains(&target) && !seen.contains(&target) {
                        return Err(EngineError::invariant(
                            "referential_order",
                            format!("{} references {} before its create record", r.id, target),
                        ));
                    }
                }
            }
            if r.kind == RecordKind::Create {
                seen.insert(r.id.to_string());
            }
        }
        Ok(())
    }
}

fn encoding_error(id: &ObjectId, e: serde_json::Error) -> EngineError {
    EngineError::invariant("changeset_encoding", format!("cannot encode record {}: {}", id, e))
}

fn body_digest(record: &ObjectRecord) -> String {
    match &record.body {
        Some(body) => body.content_hash.0.clone(),
        None => "-".to_string(),
    }
}

fn describe(record: Option<&ObjectRecord>) -> String {
    match record {
        Some(r) => format!("{}[{}]", r.kind.prefix(), r.id),
        None => "nothing".to_string(),
    }
}

/// Committed view of `id` in the base store, with its reference count.
fn persisted<'a>(base: &'a RealmStore, id: &ObjectId) -> Option<(&'a ObjectInfo, u64)> {
    let node = base.objects.get(&id.seq)?;
    let n = base.nodes.get(node)?;
    n.object.as_ref().map(|info| (info, n.ref_count))
}

/// Compute hashes and mod times for every object the step touched (and
/// their owner chains), then emit the ordered record list. Expects the
/// step's releases to have been swept already.
pub fn emit(base: &RealmStore, work: &mut RealmStore, tracker: &StepTracker) -> Result<Changeset> {
    let step = tracker.step();

    // Touched objects still alive, plus every owner above them: an owned
    // object's hash is part of its owner's fields.
    let mut candidates: Vec<NodeId> = Vec::new();
    let mut in_set: BTreeSet<NodeId> = BTreeSet::new();
    for node in tracker.touched() {
        if work.nodes.get(node).is_some_and(|n| n.is_object()) && in_set.insert(*node) {
            candidates.push(*node);
        }
    }
    let mut i = 0;
    while i < candidates.len() {
        let node = candidates[i];
        if matches!(work.node(node)?.holder, Holder::Slot { .. }) {
            if let Some(owner) = owner_object(work, node)? {
                if in_set.insert(owner) {
                    candidates.push(owner);
                }
            }
        }
        i += 1;
    }

    for node in &candidates {
        let owner = owner_id(work, *node)?;
        if let Some(info) = work.node_mut(*node)?.object.as_mut() {
            info.owner_id = owner;
        }
    }

    // Deepest objects first so owners see their children's fresh hashes.
    let mut memo = BTreeMap::new();
    let mut by_depth = Vec::with_capacity(candidates.len());
    for node in &candidates {
        let seq = work.object_id(*node).map(|id| id.seq).unwrap_or_default();
        by_depth.push((object_depth(work, *node, &mut memo)?, seq, *node));
    }
    by_depth.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut encoded: BTreeMap<NodeId, (Json, bool)> = BTreeMap::new();
    for (_, _, node) in &by_depth {
        let fields = encode_fields(work, *node)?;
        let hash = hash_encoded_fields(&fields);
        let inherited = inline_mod_time(base, *node, &hash)?;
        let n = work.node_mut(*node)?;
        let Some(info) = n.object.as_mut() else {
            continue;
        };
        let prior = persisted(base, &info.id).map(|(p, _)| p);
        let changed = mark_dirty(info, prior, inherited, hash, step)?;
        encoded.insert(*node, (fields, changed));
    }

    let mut creates: BTreeMap<u64, (ObjectRecord, Vec<(u64, bool)>)> = BTreeMap::new();
    let mut updates: Vec<ObjectRecord> = Vec::new();
    for node in &candidates {
        let Some((fields, changed)) = encoded.remove(node) else {
            continue;
        };
        let n = work.node(*node)?;
        let Some(info) = n.object.as_ref() else {
            continue;
        };
        let body = RecordBody {
            fields,
            owner_id: info.owner_id.clone(),
            ref_count: n.ref_count,
            mod_time: info.mod_time,
            is_escaped: info.is_escaped,
            content_hash: info.content_hash.clone(),
        };
        match persisted(base, &info.id) {
            None => {
                let deps = local_refs(work, &body.fields, info.id.seq);
                creates.insert(
                    info.id.seq,
                    (
                        ObjectRecord {
                            kind: RecordKind::Create,
                            id: info.id.clone(),
                            body: Some(body),
                        },
                        deps,
                    ),
                );
            }
            Some((prev, prev_count)) => {
                let dirty = changed
                    || prev.owner_id != body.owner_id
                    || prev_count != body.ref_count
                    || prev.is_escaped != body.is_escaped;
                if dirty {
                    updates.push(ObjectRecord {
                        kind: RecordKind::Update,
                        id: info.id.clone(),
                        body: Some(body),
                    });
                }
            }
        }
    }

    let mut records = order_creates(creates)?;
    records.extend(updates);
    for id in tracker.deleted() {
        if persisted(base, id).is_some() {
            records.push(ObjectRecord {
                kind: RecordKind::Delete,
                id: id.clone(),
                body: None,
            });
        }
    }

    let changeset = Changeset {
        realm: work.realm.clone(),
        step,
        records,
    };
    let (c, u, d) = changeset.counts();
    debug!(step, creates = c, updates = u, deletes = d, "changeset emitted");
    Ok(changeset)
}

/// Step at which `node`'s fields were last committed while it was stored
/// inline: the mod time of the object that embedded it in `base`. `None`
/// if it was not committed inline or its fields have changed since.
fn inline_mod_time(base: &RealmStore, node: NodeId, hash: &Hashlet) -> Result<Option<u64>> {
    let Some(n) = base.nodes.get(&node) else {
        return Ok(None);
    };
    if n.is_object() || content_hash(base, node)? != *hash {
        return Ok(None);
    }
    let Some(enclosing) = enclosing_object(base, node)? else {
        return Ok(None);
    };
    Ok(base
        .node(enclosing)?
        .object
        .as_ref()
        .map(|info| info.mod_time))
}

/// Same-realm identities referenced by `fields`, other than `own`.
fn local_refs(store: &RealmStore, fields: &Json, own: u64) -> Vec<(u64, bool)> {
    let prefix = format!("{}:", store.realm);
    referenced_ids(fields)
        .into_iter()
        .filter_map(|(id, owning)| {
            let seq = id.strip_prefix(&prefix)?.parse::<u64>().ok()?;
            (seq != own).then_some((seq, owning))
        })
        .collect()
}

/// Order create records so every created object precedes the records that
/// reference it. Owning edges are acyclic and always honoured; a cycle of
/// non-owning references is broken at the lowest identity that has no
/// pending owned child.
fn order_creates(mut pending: BTreeMap<u64, (ObjectRecord, Vec<(u64, bool)>)>) -> Result<Vec<ObjectRecord>> {
    let mut out = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let ready = pending
            .iter()
            .find(|(_, (_, deps))| deps.iter().all(|(t, _)| !pending.contains_key(t)))
            .map(|(seq, _)| *seq);
        let next = ready.or_else(|| {
            pending
                .iter()
                .find(|(_, (_, deps))| deps.iter().all(|(t, owning)| !*owning || !pending.contains_key(t)))
                .map(|(seq, _)| *seq)
        });
        let Some(seq) = next else {
            return Err(EngineError::invariant(
                "owner_forest",
                "owning references among created objects form a cycle",
            ));
        };
        if let Some((record, _)) = pending.remove(&seq) {
            out.push(record);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RealmId;

    fn rec(kind: RecordKind, seq: u64, fields: Json) -> ObjectRecord {
        let realm = RealmId::from_path("gno.land/r/cs");
        ObjectRecord {
            kind,
            id: ObjectId::new(realm, seq),
            body: (kind != RecordKind::Delete).then(|| RecordBody {
                fields,
                owner_id: None,
                ref_count: 1,
                mod_time: 1,
                is_escaped: false,
                content_hash: Hashlet::zero(),
            }),
        }
    }

    fn owning_ref(seq: u64) -> Json {
        let id = ObjectId::new(RealmId::from_path("gno.land/r/cs"), seq);
        serde_json::json!([{"T": "*#T", "V": {"@type": "ref", "id": id.to_string(), "hash": "00"}}])
    }

    #[test]
    fn owned_children_are_created_first() {
        let mut pending = BTreeMap::new();
        pending.insert(1, (rec(RecordKind::Create, 1, owning_ref(2)), vec![(2, true)]));
        pending.insert(2, (rec(RecordKind::Create, 2, Json::Array(vec![])), vec![]));
        let ordered = order_creates(pending).unwrap();
        let seqs: Vec<u64> = ordered.iter().map(|r| r.id.seq).collect();
        assert_eq!(seqs, vec![2, 1]);
    }

    #[test]
    fn non_owning_cycles_break_at_owning_constraint() {
        // 1 -> 2 non-owning, 2 -> 1 owning: 1 must come first.
        let mut pending = BTreeMap::new();
        pending.insert(1, (rec(RecordKind::Create, 1, Json::Null), vec![(2, false)]));
        pending.insert(2, (rec(RecordKind::Create, 2, Json::Null), vec![(1, true)]));
        let ordered = order_creates(pending).unwrap();
        let seqs: Vec<u64> = ordered.iter().map(|r| r.id.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn referential_order_check_flags_late_child() {
        let cs = Changeset {
            realm: RealmId::from_path("gno.land/r/cs"),
            step: 1,
            records: vec![
                rec(RecordKind::Create, 1, owning_ref(2)),
                rec(RecordKind::Create, 2, Json::Array(vec![])),
            ],
        };
        assert!(cs.check_referential_order().is_err());
    }

    #[test]
    fn render_uses_short_prefixes() {
        let cs = Changeset {
            realm: RealmId::from_path("gno.land/r/cs"),
            step: 2,
            records: vec![
                rec(RecordKind::Update, 1, Json::Array(vec![])),
                rec(RecordKind::Delete, 3, Json::Null),
            ],
        };
        let text = cs.render().unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("u["));
        assert!(lines[0].contains("\"ref_count\":1"));
        assert!(lines[1].starts_with("d["));
        assert!(lines[1].ends_with(":3]"));
        assert_eq!(cs.counts(), (0, 1, 1));
    }

    #[test]
    fn diverging_body_is_a_hash_mismatch() {
        let realm = RealmId::from_path("gno.land/r/cs");
        let ours = Changeset {
            realm: realm.clone(),
            step: 1,
            records: vec![rec(RecordKind::Create, 1, Json::Array(vec![]))],
        };
        let mut theirs = ours.clone();
        if let Some(body) = theirs.records[0].body.as_mut() {
            body.content_hash = Hashlet("ff".repeat(20));
        }
        assert!(ours.verify_against(&ours.clone()).is_ok());
        assert!(matches!(
            ours.verify_against(&theirs).unwrap_err(),
            EngineError::HashMismatch { .. }
        ));
        let shorter = Changeset::empty(realm, 1);
        assert!(ours.verify_against(&shorter).unwrap_err().is_fatal_fault());
    }
}
