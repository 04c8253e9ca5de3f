/// RealmEngine v1 — Realm Store
///
/// The arena holding one realm's object graph. Cross references are node
/// handles or object identities, never native pointers, so cycles through
/// non-owning slots need no special treatment.
///
/// The store committed at the end of step N is the read-only base of
/// step N+1; each step mutates a clone.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::arithmetic::checked_inc;
use crate::domain::{Node, ObjectId, RealmId};
use crate::error::{EngineError, Result};
use crate::identity::IdentityAllocator;
use crate::value::{CompositeKind, Field, NodeId};

/// Complete object graph of one realm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RealmStore {
    pub pkg_path: String,
    pub realm: RealmId,
    pub nodes: BTreeMap<NodeId, Node>,
    /// Named realm roots (package-level variables).
    pub roots: BTreeMap<String, NodeId>,
    /// Identity index: object sequence number -> node.
    pub objects: BTreeMap<u64, NodeId>,
    pub identities: IdentityAllocator,
    pub next_node: u64,
    /// Last committed step (0 before the first commit).
    pub step: u64,
}

/// Create a fresh, empty store for the realm at `pkg_path`.
pub fn create_initial_store(pkg_path: &str) -> RealmStore {
    let realm = RealmId::from_path(pkg_path);
    RealmStore {
        pkg_path: pkg_path.to_string(),
        realm: realm.clone(),
        nodes: BTreeMap::new(),
        roots: BTreeMap::new(),
        objects: BTreeMap::new(),
        identities: IdentityAllocator::new(realm),
        next_node: 1,
        step: 0,
    }
}

impl RealmStore {
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).ok_or(EngineError::UnknownNode(id))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(&id).ok_or(EngineError::UnknownNode(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Field at `slot`, with a range check.
    pub fn field(&self, node: NodeId, slot: usize) -> Result<&Field> {
        let n = self.node(node)?;
        n.fields.get(slot).ok_or(EngineError::SlotOutOfRange {
            node,
            slot,
            len: n.fields.len(),
        })
    }

    pub fn field_mut(&mut self, node: NodeId, slot: usize) -> Result<&mut Field> {
        let n = self.node_mut(node)?;
        let len = n.fields.len();
        n.fields
            .get_mut(slot)
            .ok_or(EngineError::SlotOutOfRange { node, slot, len })
    }

    /// Insert a new unattached composite and return its handle.
    pub fn insert_node(&mut self, kind: CompositeKind, fields: Vec<Field>) -> Result<NodeId> {
        let id = NodeId(self.next_node);
        self.next_node = checked_inc(self.next_node, "node handle")?;
        self.nodes.insert(id, Node::new(kind, fields));
        Ok(id)
    }

    /// Node carrying object identity `id`.
    pub fn object_node(&self, id: &ObjectId) -> Result<NodeId> {
        if id.realm != self.realm {
            return Err(EngineError::UnresolvableReference(format!(
                "{} belongs to another realm",
                id
            )));
        }
        self.objects
            .get(&id.seq)
            .copied()
            .ok_or_else(|| EngineError::UnresolvableReference(format!("no object {}", id)))
    }

    /// Identity of `node`, if it has one.
    pub fn object_id(&self, node: NodeId) -> Option<ObjectId> {
        self.nodes
            .get(&node)
            .and_then(|n| n.object.as_ref())
            .map(|o| o.id.clone())
    }

    pub fn root(&self, name: &str) -> Option<NodeId> {
        self.roots.get(name).copied()
    }

    /// Number of objects with an identity.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_store_is_empty_and_realm_scoped() {
        let store = create_initial_store("gno.land/r/test");
        assert!(store.nodes.is_empty());
        assert_eq!(store.realm, RealmId::from_path("gno.land/r/test"));
        assert_eq!(store.identities.last_allocated(), 0);
        assert_eq!(store.step, 0);
    }

    #[test]
    fn node_handles_are_sequential() {
        let mut store = create_initial_store("gno.land/r/test");
        let a = store.insert_node(CompositeKind::Struct, vec![]).unwrap();
        let b = store.insert_node(CompositeKind::Array, vec![]).unwrap();
        assert_eq!(a, NodeId(1));
        assert_eq!(b, NodeId(2));
    }

    #[test]
    fn field_access_is_range_checked() {
        let mut store = create_initial_store("gno.land/r/test");
        let a = store
            .insert_node(CompositeKind::Struct, vec![Field::int(1)])
            .unwrap();
        assert_eq!(store.field(a, 0).unwrap(), &Field::int(1));
        assert_eq!(
            store.field(a, 3).unwrap_err(),
            EngineError::SlotOutOfRange { node: a, slot: 3, len: 1 }
        );
        assert_eq!(
            store.field(NodeId(99), 0).unwrap_err(),
            EngineError::UnknownNode(NodeId(99))
        );
    }

    #[test]
    fn store_survives_json_round_trip() {
        let mut store = create_initial_store("gno.land/r/test");
        store
            .insert_node(CompositeKind::Map, vec![Field::string("k")])
            .unwrap();
        let json = serde_json::to_string(&store).unwrap();
        let back: RealmStore = serde_json::from_str(&json).unwrap();
        assert_eq!(back, store);
    }
}
