/// RealmEngine v1 — Owner-Forest Utilities
///
/// Pure traversal over owner edges (child -> holder parent). Owner edges
/// form a forest; every walk here is bounded by the node count so a broken
/// graph surfaces as an invariant violation instead of a hang.

use std::collections::BTreeMap;

use crate::domain::{Holder, ObjectId};
use crate::error::{EngineError, Result};
use crate::state::RealmStore;
use crate::value::{NodeId, Value};

/// Nearest node at or above `node` (along owner edges) that has an
/// identity. Inline composites are embedded in that object's record.
pub fn enclosing_object(store: &RealmStore, node: NodeId) -> Result<Option<NodeId>> {
    let limit = store.nodes.len() + 1;
    let mut current = node;
    for _ in 0..limit {
        let n = store.node(current)?;
        if n.is_object() {
            return Ok(Some(current));
        }
        match n.holder {
            Holder::Slot { parent, .. } => current = parent,
            _ => return Ok(None),
        }
    }
    Err(EngineError::invariant(
        "owner_forest",
        format!("owner chain above {} does not terminate", node),
    ))
}

/// `owner_id` of an object: the enclosing object of its owning slot.
/// Roots and realm-held objects have none.
pub fn owner_object(store: &RealmStore, node: NodeId) -> Result<Option<NodeId>> {
    match store.node(node)?.holder {
        Holder::Slot { parent, .. } => enclosing_object(store, parent),
        _ => Ok(None),
    }
}

/// Identity form of [`owner_object`].
pub fn owner_id(store: &RealmStore, node: NodeId) -> Result<Option<ObjectId>> {
    Ok(owner_object(store, node)?.and_then(|owner| store.object_id(owner)))
}

/// Number of object ancestors above `node`. Children sort deeper than
/// their owners, which is the order hashes must be computed in.
pub fn object_depth(
    store: &RealmStore,
    node: NodeId,
    memo: &mut BTreeMap<NodeId, usize>,
) -> Result<usize> {
    let mut chain = Vec::new();
    let mut current = node;
    let limit = store.nodes.len() + 1;
    let base = loop {
        if let Some(d) = memo.get(&current) {
            break *d;
        }
        if chain.len() > limit {
            return Err(EngineError::invariant(
                "owner_forest",
                format!("owner chain above {} does not terminate", node),
            ));
        }
        chain.push(current);
        match owner_object(store, current)? {
            Some(owner) => current = owner,
            None => {
                chain.pop();
                memo.insert(current, 0);
                break 0;
            }
        }
    };
    let mut depth = base;
    for n in chain.into_iter().rev() {
        depth += 1;
        memo.insert(n, depth);
    }
    Ok(memo[&node])
}

/// Whether `ancestor` sits on the owner chain of `node` (or is `node`).
pub fn is_owner_ancestor(store: &RealmStore, ancestor: NodeId, node: NodeId) -> Result<bool> {
    let limit = store.nodes.len() + 1;
    let mut current = node;
    for _ in 0..limit {
        if current == ancestor {
            return Ok(true);
        }
        match store.node(current)?.holder {
            Holder::Slot { parent, .. } => current = parent,
            _ => return Ok(false),
        }
    }
    Err(EngineError::invariant(
        "owner_forest",
        format!("owner chain above {} does not terminate", node),
    ))
}

/// Composites owned directly by `node`, in slot order.
pub fn owned_children(store: &RealmStore, node: NodeId) -> Result<Vec<(usize, NodeId)>> {
    let n = store.node(node)?;
    let mut out = Vec::new();
    for (slot, field) in n.fields.iter().enumerate() {
        if let Value::Ref(child) = field.value {
            if store.node(child)?.holder == (Holder::Slot { parent: node, slot }) {
                out.push((slot, child));
            }
        }
    }
    Ok(out)
}

/// First layer of objects embedded beneath `node`: walks owned inline
/// composites and stops at every object it meets. These are the objects
/// whose `owner_id` moves when `node` is re-parented.
pub fn embedded_objects(store: &RealmStore, node: NodeId) -> Result<Vec<NodeId>> {
    let mut found = Vec::new();
    let mut stack: Vec<NodeId> = owned_children(store, node)?
        .into_iter()
        .rev()
        .map(|(_, c)| c)
        .collect();
    while let Some(current) = stack.pop() {
        if store.node(current)?.is_object() {
            found.push(current);
            continue;
        }
        for (_, child) in owned_children(store, current)?.into_iter().rev() {
            stack.push(child);
        }
    }
    Ok(found)
}

/// Detect cycles among owner edges. Uses iterative DFS with explicit
/// colour tracking, sorted traversal for determinism. A sound store
/// returns an empty list.
pub fn detect_owner_cycles(store: &RealmStore) -> Vec<Vec<NodeId>> {
    const WHITE: u8 = 0;
    const GREY: u8 = 1;
    const BLACK: u8 = 2;

    let mut colour: BTreeMap<NodeId, u8> = store.nodes.keys().map(|k| (*k, WHITE)).collect();
    let mut cycles: Vec<Vec<NodeId>> = Vec::new();

    for start in store.nodes.keys() {
        if colour[start] != WHITE {
            continue;
        }

        // Each node has at most one owner edge, so the DFS is a walk.
        let mut path: Vec<NodeId> = vec![*start];
        colour.insert(*start, GREY);

        while let Some(&node) = path.last() {
            let parent = match store.nodes.get(&node).map(|n| &n.holder) {
                Some(Holder::Slot { parent, .. }) => Some(*parent),
                _ => None,
            };
            match parent.map(|p| (p, colour.get(&p).copied().unwrap_or(BLACK))) {
                Some((p, GREY)) => {
                    let mut cycle = vec![p];
                    for n in path.iter().rev() {
                        cycle.push(*n);
                        if *n == p {
                            break;
                        }
                    }
                    cycles.push(cycle);
                    break;
                }
                Some((p, WHITE)) => {
                    colour.insert(p, GREY);
                    path.push(p);
                }
                _ => break,
            }
        }
        for n in path {
            colour.insert(n, BLACK);
        }
    }

    cycles
}
