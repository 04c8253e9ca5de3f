/// RealmEngine v1 — Invariant Checks
///
/// Hard-fail validation of a committed store and of the transition from
/// one committed store to the next. Every check returns the first
/// violation as `EngineError::InvariantViolation` tagged with the check
/// name; the step that produced it is discarded.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::Holder;
use crate::error::{EngineError, Result};
use crate::graph::{detect_owner_cycles, owner_id, owner_object};
use crate::hashing::content_hash;
use crate::state::RealmStore;
use crate::value::{NodeId, Value};

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run every structural check against a committed store.
pub fn validate_invariants(store: &RealmStore) -> Result<()> {
    check_structure(store)?;
    check_object_metadata(store, store.nodes.keys().copied())
}

/// Commit-time form of [`validate_invariants`]. The structure is checked
/// in full; owner ids, hashes and mod times only for the `touched` objects
/// and every object above them, the only records a step can change.
pub fn validate_commit(store: &RealmStore, touched: &[NodeId]) -> Result<()> {
    check_structure(store)?;
    let mut scope = BTreeSet::new();
    for node in touched {
        let mut current = store.contains(*node).then_some(*node);
        while let Some(n) = current {
            if !scope.insert(n) {
                break;
            }
            current = owner_object(store, n)?;
        }
    }
    check_object_metadata(store, scope)
}

/// Checks relating the committed store `next` to its base `prev`.
pub fn validate_transition(prev: &RealmStore, next: &RealmStore) -> Result<()> {
    check_step_advance(prev, next)?;
    check_identity_monotonic(prev, next)?;
    check_escape_sticky(prev, next)?;
    check_mod_time_monotonic(prev, next)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Store checks
// ---------------------------------------------------------------------------

fn check_structure(store: &RealmStore) -> Result<()> {
    check_identity_index(store)?;
    check_resolvable_refs(store)?;
    check_owner_edges(store)?;
    check_no_owner_cycles(store)?;
    check_ref_counts(store)?;
    check_escape_state(store)
}

/// The identity index and the objects agree both ways, and no identity is
/// past the allocator's high-water mark.
fn check_identity_index(store: &RealmStore) -> Result<()> {
    let last = store.identities.last_allocated();
    for (seq, node) in &store.objects {
        let n = store.nodes.get(node).ok_or_else(|| {
            EngineError::invariant(
                "identity_index",
                format!("identity {} indexes missing {}", seq, node),
            )
        })?;
        match &n.object {
            Some(info) if info.id.seq == *seq && info.id.realm == store.realm => {}
            _ => {
                return Err(EngineError::invariant(
                    "identity_index",
                    format!("identity {} indexes {} which carries another identity", seq, node),
                ))
            }
        }
        if *seq == 0 || *seq > last {
            return Err(EngineError::invariant(
                "identity_index",
                format!("identity {} was never issued (last issued {})", seq, last),
            ));
        }
    }
    for (id, n) in &store.nodes {
        if let Some(info) = &n.object {
            if store.objects.get(&info.id.seq) != Some(id) {
                return Err(EngineError::invariant(
                    "identity_index",
                    format!("object {} on {} is not indexed", info.id, id),
                ));
            }
        }
    }
    Ok(())
}

/// Every slot reference names a live node; foreign values name another realm.
fn check_resolvable_refs(store: &RealmStore) -> Result<()> {
    for (id, n) in &store.nodes {
        for (slot, field) in n.fields.iter().enumerate() {
            match &field.value {
                Value::Ref(target) if !store.nodes.contains_key(target) => {
                    return Err(EngineError::UnresolvableReference(format!(
                        "{}[{}] points at missing {}",
                        id, slot, target
                    )));
                }
                Value::Foreign { id: foreign, .. } if foreign.realm == store.realm => {
                    return Err(EngineError::invariant(
                        "foreign_realm",
                        format!("{}[{}] holds local {} as a foreign reference", id, slot, foreign),
                    ));
                }
                _ => {}
            }
        }
    }
    for (name, node) in &store.roots {
        if !store.nodes.contains_key(node) {
            return Err(EngineError::UnresolvableReference(format!(
                "root {:?} points at missing {}",
                name, node
            )));
        }
    }
    Ok(())
}

/// Holder records match the slots and roots that claim them, and inline
/// composites are only ever reached through their owning slot.
fn check_owner_edges(store: &RealmStore) -> Result<()> {
    for (id, n) in &store.nodes {
        match &n.holder {
            Holder::Slot { parent, slot } => {
                let held = store.field(*parent, *slot).map(|f| &f.value);
                if held != Ok(&Value::Ref(*id)) {
                    return Err(EngineError::invariant(
                        "single_owner",
                        format!("{} claims owner {}[{}] which does not hold it", id, parent, slot),
                    ));
                }
            }
            Holder::Root(name) => {
                if store.roots.get(name) != Some(id) {
                    return Err(EngineError::invariant(
                        "single_owner",
                        format!("{} claims root {:?} which is bound elsewhere", id, name),
                    ));
                }
            }
            Holder::Realm => {
                if !n.object.as_ref().is_some_and(|o| o.is_escaped) {
                    return Err(EngineError::invariant(
                        "single_owner",
                        format!("{} is realm-held without being an escaped object", id),
                    ));
                }
            }
            Holder::Unattached => {
                return Err(EngineError::invariant(
                    "single_owner",
                    format!("{} survived the step without any holder", id),
                ))
            }
        }
    }
    for (name, node) in &store.roots {
        if store.node(*node)?.holder != Holder::Root(name.clone()) {
            return Err(EngineError::invariant(
                "single_owner",
                format!("root {:?} binds {} which has another owner", name, node),
            ));
        }
    }
    for (id, n) in &store.nodes {
        for (slot, field) in n.fields.iter().enumerate() {
            if let Value::Ref(target) = field.value {
                let t = store.node(target)?;
                let owning = t.holder == (Holder::Slot { parent: *id, slot });
                if !owning && !t.is_object() {
                    return Err(EngineError::invariant(
                        "single_owner",
                        format!("inline {} is shared through {}[{}]", target, id, slot),
                    ));
                }
            }
        }
    }
    Ok(())
}

fn check_no_owner_cycles(store: &RealmStore) -> Result<()> {
    let cycles = detect_owner_cycles(store);
    if let Some(cycle) = cycles.first() {
        let path: Vec<String> = cycle.iter().map(|n| n.to_string()).collect();
        return Err(EngineError::invariant(
            "owner_forest",
            format!("owner edges form a cycle: {}", path.join(" -> ")),
        ));
    }
    Ok(())
}

/// `ref_count` equals the number of slots and roots pointing at a node,
/// and every surviving node is referenced at least once.
fn check_ref_counts(store: &RealmStore) -> Result<()> {
    let mut incoming: BTreeMap<NodeId, u64> = BTreeMap::new();
    for n in store.nodes.values() {
        for field in &n.fields {
            if let Value::Ref(target) = field.value {
                *incoming.entry(target).or_insert(0) += 1;
            }
        }
    }
    for node in store.roots.values() {
        *incoming.entry(*node).or_insert(0) += 1;
    }
    for (id, n) in &store.nodes {
        let counted = incoming.get(id).copied().unwrap_or(0);
        if counted != n.ref_count {
            return Err(EngineError::invariant(
                "ref_count_consistent",
                format!("{} records ref_count {} but {} slots point at it", id, n.ref_count, counted),
            ));
        }
        if n.ref_count == 0 {
            return Err(EngineError::invariant(
                "ref_count_live",
                format!("{} survived the step with ref_count 0", id),
            ));
        }
    }
    Ok(())
}

/// A composite held by more than one slot is an escaped object.
fn check_escape_state(store: &RealmStore) -> Result<()> {
    for (id, n) in &store.nodes {
        if n.ref_count > 1 && !n.object.as_ref().is_some_and(|o| o.is_escaped) {
            return Err(EngineError::invariant(
                "escape_on_share",
                format!("{} has ref_count {} but is not escaped", id, n.ref_count),
            ));
        }
    }
    Ok(())
}

/// Stored owner ids, hashes and mod times of the objects among `nodes`
/// agree with the graph.
fn check_object_metadata(store: &RealmStore, nodes: impl IntoIterator<Item = NodeId>) -> Result<()> {
    for id in nodes {
        let Some(info) = store.nodes.get(&id).and_then(|n| n.object.as_ref()) else {
            continue;
        };
        let owner = owner_id(store, id)?;
        if owner != info.owner_id {
            return Err(EngineError::invariant(
                "owner_id_consistent",
                format!(
                    "{} records owner {:?} but is held under {:?}",
                    info.id,
                    info.owner_id.as_ref().map(|o| o.to_string()),
                    owner.as_ref().map(|o| o.to_string())
                ),
            ));
        }
        let fresh = content_hash(store, id)?;
        if fresh != info.content_hash {
            return Err(EngineError::invariant(
                "content_hash_pure",
                format!("{} records hash {} but its fields hash to {}", info.id, info.content_hash, fresh),
            ));
        }
        if info.mod_time == 0 || info.mod_time > store.step {
            return Err(EngineError::invariant(
                "mod_time_range",
                format!("{} has mod_time {} at step {}", info.id, info.mod_time, store.step),
            ));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Transition checks
// ---------------------------------------------------------------------------

fn check_step_advance(prev: &RealmStore, next: &RealmStore) -> Result<()> {
    if next.realm != prev.realm || next.step != prev.step + 1 {
        return Err(EngineError::invariant(
            "step_sequence",
            format!(
                "step {} of {} cannot follow step {} of {}",
                next.step, next.realm, prev.step, prev.realm
            ),
        ));
    }
    Ok(())
}

/// Identities are never reissued: new objects sit above the previous
/// high-water mark and surviving identities stay on their node.
fn check_identity_monotonic(prev: &RealmStore, next: &RealmStore) -> Result<()> {
    let before = prev.identities.last_allocated();
    if next.identities.last_allocated() < before {
        return Err(EngineError::invariant(
            "identity_monotonic",
            format!(
                "allocator moved back from {} to {}",
                before,
                next.identities.last_allocated()
            ),
        ));
    }
    for (seq, node) in &next.objects {
        match prev.objects.get(seq) {
            Some(old) if old != node => {
                return Err(EngineError::invariant(
                    "identity_stable",
                    format!("identity {} moved from {} to {}", seq, old, node),
                ))
            }
            None if *seq <= before => {
                return Err(EngineError::invariant(
                    "identity_unique",
                    format!("identity {} reissued after step {}", seq, prev.step),
                ))
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_escape_sticky(prev: &RealmStore, next: &RealmStore) -> Result<()> {
    for (seq, node) in &prev.objects {
        let was = prev
            .nodes
            .get(node)
            .and_then(|n| n.object.as_ref())
            .is_some_and(|o| o.is_escaped);
        if !was || !next.objects.contains_key(seq) {
            continue;
        }
        let still = next
            .nodes
            .get(node)
            .and_then(|n| n.object.as_ref())
            .is_some_and(|o| o.is_escaped);
        if !still {
            return Err(EngineError::invariant(
                "escape_sticky",
                format!("identity {} lost its escape bit", seq),
            ));
        }
    }
    Ok(())
}

fn check_mod_time_monotonic(prev: &RealmStore, next: &RealmStore) -> Result<()> {
    for (seq, node) in &prev.objects {
        let before = prev.nodes.get(node).and_then(|n| n.object.as_ref());
        let after = next.nodes.get(node).and_then(|n| n.object.as_ref());
        if let (Some(b), Some(a)) = (before, after) {
            if a.mod_time < b.mod_time {
                return Err(EngineError::invariant(
                    "mod_time_monotonic",
                    format!("identity {} mod_time moved from {} to {}", seq, b.mod_time, a.mod_time),
                ));
            }
        }
    }
    Ok(())
}
