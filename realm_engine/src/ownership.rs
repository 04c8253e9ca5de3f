/// RealmEngine v1 — Ownership Tracker
///
/// Maintains the single owning edge of every composite: a field slot of
/// a parent, a named realm root, or (for escaped objects that lost their
/// owning slot) the realm itself. Attaching a value that already has an
/// owner transfers it: the old edge is cleared before the new one is set.

use tracing::debug;

use crate::arithmetic::{checked_dec, checked_inc};
use crate::domain::Holder;
use crate::error::{EngineError, Result};
use crate::escape::{assign_identity, escape_if_shared, on_reference_removed};
use crate::graph::{embedded_objects, is_owner_ancestor};
use crate::modtime::StepTracker;
use crate::state::RealmStore;
use crate::value::{NodeId, Value};

/// Install `value` into `owner[slot]` as its owning edge.
pub fn attach(
    store: &mut RealmStore,
    tracker: &mut StepTracker,
    owner: NodeId,
    slot: usize,
    value: NodeId,
) -> Result<()> {
    require_ref_slot(store, owner, slot)?;
    if store.node(value)?.holder == (Holder::Slot { parent: owner, slot }) {
        return Ok(());
    }
    if is_owner_ancestor(store, value, owner)? {
        return Err(EngineError::OwnershipCycle { owner, value });
    }

    clear_slot(store, tracker, owner, slot)?;
    release_owning_edge(store, tracker, value)?;

    store.field_mut(owner, slot)?.value = Value::Ref(value);
    {
        let n = store.node_mut(value)?;
        n.holder = Holder::Slot { parent: owner, slot };
        n.ref_count = checked_inc(n.ref_count, "ref_count")?;
    }
    tracker.touch_enclosing(store, owner)?;
    if store.node(value)?.is_object() {
        tracker.touch(value);
    }
    for embedded in embedded_objects(store, value)? {
        tracker.touch(embedded);
    }
    escape_if_shared(store, tracker, value)
}

/// Remove the owning edge held by `owner[slot]` and return the value that
/// was detached. The value is released at commit unless it is re-attached
/// or still referenced elsewhere.
pub fn detach(
    store: &mut RealmStore,
    tracker: &mut StepTracker,
    owner: NodeId,
    slot: usize,
) -> Result<NodeId> {
    let value = match store.field(owner, slot)?.value {
        Value::Ref(v) => v,
        _ => return Err(EngineError::NotOwningSlot { node: owner, slot }),
    };
    if store.node(value)?.holder != (Holder::Slot { parent: owner, slot }) {
        return Err(EngineError::NotOwningSlot { node: owner, slot });
    }

    store.field_mut(owner, slot)?.value = Value::Nil;
    tracker.touch_enclosing(store, owner)?;
    drop_owning_edge(store, tracker, value)?;
    Ok(value)
}

/// Clear whatever `node[slot]` holds: owning edges are detached,
/// non-owning references released, primitives overwritten with nil.
pub fn clear_slot(
    store: &mut RealmStore,
    tracker: &mut StepTracker,
    node: NodeId,
    slot: usize,
) -> Result<()> {
    match store.field(node, slot)?.value.clone() {
        Value::Nil => Ok(()),
        Value::Ref(target) => {
            let owning = store.node(target)?.holder == (Holder::Slot { parent: node, slot });
            if owning {
                detach(store, tracker, node, slot).map(|_| ())
            } else {
                store.field_mut(node, slot)?.value = Value::Nil;
                tracker.touch_enclosing(store, node)?;
                on_reference_removed(store, tracker, target)
            }
        }
        _ => {
            store.field_mut(node, slot)?.value = Value::Nil;
            tracker.touch_enclosing(store, node)
        }
    }
}

/// Assign a non-composite value to `node[slot]`.
pub fn set_value(
    store: &mut RealmStore,
    tracker: &mut StepTracker,
    node: NodeId,
    slot: usize,
    value: Value,
) -> Result<()> {
    check_plain_value(store, node, slot, &value)?;
    let field = store.field(node, slot)?;
    if !field.tag.admits(&value) {
        return Err(EngineError::TypeMismatch {
            node,
            slot,
            tag: field.tag.to_string(),
            value: value.kind_name().to_string(),
        });
    }
    if field.value == value {
        return Ok(());
    }
    clear_slot(store, tracker, node, slot)?;
    store.field_mut(node, slot)?.value = value;
    tracker.touch_enclosing(store, node)
}

/// Bind `value` to the realm root `name`. Root composites always carry
/// an identity; the binding counts as one reference.
pub fn bind_root(
    store: &mut RealmStore,
    tracker: &mut StepTracker,
    name: &str,
    value: NodeId,
) -> Result<()> {
    if name.is_empty() {
        return Err(EngineError::RootBinding("root name must not be empty".to_string()));
    }
    match store.root(name) {
        Some(current) if current == value => return Ok(()),
        Some(_) => {
            unbind_root(store, tracker, name)?;
        }
        None => {}
    }

    release_owning_edge(store, tracker, value)?;
    store.roots.insert(name.to_string(), value);
    {
        let n = store.node_mut(value)?;
        n.holder = Holder::Root(name.to_string());
        n.ref_count = checked_inc(n.ref_count, "ref_count")?;
    }

    if !store.node(value)?.is_object() {
        assign_identity(store, tracker, value, false)?;
    }
    for embedded in embedded_objects(store, value)? {
        tracker.touch(embedded);
    }
    tracker.touch(value);
    escape_if_shared(store, tracker, value)?;
    debug!(root = name, node = %value, "bound realm root");
    Ok(())
}

/// Drop the root binding `name`.
pub fn unbind_root(store: &mut RealmStore, tracker: &mut StepTracker, name: &str) -> Result<NodeId> {
    let value = store
        .roots
        .remove(name)
        .ok_or_else(|| EngineError::RootBinding(format!("root {:?} is not bound", name)))?;
    drop_owning_edge(store, tracker, value)?;
    Ok(value)
}

/// Decrement for a lost owning edge. Escaped objects that are still
/// referenced become realm-held; anything at zero is scheduled.
fn drop_owning_edge(store: &mut RealmStore, tracker: &mut StepTracker, value: NodeId) -> Result<()> {
    let (count, is_object) = {
        let n = store.node_mut(value)?;
        n.ref_count = checked_dec(n.ref_count, "ref_count")?;
        n.holder = if n.ref_count > 0 {
            Holder::Realm
        } else {
            Holder::Unattached
        };
        (n.ref_count, n.is_object())
    };
    if count == 0 {
        tracker.schedule_release(value);
    }
    if is_object {
        tracker.touch(value);
    }
    Ok(())
}

/// First half of a transfer: clear the current owning edge of `value`
/// without scheduling it, since it is re-held immediately.
fn release_owning_edge(store: &mut RealmStore, tracker: &mut StepTracker, value: NodeId) -> Result<()> {
    match store.node(value)?.holder.clone() {
        Holder::Slot { parent, slot } => {
            store.field_mut(parent, slot)?.value = Value::Nil;
            tracker.touch_enclosing(store, parent)?;
        }
        Holder::Root(name) => {
            store.roots.remove(&name);
        }
        Holder::Realm | Holder::Unattached => return Ok(()),
    }
    let n = store.node_mut(value)?;
    n.ref_count = checked_dec(n.ref_count, "ref_count")?;
    n.holder = Holder::Unattached;
    Ok(())
}

/// Values written without going through the ownership tracker: no local
/// composite links, and foreign references must really be foreign.
pub(crate) fn check_plain_value(store: &RealmStore, node: NodeId, slot: usize, value: &Value) -> Result<()> {
    let reason = match value {
        Value::Ref(_) => "composite links go through attach or add_reference",
        Value::Foreign { id, .. } if id.realm == store.realm => {
            "objects of this realm are referenced by handle, not as foreign values"
        }
        _ => return Ok(()),
    };
    Err(EngineError::InvalidField {
        node,
        slot,
        reason: reason.to_string(),
    })
}

/// Slot must exist and be able to hold a composite reference.
pub(crate) fn require_ref_slot(store: &RealmStore, node: NodeId, slot: usize) -> Result<()> {
    let field = store.field(node, slot)?;
    if !field.tag.admits(&Value::Ref(node)) {
        return Err(EngineError::TypeMismatch {
            node,
            slot,
            tag: field.tag.to_string(),
            value: "ref".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::create_initial_store;
    use crate::value::{CompositeKind, Field, TypeTag};

    fn ptr() -> Field {
        Field::nil_pointer("T")
    }

    fn store_with(n: usize) -> (RealmStore, StepTracker, Vec<NodeId>) {
        let mut store = create_initial_store("gno.land/r/own");
        let nodes = (0..n)
            .map(|_| store.insert_node(CompositeKind::Struct, vec![ptr(), ptr()]).unwrap())
            .collect();
        (store, StepTracker::new(1), nodes)
    }

    #[test]
    fn root_binding_assigns_identity() {
        let (mut store, mut tracker, nodes) = store_with(1);
        bind_root(&mut store, &mut tracker, "main", nodes[0]).unwrap();
        let n = store.node(nodes[0]).unwrap();
        assert_eq!(n.holder, Holder::Root("main".to_string()));
        assert_eq!(n.ref_count, 1);
        let info = n.object.as_ref().unwrap();
        assert_eq!(info.id.seq, 1);
        assert!(!info.is_escaped);
    }

    #[test]
    fn attach_transfers_ownership() {
        let (mut store, mut tracker, nodes) = store_with(3);
        let (a, b, v) = (nodes[0], nodes[1], nodes[2]);
        attach(&mut store, &mut tracker, a, 0, v).unwrap();
        attach(&mut store, &mut tracker, b, 1, v).unwrap();
        assert_eq!(store.field(a, 0).unwrap().value, Value::Nil);
        assert_eq!(store.field(b, 1).unwrap().value, Value::Ref(v));
        let n = store.node(v).unwrap();
        assert_eq!(n.holder, Holder::Slot { parent: b, slot: 1 });
        assert_eq!(n.ref_count, 1);
        assert!(n.object.is_none());
    }

    #[test]
    fn attach_is_idempotent() {
        let (mut store, mut tracker, nodes) = store_with(2);
        attach(&mut store, &mut tracker, nodes[0], 0, nodes[1]).unwrap();
        attach(&mut store, &mut tracker, nodes[0], 0, nodes[1]).unwrap();
        assert_eq!(store.node(nodes[1]).unwrap().ref_count, 1);
    }

    #[test]
    fn attach_under_own_descendant_is_a_cycle() {
        let (mut store, mut tracker, nodes) = store_with(2);
        attach(&mut store, &mut tracker, nodes[0], 0, nodes[1]).unwrap();
        let err = attach(&mut store, &mut tracker, nodes[1], 0, nodes[0]).unwrap_err();
        assert_eq!(
            err,
            EngineError::OwnershipCycle {
                owner: nodes[1],
                value: nodes[0]
            }
        );
    }

    #[test]
    fn detach_schedules_release() {
        let (mut store, mut tracker, nodes) = store_with(2);
        attach(&mut store, &mut tracker, nodes[0], 0, nodes[1]).unwrap();
        let out = detach(&mut store, &mut tracker, nodes[0], 0).unwrap();
        assert_eq!(out, nodes[1]);
        assert_eq!(store.node(nodes[1]).unwrap().ref_count, 0);
        assert_eq!(tracker.take_scheduled(), vec![nodes[1]]);
    }

    #[test]
    fn set_value_checks_tags() {
        let mut store = create_initial_store("gno.land/r/own");
        let mut tracker = StepTracker::new(1);
        let a = store
            .insert_node(CompositeKind::Struct, vec![Field::int(1)])
            .unwrap();
        set_value(&mut store, &mut tracker, a, 0, Value::Int(2)).unwrap();
        assert_eq!(store.field(a, 0).unwrap().value, Value::Int(2));
        assert!(matches!(
            set_value(&mut store, &mut tracker, a, 0, Value::Bool(true)).unwrap_err(),
            EngineError::TypeMismatch { .. }
        ));
        assert!(matches!(
            set_value(&mut store, &mut tracker, a, 0, Value::Ref(a)).unwrap_err(),
            EngineError::InvalidField { .. }
        ));
    }

    #[test]
    fn primitive_slot_cannot_hold_composites() {
        let mut store = create_initial_store("gno.land/r/own");
        let mut tracker = StepTracker::new(1);
        let a = store
            .insert_node(CompositeKind::Struct, vec![Field::new(TypeTag::String, Value::Nil)])
            .unwrap();
        let b = store.insert_node(CompositeKind::Struct, vec![]).unwrap();
        assert!(matches!(
            attach(&mut store, &mut tracker, a, 0, b).unwrap_err(),
            EngineError::TypeMismatch { .. }
        ));
    }

    #[test]
    fn rebinding_a_root_releases_the_old_value() {
        let (mut store, mut tracker, nodes) = store_with(2);
        bind_root(&mut store, &mut tracker, "x", nodes[0]).unwrap();
        bind_root(&mut store, &mut tracker, "x", nodes[1]).unwrap();
        assert_eq!(store.root("x"), Some(nodes[1]));
        assert_eq!(store.node(nodes[0]).unwrap().ref_count, 0);
        assert!(unbind_root(&mut store, &mut tracker, "y").is_err());
        assert!(bind_root(&mut store, &mut tracker, "", nodes[0]).is_err());
    }
}
