/// RealmEngine v1 — Escape Analyzer
///
/// A composite reachable from a second slot escapes: it gets an identity,
/// its reference count covers every slot pointing at it, and every slot
/// (the owning one included) serializes it by identity from then on.
/// Escape is sticky. `is_escaped` never clears, even when the count falls
/// back to one, because replicas may already hold by-identity pointers.

use std::collections::VecDeque;

use tracing::debug;

use crate::arithmetic::{checked_dec, checked_inc};
use crate::domain::{Hashlet, Holder, ObjectId, ObjectInfo};
use crate::error::{EngineError, Result};
use crate::graph::{embedded_objects, is_owner_ancestor, owned_children};
use crate::modtime::StepTracker;
use crate::ownership::{attach, clear_slot, require_ref_slot};
use crate::state::RealmStore;
use crate::value::{NodeId, Value};

/// Point `from[slot]` at `value` without taking ownership. A value nobody
/// holds yet is attached instead, since its first slot is its owner,
/// unless `from` lives inside `value` itself: such a back-pointer stays
/// non-owning and `value` waits for a real owner until commit.
pub fn add_reference(
    store: &mut RealmStore,
    tracker: &mut StepTracker,
    from: NodeId,
    slot: usize,
    value: NodeId,
) -> Result<()> {
    require_ref_slot(store, from, slot)?;
    if store.field(from, slot)?.value == Value::Ref(value) {
        return Ok(());
    }
    let target = store.node(value)?;
    let unheld = target.holder.is_unattached();
    if unheld && target.ref_count == 0 && !is_owner_ancestor(store, value, from)? {
        return attach(store, tracker, from, slot, value);
    }

    clear_slot(store, tracker, from, slot)?;
    store.field_mut(from, slot)?.value = Value::Ref(value);
    tracker.touch_enclosing(store, from)?;
    if unheld {
        // Settled at commit if still unheld by then.
        tracker.schedule_release(value);
    }
    on_reference_added(store, tracker, value)
}

/// Clear a slot that holds a composite reference, owning or not.
pub fn remove_reference(
    store: &mut RealmStore,
    tracker: &mut StepTracker,
    from: NodeId,
    slot: usize,
) -> Result<()> {
    match store.field(from, slot)?.value {
        Value::Ref(_) => clear_slot(store, tracker, from, slot),
        _ => Err(EngineError::InvalidField {
            node: from,
            slot,
            reason: "slot holds no composite reference".to_string(),
        }),
    }
}

/// A new non-owning slot now points at `value`.
pub fn on_reference_added(store: &mut RealmStore, tracker: &mut StepTracker, value: NodeId) -> Result<()> {
    {
        let n = store.node_mut(value)?;
        n.ref_count = checked_inc(n.ref_count, "ref_count")?;
    }
    if store.node(value)?.is_object() {
        tracker.touch(value);
    }
    escape_if_shared(store, tracker, value)
}

/// A non-owning slot stopped pointing at `value`. Reaching zero only
/// schedules the release; the step may still re-attach it.
pub fn on_reference_removed(
    store: &mut RealmStore,
    tracker: &mut StepTracker,
    value: NodeId,
) -> Result<()> {
    let (count, is_object) = {
        let n = store.node_mut(value)?;
        n.ref_count = checked_dec(n.ref_count, "ref_count")?;
        if n.ref_count == 0 {
            n.holder = Holder::Unattached;
        }
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

/// Promote `value` if more than one slot holds it: inline values get an
/// identity, identified values get the sticky escape bit.
pub fn escape_if_shared(store: &mut RealmStore, tracker: &mut StepTracker, value: NodeId) -> Result<()> {
    let n = store.node(value)?;
    if n.ref_count <= 1 {
        return Ok(());
    }
    let owning_parent = n.holder.owning_slot().map(|(parent, _)| parent);
    let escaped = n.object.as_ref().map(|o| o.is_escaped);
    match escaped {
        None => {
            let id = assign_identity(store, tracker, value, true)?;
            debug!(object_id = %id, node = %value, "value escaped");
            // The owning slot switches from an inline body to an identity.
            if let Some(parent) = owning_parent {
                tracker.touch_enclosing(store, parent)?;
            }
            // Objects embedded beneath it now name it as their owner.
            for embedded in embedded_objects(store, value)? {
                tracker.touch(embedded);
            }
        }
        Some(false) => {
            if let Some(info) = store.node_mut(value)?.object.as_mut() {
                info.is_escaped = true;
                debug!(object_id = %info.id, "object escaped");
            }
            tracker.touch(value);
        }
        Some(true) => {}
    }
    Ok(())
}

/// Give `node` a fresh identity. The single promotion point for both
/// escapes and root bindings.
pub fn assign_identity(
    store: &mut RealmStore,
    tracker: &mut StepTracker,
    node: NodeId,
    escaped: bool,
) -> Result<ObjectId> {
    if let Some(existing) = store.node(node)?.object_id() {
        return Err(EngineError::invariant(
            "identity_stable",
            format!("{} already carries identity {}", node, existing),
        ));
    }
    let id = store.identities.allocate()?;
    store.objects.insert(id.seq, node);
    store.node_mut(node)?.object = Some(ObjectInfo {
        id: id.clone(),
        owner_id: None,
        mod_time: 0,
        is_escaped: escaped,
        content_hash: Hashlet::zero(),
    });
    tracker.record_created(id.clone());
    tracker.touch(node);
    Ok(id)
}

/// Release every scheduled composite whose count is still zero, cascading
/// through the slots it held. Runs once per step, before hashing.
///
/// A scheduled composite that is still unheld but referenced is settled
/// once the zero-count releases have drained: if every reference to it
/// comes from its own subtree it is garbage and released with it,
/// otherwise it becomes a realm-held escaped object.
pub fn sweep(store: &mut RealmStore, tracker: &mut StepTracker) -> Result<()> {
    let mut queue: VecDeque<NodeId> = tracker.take_scheduled().into();
    let mut unheld: Vec<NodeId> = Vec::new();
    loop {
        while let Some(node) = queue.pop_front() {
            let Some((count, is_unheld)) = store
                .nodes
                .get(&node)
                .map(|n| (n.ref_count, n.holder.is_unattached()))
            else {
                continue;
            };
            if count == 0 {
                release(store, tracker, node, &mut queue)?;
            } else if is_unheld {
                unheld.push(node);
            }
        }
        unheld.sort_unstable();
        unheld.dedup();
        for node in std::mem::take(&mut unheld) {
            let still_unheld = store
                .nodes
                .get(&node)
                .is_some_and(|n| n.holder.is_unattached() && n.ref_count > 0);
            if !still_unheld {
                continue;
            }
            if drop_self_references(store, node)? {
                queue.push_back(node);
            } else {
                hold_by_realm(store, tracker, node)?;
            }
        }
        if queue.is_empty() {
            return Ok(());
        }
    }
}

fn release(
    store: &mut RealmStore,
    tracker: &mut StepTracker,
    node: NodeId,
    queue: &mut VecDeque<NodeId>,
) -> Result<()> {
    let Some(released) = store.nodes.remove(&node) else {
        return Ok(());
    };
    if let Some(info) = released.object {
        store.objects.remove(&info.id.seq);
        debug!(object_id = %info.id, "released object");
        tracker.record_deleted(info.id);
    }

    for (slot, field) in released.fields.iter().enumerate() {
        let Value::Ref(child) = field.value else {
            continue;
        };
        let c = store.nodes.get_mut(&child).ok_or_else(|| {
            EngineError::UnresolvableReference(format!(
                "released {}[{}] pointed at missing {}",
                node, slot, child
            ))
        })?;
        c.ref_count = checked_dec(c.ref_count, "ref_count")?;
        if c.holder == (Holder::Slot { parent: node, slot }) {
            c.holder = if c.ref_count > 0 {
                Holder::Realm
            } else {
                Holder::Unattached
            };
        }
        if c.ref_count == 0 {
            c.holder = Holder::Unattached;
            queue.push_back(child);
        }
        if c.object.is_some() {
            tracker.touch(child);
        }
    }
    Ok(())
}

/// If every reference to the unheld `node` comes from inside its own
/// owned subtree, clear those slots and return true: nothing outside can
/// reach it.
fn drop_self_references(store: &mut RealmStore, node: NodeId) -> Result<bool> {
    let mut subtree = vec![node];
    let mut i = 0;
    while i < subtree.len() {
        let children = owned_children(store, subtree[i])?;
        subtree.extend(children.into_iter().map(|(_, c)| c));
        i += 1;
    }

    let mut back_refs = Vec::new();
    for member in &subtree {
        for (slot, field) in store.node(*member)?.fields.iter().enumerate() {
            if field.value == Value::Ref(node) {
                back_refs.push((*member, slot));
            }
        }
    }
    if back_refs.len() as u64 != store.node(node)?.ref_count {
        return Ok(false);
    }
    for (member, slot) in back_refs {
        store.field_mut(member, slot)?.value = Value::Nil;
    }
    store.node_mut(node)?.ref_count = 0;
    Ok(true)
}

/// An unheld composite still referenced from outside its subtree: the
/// realm keeps it, as an escaped object.
fn hold_by_realm(store: &mut RealmStore, tracker: &mut StepTracker, node: NodeId) -> Result<()> {
    store.node_mut(node)?.holder = Holder::Realm;
    if store.node(node)?.is_object() {
        if let Some(info) = store.node_mut(node)?.object.as_mut() {
            info.is_escaped = true;
        }
        tracker.touch(node);
    } else {
        let id = assign_identity(store, tracker, node, true)?;
        debug!(object_id = %id, node = %node, "unheld value kept by the realm");
    }
    for embedded in embedded_objects(store, node)? {
        tracker.touch(embedded);
    }
    Ok(())
}
