/// RealmEngine v1 — Mutation Dispatch
///
/// Routes each mutation event to the ownership tracker or the escape
/// analyzer. Works on the step's private copy of the store; the committed
/// base is never touched here.

use tracing::debug;

use crate::error::{EngineError, Result};
use crate::escape::{add_reference, remove_reference};
use crate::events::MutationEvent;
use crate::modtime::StepTracker;
use crate::ownership::{attach, bind_root, check_plain_value, detach, set_value, unbind_root};
use crate::state::RealmStore;
use crate::value::{CompositeKind, Field, NodeId};

// ---------------------------------------------------------------------------
// Public dispatcher
// ---------------------------------------------------------------------------

/// Apply one mutation. Returns the node handle an `Alloc` produced.
pub fn apply_event(
    store: &mut RealmStore,
    tracker: &mut StepTracker,
    event: &MutationEvent,
) -> Result<Option<NodeId>> {
    match event {
        MutationEvent::Alloc { kind, fields } => alloc(store, tracker, *kind, fields.clone()).map(Some),
        MutationEvent::BindRoot { name, value } => bind_root(store, tracker, name, *value).map(|_| None),
        MutationEvent::UnbindRoot { name } => unbind_root(store, tracker, name).map(|_| None),
        MutationEvent::Attach { owner, slot, value } => {
            attach(store, tracker, *owner, *slot, *value).map(|_| None)
        }
        MutationEvent::Detach { owner, slot } => detach(store, tracker, *owner, *slot).map(|_| None),
        MutationEvent::AddReference { from, slot, value } => {
            add_reference(store, tracker, *from, *slot, *value).map(|_| None)
        }
        MutationEvent::RemoveReference { from, slot } => {
            remove_reference(store, tracker, *from, *slot).map(|_| None)
        }
        MutationEvent::SetValue { node, slot, value } => {
            set_value(store, tracker, *node, *slot, value.clone()).map(|_| None)
        }
    }
}

/// Create an unattached composite. It is released at commit unless
/// something holds it by then.
pub fn alloc(
    store: &mut RealmStore,
    tracker: &mut StepTracker,
    kind: CompositeKind,
    fields: Vec<Field>,
) -> Result<NodeId> {
    let pending = NodeId(store.next_node);
    for (slot, field) in fields.iter().enumerate() {
        check_plain_value(store, pending, slot, &field.value)?;
        if !field.tag.admits(&field.value) {
            return Err(EngineError::TypeMismatch {
                node: pending,
                slot,
                tag: field.tag.to_string(),
                value: field.value.kind_name().to_string(),
            });
        }
    }
    let node = store.insert_node(kind, fields)?;
    tracker.schedule_release(node);
    debug!(node = %node, kind = kind.as_str(), "allocated composite");
    Ok(node)
}
