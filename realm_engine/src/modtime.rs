/// RealmEngine v1 — Mutation / ModTime Tracker
///
/// Records, for one step, which objects were touched and in which order,
/// which composites were scheduled for release, and which identities were
/// created or deleted. `mark_dirty` decides whether a touched object
/// actually changed relative to its last committed snapshot.

use std::collections::BTreeSet;

use crate::domain::{Hashlet, ObjectId, ObjectInfo};
use crate::error::{EngineError, Result};
use crate::graph::enclosing_object;
use crate::state::RealmStore;
use crate::value::NodeId;

/// Per-step bookkeeping. Discarded with the step on abort.
#[derive(Debug, Clone, Default)]
pub struct StepTracker {
    step: u64,
    touched: Vec<NodeId>,
    touched_set: BTreeSet<NodeId>,
    scheduled: Vec<NodeId>,
    created: Vec<ObjectId>,
    deleted: Vec<ObjectId>,
}

impl StepTracker {
    pub fn new(step: u64) -> Self {
        Self {
            step,
            ..Default::default()
        }
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    /// Record `object` as touched. First touch fixes its position in the
    /// update order; later touches are no-ops.
    pub fn touch(&mut self, object: NodeId) {
        if self.touched_set.insert(object) {
            self.touched.push(object);
        }
    }

    /// Touch the object whose record embeds `node` (the node itself when
    /// it has an identity). Nodes outside any object are ignored; they get
    /// picked up when they are attached.
    pub fn touch_enclosing(&mut self, store: &RealmStore, node: NodeId) -> Result<()> {
        if let Some(object) = enclosing_object(store, node)? {
            self.touch(object);
        }
        Ok(())
    }

    /// Objects in first-touched order.
    pub fn touched(&self) -> &[NodeId] {
        &self.touched
    }

    /// Queue a composite whose reference count reached zero. Whether it is
    /// really released is decided at commit, after the whole step ran.
    pub fn schedule_release(&mut self, node: NodeId) {
        self.scheduled.push(node);
    }

    pub fn take_scheduled(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.scheduled)
    }

    pub fn record_created(&mut self, id: ObjectId) {
        self.created.push(id);
    }

    pub fn record_deleted(&mut self, id: ObjectId) {
        self.deleted.push(id);
    }

    /// Identities created this step, in allocation order.
    pub fn created(&self) -> &[ObjectId] {
        &self.created
    }

    /// Identities whose reference count reached zero, in release order.
    pub fn deleted(&self) -> &[ObjectId] {
        &self.deleted
    }
}

/// Set `mod_time = step` and adopt `fresh_hash` only if the field list
/// differs from the last committed snapshot (`persisted`). Otherwise the
/// committed mod time is kept. Returns whether the fields changed.
///
/// A new identity has no snapshot of its own. `inherited` is the step its
/// unchanged fields were last committed at while they were still stored
/// inline; without one the object is new in this step.
pub fn mark_dirty(
    info: &mut ObjectInfo,
    persisted: Option<&ObjectInfo>,
    inherited: Option<u64>,
    fresh_hash: Hashlet,
    step: u64,
) -> Result<bool> {
    match persisted {
        Some(prev) if prev.content_hash == fresh_hash => {
            info.mod_time = prev.mod_time;
            info.content_hash = fresh_hash;
            Ok(false)
        }
        Some(prev) => {
            if step <= prev.mod_time {
                return Err(EngineError::invariant(
                    "mod_time_monotonic",
                    format!(
                        "{} last changed at step {}, cannot move to step {}",
                        info.id, prev.mod_time, step
                    ),
                ));
            }
            info.mod_time = step;
            info.content_hash = fresh_hash;
            Ok(true)
        }
        None => {
            info.mod_time = inherited.unwrap_or(step);
            info.content_hash = fresh_hash;
            Ok(true)
        }
    }
}
