/// RealmEngine v1 — Engine
///
/// Top-level orchestrator. Each step mutates a private copy of the last
/// committed store; commit sweeps releases, emits the changeset, validates
/// invariants and only then swaps the copy in. Any failure discards the
/// copy, so an aborted step leaves no trace.
///
/// Strict step sequence enforcement.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::changeset::{emit, Changeset};
use crate::domain::{Node, ObjectId, RealmId};
use crate::error::{EngineError, Result};
use crate::escape::sweep;
use crate::events::{MutationEvent, StepEnvelope, SCHEMA_VERSION};
use crate::invariants::{validate_commit, validate_invariants, validate_transition};
use crate::modtime::StepTracker;
use crate::ownership;
use crate::escape;
use crate::state::{create_initial_store, RealmStore};
use crate::transitions::{alloc, apply_event};
use crate::value::{CompositeKind, Field, NodeId, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Run the full invariant suite on every commit.
    pub validate_invariants: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            validate_invariants: true,
        }
    }
}

/// Stateful engine for one realm.
#[derive(Debug, Clone)]
pub struct Engine {
    store: RealmStore,
    config: EngineConfig,
}

impl Engine {
    /// Fresh engine for the realm at `pkg_path`.
    pub fn new(pkg_path: &str) -> Self {
        Self::with_config(pkg_path, EngineConfig::default())
    }

    pub fn with_config(pkg_path: &str, config: EngineConfig) -> Self {
        Self {
            store: create_initial_store(pkg_path),
            config,
        }
    }

    /// Resume from a committed store (e.g. a snapshot). The store is
    /// validated before it is accepted.
    pub fn from_store(store: RealmStore, config: EngineConfig) -> Result<Self> {
        validate_invariants(&store)?;
        Ok(Self { store, config })
    }

    /// Last committed store.
    pub fn store(&self) -> &RealmStore {
        &self.store
    }

    pub fn into_store(self) -> RealmStore {
        self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn realm(&self) -> &RealmId {
        &self.store.realm
    }

    pub fn last_step(&self) -> u64 {
        self.store.step
    }

    /// Open the next step. Nothing is visible until [`Step::commit`].
    pub fn begin_step(&mut self) -> Step<'_> {
        let work = self.store.clone();
        let tracker = StepTracker::new(self.store.step + 1);
        Step {
            engine: self,
            work,
            tracker,
            fault: None,
        }
    }

    /// Run `events` as the next step and commit it.
    pub fn apply_events(&mut self, events: &[MutationEvent]) -> Result<Changeset> {
        let mut step = self.begin_step();
        for event in events {
            if let Err(err) = step.apply(event) {
                step.abort();
                return Err(err);
            }
        }
        step.commit()
    }

    /// Apply a recorded step:
    ///   1. Validate schema version (must be 1)
    ///   2. Validate step number (strictly increasing, no gaps)
    ///   3. Run and commit the events
    pub fn apply_step(&mut self, envelope: &StepEnvelope) -> Result<Changeset> {
        if envelope.schema_version != SCHEMA_VERSION {
            return Err(EngineError::invariant(
                "schema_version",
                format!(
                    "expected schema {}, got {}",
                    SCHEMA_VERSION, envelope.schema_version
                ),
            ));
        }
        let expected = self.store.step + 1;
        if envelope.step != expected {
            return Err(EngineError::invariant(
                "step_sequence",
                format!("expected step {}, got {}", expected, envelope.step),
            ));
        }
        self.apply_events(&envelope.events)
    }

    /// Event-sourced reconstruction: fresh engine, every step replayed.
    pub fn replay(
        pkg_path: &str,
        config: EngineConfig,
        steps: &[StepEnvelope],
    ) -> Result<(Engine, Vec<Changeset>)> {
        let mut engine = Engine::with_config(pkg_path, config);
        let mut changesets = Vec::with_capacity(steps.len());
        for envelope in steps {
            changesets.push(engine.apply_step(envelope)?);
        }
        Ok((engine, changesets))
    }
}

/// One open execution step. Holds exclusive access to the engine; the
/// first failed mutation poisons it, and a poisoned step cannot commit.
pub struct Step<'a> {
    engine: &'a mut Engine,
    work: RealmStore,
    tracker: StepTracker,
    fault: Option<EngineError>,
}

impl<'a> Step<'a> {
    /// Step number this step will commit as.
    pub fn number(&self) -> u64 {
        self.tracker.step()
    }

    /// In-progress view of the store.
    pub fn store(&self) -> &RealmStore {
        &self.work
    }

    fn run<T>(
        &mut self,
        f: impl FnOnce(&mut RealmStore, &mut StepTracker) -> Result<T>,
    ) -> Result<T> {
        if let Some(err) = &self.fault {
            return Err(err.clone());
        }
        let out = f(&mut self.work, &mut self.tracker);
        if let Err(err) = &out {
            self.fault = Some(err.clone());
        }
        out
    }

    pub fn apply(&mut self, event: &MutationEvent) -> Result<Option<NodeId>> {
        self.run(|store, tracker| apply_event(store, tracker, event))
    }

    pub fn alloc(&mut self, kind: CompositeKind, fields: Vec<Field>) -> Result<NodeId> {
        self.run(|store, tracker| alloc(store, tracker, kind, fields))
    }

    pub fn bind_root(&mut self, name: &str, value: NodeId) -> Result<()> {
        self.run(|store, tracker| ownership::bind_root(store, tracker, name, value))
    }

    pub fn unbind_root(&mut self, name: &str) -> Result<NodeId> {
        self.run(|store, tracker| ownership::unbind_root(store, tracker, name))
    }

    pub fn attach(&mut self, owner: NodeId, slot: usize, value: NodeId) -> Result<()> {
        self.run(|store, tracker| ownership::attach(store, tracker, owner, slot, value))
    }

    pub fn detach(&mut self, owner: NodeId, slot: usize) -> Result<NodeId> {
        self.run(|store, tracker| ownership::detach(store, tracker, owner, slot))
    }

    pub fn add_reference(&mut self, from: NodeId, slot: usize, value: NodeId) -> Result<()> {
        self.run(|store, tracker| escape::add_reference(store, tracker, from, slot, value))
    }

    pub fn remove_reference(&mut self, from: NodeId, slot: usize) -> Result<()> {
        self.run(|store, tracker| escape::remove_reference(store, tracker, from, slot))
    }

    pub fn set_value(&mut self, node: NodeId, slot: usize, value: Value) -> Result<()> {
        self.run(|store, tracker| ownership::set_value(store, tracker, node, slot, value))
    }

    pub fn node(&self, node: NodeId) -> Result<&Node> {
        self.work.node(node)
    }

    pub fn field(&self, node: NodeId, slot: usize) -> Result<&Value> {
        self.work.field(node, slot).map(|f| &f.value)
    }

    /// Composite held by `node[slot]`, if any.
    pub fn child(&self, node: NodeId, slot: usize) -> Result<Option<NodeId>> {
        Ok(self.field(node, slot)?.as_ref_node())
    }

    pub fn root(&self, name: &str) -> Option<NodeId> {
        self.work.root(name)
    }

    pub fn object_id(&self, node: NodeId) -> Option<ObjectId> {
        self.work.object_id(node)
    }

    /// Finish the step: release, hash, emit, validate, swap in.
    pub fn commit(self) -> Result<Changeset> {
        let Step {
            engine,
            mut work,
            mut tracker,
            fault,
        } = self;
        let step = tracker.step();
        if let Some(err) = fault {
            warn!(step, error = %err, "step aborted");
            return Err(err);
        }
        match finish(&engine.store, &mut work, &mut tracker, engine.config.validate_invariants) {
            Ok(changeset) => {
                let (creates, updates, deletes) = changeset.counts();
                info!(step, creates, updates, deletes, objects = work.object_count(), "step committed");
                engine.store = work;
                Ok(changeset)
            }
            Err(err) => {
                warn!(step, error = %err, "step aborted at commit");
                Err(err)
            }
        }
    }

    /// Drop every mutation of this step.
    pub fn abort(self) {
        warn!(step = self.tracker.step(), "step aborted");
    }
}

fn finish(
    base: &RealmStore,
    work: &mut RealmStore,
    tracker: &mut StepTracker,
    validate: bool,
) -> Result<Changeset> {
    sweep(work, tracker)?;
    work.step = tracker.step();
    let changeset = emit(base, work, tracker)?;
    if validate {
        validate_commit(work, tracker.touched())?;
        validate_transition(base, work)?;
        changeset.check_referential_order()?;
    }
    Ok(changeset)
}
