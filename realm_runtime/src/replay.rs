//! Replay orchestrator — rebuild a realm from its step stream.
//!
//! Delegates all ownership logic to the engine. No shortcuts, no cached
//! state.

use tracing::debug;

use realm_engine::hashing::store_hash;
use realm_engine::{Changeset, Engine, EngineConfig, RealmStore, StepEnvelope};

use crate::error::Result;

/// Everything a replay produces.
#[derive(Debug)]
pub struct ReplayOutcome {
    pub engine: Engine,
    /// One changeset per replayed step, in order.
    pub changesets: Vec<Changeset>,
    /// `store_hash` of the final store.
    pub store_hash: String,
}

/// Rebuild a realm from scratch:
///
/// 1. Create a fresh engine for `pkg_path`
/// 2. Commit each step in order
/// 3. Return the engine, every changeset and the final store hash
///
/// A pure function of the step stream.
pub fn rebuild(pkg_path: &str, config: EngineConfig, steps: &[StepEnvelope]) -> Result<ReplayOutcome> {
    let (engine, changesets) = Engine::replay(pkg_path, config, steps)?;
    let store_hash = store_hash(engine.store())?;
    debug!(pkg_path, steps = steps.len(), hash = %store_hash, "full replay finished");
    Ok(ReplayOutcome {
        engine,
        changesets,
        store_hash,
    })
}

/// Resume from a committed store and replay the steps after it.
pub fn rebuild_from_snapshot(
    store: RealmStore,
    config: EngineConfig,
    tail: &[StepEnvelope],
) -> Result<ReplayOutcome> {
    let base = store.step;
    let mut engine = Engine::from_store(store, config)?;
    let mut changesets = Vec::with_capacity(tail.len());
    for envelope in tail {
        changesets.push(engine.apply_step(envelope)?);
    }
    let store_hash = store_hash(engine.store())?;
    debug!(from = base, steps = tail.len(), hash = %store_hash, "snapshot replay finished");
    Ok(ReplayOutcome {
        engine,
        changesets,
        store_hash,
    })
}

/// Rebuild and return only the store hash.
pub fn rebuild_hash(pkg_path: &str, steps: &[StepEnvelope]) -> Result<String> {
    Ok(rebuild(pkg_path, EngineConfig::default(), steps)?.store_hash)
}
