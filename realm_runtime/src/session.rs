//! Session manager — isolated sessions with persist-after-apply semantics.
//!
//! Each session gets its own directory with a step log and snapshots.
//! Concurrency: Mutex for write serialization, no global mutable state.
//!
//! Apply-before-persist order:
//!   1. engine commits the step on a copy     (may fail, nothing changes)
//!   2. replica table applies the changeset (may fail, nothing changes)
//!   3. step_log.append()                     (only if 1 and 2 succeeded)
//!   4. copies swapped in, snapshot if interval reached

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{info, warn};

use realm_engine::hashing::store_hash;
use realm_engine::{Changeset, Engine, MutationEvent, StepEnvelope};

use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::object_table::ObjectTable;
use crate::replay::{self, ReplayOutcome};
use crate::snapshot::{self, Snapshot};
use crate::snapshot_codec::decode_snapshot;
use crate::step_log::StepLog;

/// An isolated realm session with its own step log and store.
pub struct Session {
    session_id: String,
    dir: PathBuf,
    engine: Engine,
    log: StepLog,
    table: ObjectTable,
    config: RuntimeConfig,
}

impl Session {
    /// Open (or resume) a session in the given base directory.
    ///
    /// Directory structure:
    ///   <base_dir>/<session_id>/steps.log
    ///   <base_dir>/<session_id>/snapshots/
    ///
    /// Resumes from the latest usable snapshot plus the log tail; falls
    /// back to full replay if the snapshot is missing or fails to verify.
    pub fn new(base_dir: &Path, session_id: &str, config: &RuntimeConfig) -> Result<Self> {
        config.validate()?;
        let dir = base_dir.join(session_id);
        let log = StepLog::open(&dir.join("steps.log"))?;

        let outcome = match resume_from_snapshot(&dir, &log, config)? {
            Some(outcome) => outcome,
            None => replay::rebuild(&config.pkg_path, config.engine_config(), &log.load_all()?)?,
        };
        let table = ObjectTable::from_store(outcome.engine.store())?;

        info!(
            session = session_id,
            step = outcome.engine.last_step(),
            hash = %outcome.store_hash,
            "session opened"
        );

        Ok(Self {
            session_id: session_id.to_string(),
            dir,
            engine: outcome.engine,
            log,
            table,
            config: config.clone(),
        })
    }

    /// Open a session under `config.data_dir`.
    pub fn open(session_id: &str, config: &RuntimeConfig) -> Result<Self> {
        Self::new(&config.data_dir, session_id, config)
    }

    /// Run `events` as the next step, then persist it.
    pub fn apply_step(&mut self, events: &[MutationEvent]) -> Result<Changeset> {
        // Step 1: commit on a copy (may fail)
        let mut engine = self.engine.clone();
        let changeset = engine.apply_events(events)?;

        // Step 2: the replica view must accept the changeset
        let mut table = self.table.clone();
        table.apply(&changeset)?;

        // Step 3: persist (only if 1 and 2 succeeded)
        self.log
            .append(&StepEnvelope::new(changeset.step, events.to_vec()))?;
        self.engine = engine;
        self.table = table;

        // Step 4: auto-snapshot at interval. The step is already durable in
        // the log, so a failed snapshot only costs a longer replay.
        let interval = self.config.snapshot_interval;
        if interval > 0 && changeset.step % interval == 0 {
            if let Err(e) = snapshot::save_snapshot(&self.snapshot_dir(), self.engine.store()) {
                warn!(step = changeset.step, error = %e, "snapshot failed, continuing from the log");
            }
        }

        Ok(changeset)
    }

    /// Full replay from the step log. Resets engine and replica table.
    /// Returns the replayed store hash.
    pub fn replay_full(&mut self) -> Result<String> {
        let steps = self.log.load_all()?;
        let outcome = replay::rebuild(&self.config.pkg_path, self.config.engine_config(), &steps)?;

        let mut table = ObjectTable::new(outcome.engine.realm().clone());
        for changeset in &outcome.changesets {
            table.apply(changeset)?;
        }

        self.engine = outcome.engine;
        self.table = table;
        Ok(outcome.store_hash)
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn table(&self) -> &ObjectTable {
        &self.table
    }

    /// Get current store hash.
    pub fn current_hash(&self) -> Result<String> {
        Ok(store_hash(self.engine.store())?)
    }

    pub fn last_step(&self) -> u64 {
        self.engine.last_step()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.dir.join("snapshots")
    }
}

fn resume_from_snapshot(
    dir: &Path,
    log: &StepLog,
    config: &RuntimeConfig,
) -> Result<Option<ReplayOutcome>> {
    let snap_dir = dir.join("snapshots");
    let candidates = snapshot::list_snapshots(&snap_dir)?;
    let Some(step) = candidates
        .into_iter()
        .rev()
        .find(|s| *s <= log.last_step())
    else {
        return Ok(None);
    };
    let store = match snapshot::load_snapshot(&snap_dir, step)
        .and_then(|snap| snap.map(|s| restore(&s, config.verify_snapshots)).transpose())
    {
        Ok(Some(store)) => store,
        Ok(None) => return Ok(None),
        Err(err) => {
            warn!(step, error = %err, "snapshot rejected, replaying from scratch");
            return Ok(None);
        }
    };
    let tail = log.load_after(step)?;
    match replay::rebuild_from_snapshot(store, config.engine_config(), &tail) {
        Ok(outcome) => Ok(Some(outcome)),
        Err(err) => {
            warn!(step, error = %err, "snapshot replay failed, replaying from scratch");
            Ok(None)
        }
    }
}

fn restore(snap: &Snapshot, verify: bool) -> Result<realm_engine::RealmStore> {
    if verify {
        snap.restore()
    } else {
        Ok(decode_snapshot(&snap.canonical_json)?)
    }
}

/// Thread-safe session handle using Mutex.
pub struct SharedSession {
    inner: Mutex<Session>,
}

impl SharedSession {
    pub fn new(session: Session) -> Self {
        Self {
            inner: Mutex::new(session),
        }
    }

    /// Apply a step under lock.
    pub fn apply_step(&self, events: &[MutationEvent]) -> Result<Changeset> {
        let mut session = self.inner.lock().map_err(|_| RuntimeError::LockPoisoned)?;
        session.apply_step(events)
    }

    /// Get current hash under lock.
    pub fn current_hash(&self) -> Result<String> {
        let session = self.inner.lock().map_err(|_| RuntimeError::LockPoisoned)?;
        session.current_hash()
    }

    /// Get last committed step under lock.
    pub fn last_step(&self) -> Result<u64> {
        let session = self.inner.lock().map_err(|_| RuntimeError::LockPoisoned)?;
        Ok(session.last_step())
    }
}
