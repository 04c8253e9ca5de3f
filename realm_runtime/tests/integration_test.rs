//! Integration tests for realm_runtime.
//!
//! All tests use temporary directories for isolation.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use pretty_assertions::assert_eq;

use realm_engine::{Engine, EngineConfig, EngineError, MutationEvent, NodeId, StepEnvelope};

use realm_runtime::drift::{compare_stores, verify_determinism};
use realm_runtime::object_table::ObjectTable;
use realm_runtime::replay;
use realm_runtime::snapshot;
use realm_runtime::step_log::StepLog;
use realm_runtime::{RuntimeConfig, RuntimeError, Session, SharedSession};

const PKG: &str = "gno.land/r/demo";

/// Load the engine's golden step stream.
fn load_golden_steps() -> Vec<StepEnvelope> {
    let golden_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("realm_engine")
        .join("tests")
        .join("golden")
        .join("steps.json");
    let json_str = fs::read_to_string(&golden_path).expect("Failed to read golden steps.json");
    serde_json::from_str(&json_str).expect("Failed to parse golden steps.json")
}

/// Create a temp directory for a test.
fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("realm_runtime_tests").join(name);
    if dir.exists() {
        fs::remove_dir_all(&dir).ok();
    }
    fs::create_dir_all(&dir).expect("Failed to create temp dir");
    dir
}

fn config(snapshot_interval: u64) -> RuntimeConfig {
    RuntimeConfig {
        pkg_path: PKG.to_string(),
        snapshot_interval,
        ..RuntimeConfig::default()
    }
}

fn golden_hash() -> String {
    replay::rebuild_hash(PKG, &load_golden_steps()).expect("golden replay")
}

// ─────────────────────────────────────────────────────────────
// Replay and the step log
// ─────────────────────────────────────────────────────────────

#[test]
fn replay_is_deterministic() {
    let steps = load_golden_steps();
    let hash = verify_determinism(PKG, &steps).expect("determinism");
    assert_eq!(hash, golden_hash());
    assert_eq!(hash.len(), 64);
}

#[test]
fn append_and_replay_through_log() {
    let dir = temp_dir("append_replay");
    let steps = load_golden_steps();

    let log_path = dir.join("steps.log");
    {
        let mut log = StepLog::open(&log_path).expect("open log");
        for step in &steps {
            log.append(step).expect("append step");
        }
    }

    let log = StepLog::open(&log_path).expect("reopen log");
    assert_eq!(log.last_step(), steps.len() as u64);
    let loaded = log.load_all().expect("load steps");
    assert_eq!(loaded, steps, "protobuf framing must preserve every step");
    assert_eq!(log.load_after(2).unwrap(), steps[2..].to_vec());

    let hash = replay::rebuild_hash(PKG, &loaded).expect("replay");
    assert_eq!(hash, golden_hash());
}

#[test]
fn step_log_rejects_gaps() {
    let dir = temp_dir("log_gaps");
    let steps = load_golden_steps();
    let mut log = StepLog::open(&dir.join("steps.log")).expect("open log");
    log.append(&steps[0]).unwrap();
    match log.append(&steps[2]) {
        Err(RuntimeError::StepLog(msg)) => assert!(msg.contains("expected 2"), "got: {}", msg),
        other => panic!("expected a sequence violation, got {:?}", other.map(|_| ())),
    }
    assert_eq!(log.last_step(), 1);
}

#[test]
fn corrupted_log_detection() {
    let dir = temp_dir("corrupted_log");
    let steps = load_golden_steps();

    let log_path = dir.join("steps.log");
    {
        let mut log = StepLog::open(&log_path).expect("open log");
        for step in &steps {
            log.append(step).expect("append");
        }
    }

    // Corrupt the log by truncating 10 bytes from the end
    let data = fs::read(&log_path).expect("read log");
    fs::write(&log_path, &data[..data.len() - 10]).expect("truncate");

    // Either open fails, or load_all fails
    match StepLog::open(&log_path) {
        Ok(log) => assert!(log.load_all().is_err(), "Corrupted log should fail to load"),
        Err(_) => {}
    }
}

// ─────────────────────────────────────────────────────────────
// Sessions
// ─────────────────────────────────────────────────────────────

#[test]
fn concurrent_sessions_isolated() {
    let dir = temp_dir("concurrent_sessions");
    let steps = load_golden_steps();

    let mut session_a = Session::new(&dir, "session_a", &config(0)).expect("create session_a");
    let mut session_b = Session::new(&dir, "session_b", &config(0)).expect("create session_b");

    for step in &steps {
        session_a.apply_step(&step.events).expect("apply to a");
    }
    for step in &steps[..2] {
        session_b.apply_step(&step.events).expect("apply to b");
    }

    assert_eq!(session_a.current_hash().unwrap(), golden_hash());
    assert_ne!(
        session_a.current_hash().unwrap(),
        session_b.current_hash().unwrap(),
        "Sessions should be isolated"
    );
    assert_eq!(session_a.last_step(), steps.len() as u64);
    assert_eq!(session_b.last_step(), 2);
    assert_eq!(session_b.session_id(), "session_b");
}

#[test]
fn session_opens_under_configured_data_dir() {
    let dir = temp_dir("data_dir");
    let cfg = RuntimeConfig {
        data_dir: dir.clone(),
        ..config(0)
    };
    let mut session = Session::open("s", &cfg).expect("open session");
    session.apply_step(&[]).expect("empty step");
    assert!(dir.join("s").join("steps.log").exists());
}

#[test]
fn session_resumes_from_snapshot_and_tail() {
    let dir = temp_dir("resume_snapshot");
    let steps = load_golden_steps();

    let hash = {
        let mut session = Session::new(&dir, "s", &config(2)).expect("create session");
        for step in &steps[..3] {
            session.apply_step(&step.events).expect("apply");
        }
        session.current_hash().unwrap()
    };
    let snap_dir = dir.join("s").join("snapshots");
    assert_eq!(snapshot::list_snapshots(&snap_dir).unwrap(), vec![2]);

    let mut session = Session::new(&dir, "s", &config(2)).expect("resume session");
    assert_eq!(session.last_step(), 3);
    assert_eq!(session.current_hash().unwrap(), hash);

    session.apply_step(&steps[3].events).expect("apply last step");
    assert_eq!(session.current_hash().unwrap(), golden_hash());
    assert_eq!(snapshot::list_snapshots(&snap_dir).unwrap(), vec![2, 4]);
}

#[test]
fn session_falls_back_to_full_replay_on_bad_snapshot() {
    let dir = temp_dir("bad_snapshot");
    let steps = load_golden_steps();
    {
        let mut session = Session::new(&dir, "s", &config(2)).expect("create session");
        for step in &steps {
            session.apply_step(&step.events).expect("apply");
        }
    }

    let snap_dir = dir.join("s").join("snapshots");
    let mut snap = snapshot::load_snapshot(&snap_dir, 4).unwrap().unwrap();
    snap.hash = "0".repeat(64);
    fs::write(
        snap_dir.join("snapshot_000004.json"),
        serde_json::to_string(&snap).unwrap(),
    )
    .unwrap();

    let session = Session::new(&dir, "s", &config(2)).expect("resume session");
    assert_eq!(session.last_step(), 4);
    assert_eq!(session.current_hash().unwrap(), golden_hash());
}

#[test]
fn failed_step_is_not_persisted() {
    let dir = temp_dir("failed_step");
    let steps = load_golden_steps();
    let mut session = Session::new(&dir, "s", &config(0)).expect("create session");
    session.apply_step(&steps[0].events).expect("apply");
    let before = session.current_hash().unwrap();

    let bad = vec![MutationEvent::Detach {
        owner: NodeId(999),
        slot: 0,
    }];
    let err = session.apply_step(&bad).unwrap_err();
    assert!(matches!(err, RuntimeError::Engine(EngineError::UnknownNode(_))));
    assert_eq!(session.last_step(), 1);
    assert_eq!(session.current_hash().unwrap(), before);

    drop(session);
    let session = Session::new(&dir, "s", &config(0)).expect("reopen session");
    assert_eq!(session.last_step(), 1);
    assert_eq!(session.current_hash().unwrap(), before);
}

#[test]
fn snapshot_failure_does_not_fail_a_logged_step() {
    let dir = temp_dir("snapshot_unwritable");
    let steps = load_golden_steps();
    let mut session = Session::new(&dir, "s", &config(1)).expect("create session");

    // A plain file where the snapshot directory should be.
    let snap_dir = dir.join("s").join("snapshots");
    fs::write(&snap_dir, b"not a directory").unwrap();

    for step in &steps[..2] {
        session.apply_step(&step.events).expect("step must survive the snapshot error");
    }
    assert_eq!(session.last_step(), 2);
    let hash = session.current_hash().unwrap();
    drop(session);

    let log = StepLog::open(&dir.join("s").join("steps.log")).unwrap();
    assert_eq!(log.last_step(), 2);

    fs::remove_file(&snap_dir).unwrap();
    let session = Session::new(&dir, "s", &config(1)).expect("reopen from the log");
    assert_eq!(session.last_step(), 2);
    assert_eq!(session.current_hash().unwrap(), hash);
}

#[test]
fn replica_table_tracks_every_step() {
    let dir = temp_dir("replica_table");
    let steps = load_golden_steps();
    let mut session = Session::new(&dir, "s", &config(0)).expect("create session");
    for step in &steps {
        session.apply_step(&step.events).expect("apply");
        let expected = ObjectTable::from_store(session.engine().store()).unwrap();
        assert_eq!(session.table(), &expected);
    }

    let live = session.current_hash().unwrap();
    assert_eq!(session.replay_full().unwrap(), live);
    assert_eq!(session.table().step(), 4);
}

#[test]
fn shared_session_serializes_writers() {
    let dir = temp_dir("shared_session");
    let session = Session::new(&dir, "s", &config(0)).expect("create session");
    let shared = Arc::new(SharedSession::new(session));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                for _ in 0..5 {
                    let cs = shared.apply_step(&[]).expect("empty step");
                    assert!(cs.is_empty());
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("writer panicked");
    }

    assert_eq!(shared.last_step().unwrap(), 20);
    let log = StepLog::open(&dir.join("s").join("steps.log")).unwrap();
    assert_eq!(log.last_step(), 20);
}

// ─────────────────────────────────────────────────────────────
// Drift
// ─────────────────────────────────────────────────────────────

#[test]
fn drift_report_between_steps() {
    let steps = load_golden_steps();
    let (at_two, _) = Engine::replay(PKG, EngineConfig::default(), &steps[..2]).unwrap();
    let (at_four, _) = Engine::replay(PKG, EngineConfig::default(), &steps).unwrap();

    let report = compare_stores(at_two.store(), at_four.store());
    assert_eq!(report.step_a, 2);
    assert_eq!(report.step_b, 4);
    assert_eq!(report.object_count_a, 4);
    assert_eq!(report.object_count_b, 3);
    assert_eq!(report.object_count_delta, -1);
    assert!(report.added_objects.is_empty());
    assert_eq!(report.removed_objects.len(), 1);
    assert!(report.removed_objects[0].ends_with(":4"));
    assert!(!report.is_clean());

    let same = compare_stores(at_four.store(), at_four.store());
    assert!(same.is_clean());
    assert_eq!(same.object_count_delta, 0);
}
