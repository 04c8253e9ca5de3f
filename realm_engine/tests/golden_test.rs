/// Golden determinism test — replays the frozen step stream and asserts
/// the canonical hashes and record order match the permanent v1 values.
///
/// This test must NEVER be modified to match new behavior.
/// If it fails, the canonical encoding has been broken.

use std::fs;

use pretty_assertions::assert_eq;

use realm_engine::hashing::store_hash;
use realm_engine::{Engine, EngineConfig, RealmId, RecordKind, StepEnvelope, ENGINE_VERSION};

const PKG: &str = "gno.land/r/demo";

fn load_steps(path: &str) -> Vec<StepEnvelope> {
    let data = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path, e));
    serde_json::from_str(&data).expect("Failed to parse steps JSON")
}

fn replay() -> (Engine, Vec<realm_engine::Changeset>) {
    let steps = load_steps("tests/golden/steps.json");
    Engine::replay(PKG, EngineConfig::default(), &steps).expect("golden replay failed")
}

#[test]
fn realm_id_is_path_hashlet() {
    assert_eq!(
        RealmId::from_path(PKG).as_str(),
        "a2758a0bb03e89e9911522a09bb20ad62910cab9"
    );
}

#[test]
fn golden_record_order() {
    let (_, changesets) = replay();
    let kinds: Vec<Vec<(RecordKind, u64)>> = changesets
        .iter()
        .map(|cs| cs.records.iter().map(|r| (r.kind, r.id.seq)).collect())
        .collect();
    use RecordKind::*;
    assert_eq!(
        kinds,
        vec![
            vec![(Create, 1), (Create, 2)],
            vec![(Create, 4), (Create, 3), (Update, 2)],
            vec![(Update, 2), (Update, 4), (Update, 1)],
            vec![(Update, 3), (Delete, 4)],
        ]
    );
}

#[test]
fn golden_content_hashes() {
    let (_, changesets) = replay();
    let hash_of = |step: usize, seq: u64| {
        changesets[step]
            .records
            .iter()
            .find(|r| r.id.seq == seq)
            .and_then(|r| r.body.as_ref())
            .map(|b| b.content_hash.to_string())
            .expect("record missing")
    };
    assert_eq!(hash_of(0, 1), "4c7da7bb0c3cf994fb55e218d8ed6c7578fd7f35");
    assert_eq!(hash_of(0, 2), "42e67877ee1516bcae7b7fcf4e797c59705c4eaf");
    assert_eq!(hash_of(2, 1), "2ddc45d14fd96a6bc8ca38e0689dc2dfff444a8a");
}

#[test]
fn golden_replay_is_deterministic() {
    // Run 1
    let (engine1, cs1) = replay();
    let h1 = store_hash(engine1.store()).unwrap();

    // Run 2
    let (engine2, cs2) = replay();
    let h2 = store_hash(engine2.store()).unwrap();

    assert_eq!(
        h1, h2,
        "DETERMINISM FAILURE: Two replays of the same steps produced different hashes.\n\
         Run 1: {}\n\
         Run 2: {}",
        h1, h2
    );
    assert_eq!(cs1, cs2);
}

#[test]
fn engine_version_is_one() {
    assert_eq!(ENGINE_VERSION, 1, "ENGINE_VERSION must be 1 and never change");
}
