//! Drift detection — determinism verification and store comparison.
//!
//! Counts are i64 so deltas can go negative. Object lists are sorted by
//! identity sequence.

use std::collections::BTreeSet;

use realm_engine::{EngineConfig, RealmStore, StepEnvelope};

use crate::error::{Result, RuntimeError};
use crate::replay;

/// Verify determinism by replaying the same steps twice and asserting
/// identical changesets and store hashes. Returns the agreed hash.
///
/// A changeset that differs only in a content hash surfaces as the
/// engine's `HashMismatch`; any other divergence is a determinism failure.
pub fn verify_determinism(pkg_path: &str, steps: &[StepEnvelope]) -> Result<String> {
    let run1 = replay::rebuild(pkg_path, EngineConfig::default(), steps)?;
    let run2 = replay::rebuild(pkg_path, EngineConfig::default(), steps)?;

    if run1.changesets.len() != run2.changesets.len() {
        return Err(RuntimeError::Determinism(format!(
            "replays committed {} and {} steps",
            run1.changesets.len(),
            run2.changesets.len()
        )));
    }
    for (a, b) in run1.changesets.iter().zip(&run2.changesets) {
        b.verify_against(a)?;
    }

    if run1.store_hash != run2.store_hash {
        return Err(RuntimeError::Determinism(format!(
            "two replays produced different hashes.\n\
             Run 1: {}\n\
             Run 2: {}",
            run1.store_hash, run2.store_hash
        )));
    }
    Ok(run1.store_hash)
}

/// Structured store comparison.
///
/// Objects are matched by identity. `changed` lists identities present in
/// both stores whose content hash differs.
pub fn compare_stores(store_a: &RealmStore, store_b: &RealmStore) -> DriftReport {
    let seqs_a: BTreeSet<u64> = store_a.objects.keys().copied().collect();
    let seqs_b: BTreeSet<u64> = store_b.objects.keys().copied().collect();

    let label = |store: &RealmStore, seq: u64| {
        store
            .objects
            .get(&seq)
            .and_then(|n| store.object_id(*n))
            .map(|id| id.to_string())
            .unwrap_or_else(|| seq.to_string())
    };

    let added: Vec<String> = seqs_b.difference(&seqs_a).map(|s| label(store_b, *s)).collect();
    let removed: Vec<String> = seqs_a.difference(&seqs_b).map(|s| label(store_a, *s)).collect();

    let escaped_a = count_escaped(store_a);
    let escaped_b = count_escaped(store_b);

    let mut changed = Vec::new();
    let mut newly_escaped = Vec::new();
    for seq in seqs_a.intersection(&seqs_b) {
        let (Some(a), Some(b)) = (info(store_a, *seq), info(store_b, *seq)) else {
            continue;
        };
        if a.content_hash != b.content_hash {
            changed.push(b.id.to_string());
        }
        if !a.is_escaped && b.is_escaped {
            newly_escaped.push(b.id.to_string());
        }
    }

    let count_a = store_a.objects.len() as i64;
    let count_b = store_b.objects.len() as i64;

    DriftReport {
        step_a: store_a.step,
        step_b: store_b.step,
        object_count_a: count_a,
        object_count_b: count_b,
        object_count_delta: count_b - count_a,
        escaped_count_a: escaped_a,
        escaped_count_b: escaped_b,
        escaped_count_delta: escaped_b - escaped_a,
        added_objects: added,
        removed_objects: removed,
        changed_objects: changed,
        newly_escaped,
    }
}

fn info(store: &RealmStore, seq: u64) -> Option<&realm_engine::ObjectInfo> {
    let node = store.objects.get(&seq)?;
    store.nodes.get(node)?.object.as_ref()
}

fn count_escaped(store: &RealmStore) -> i64 {
    store
        .objects
        .keys()
        .filter_map(|seq| info(store, *seq))
        .filter(|o| o.is_escaped)
        .count() as i64
}

/// Structured drift report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftReport {
    pub step_a: u64,
    pub step_b: u64,
    pub object_count_a: i64,
    pub object_count_b: i64,
    pub object_count_delta: i64,
    pub escaped_count_a: i64,
    pub escaped_count_b: i64,
    pub escaped_count_delta: i64,
    pub added_objects: Vec<String>,
    pub removed_objects: Vec<String>,
    pub changed_objects: Vec<String>,
    pub newly_escaped: Vec<String>,
}

impl DriftReport {
    /// True when both stores hold the same identities with the same hashes.
    pub fn is_clean(&self) -> bool {
        self.added_objects.is_empty()
            && self.removed_objects.is_empty()
            && self.changed_objects.is_empty()
            && self.newly_escaped.is_empty()
    }
}
