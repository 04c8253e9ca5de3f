//! RealmEngine v1 — replay checker.
//!
//! Loads a step fixture, replays it twice through the engine, prints every
//! changeset, and fails if the runs diverge or the final store hash does
//! not match the expected one.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use realm_engine::StepEnvelope;
use realm_runtime::drift::verify_determinism;
use realm_runtime::replay;
use realm_runtime::RuntimeConfig;

/// Replay a realm step fixture and check it is deterministic.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Fixture file: {"pkg_path": ..., "steps": [...], "expected_hash": ...}
    fixture: PathBuf,

    /// Runtime configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only print the final hash
    #[arg(short, long)]
    quiet: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Fixture {
    pkg_path: Option<String>,
    steps: Vec<StepEnvelope>,
    #[serde(default)]
    expected_hash: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("realm_runtime={}", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &args.config {
        Some(path) => RuntimeConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };

    let data = fs::read_to_string(&args.fixture)
        .with_context(|| format!("reading fixture {}", args.fixture.display()))?;
    let fixture: Fixture = serde_json::from_str(&data).context("parsing fixture")?;
    let pkg_path = fixture.pkg_path.unwrap_or_else(|| config.pkg_path.clone());
    info!(pkg_path = %pkg_path, steps = fixture.steps.len(), "replaying fixture");

    let hash = verify_determinism(&pkg_path, &fixture.steps)?;
    let outcome = replay::rebuild(&pkg_path, config.engine_config(), &fixture.steps)?;

    if !args.quiet {
        for cs in &outcome.changesets {
            let (c, u, d) = cs.counts();
            println!("# step {} ({} created, {} updated, {} deleted)", cs.step, c, u, d);
            print!("{}", cs.render()?);
        }
    }
    println!("{}", hash);

    if let Some(expected) = fixture.expected_hash {
        if expected != hash {
            bail!("store hash mismatch: expected {}, got {}", expected, hash);
        }
        info!("store hash matches fixture");
    }
    Ok(())
}
