//! Runtime configuration.
//!
//! Read from a JSON file; every key is optional and falls back to the
//! defaults below.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use realm_engine::EngineConfig;

use crate::error::{Result, RuntimeError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Package path of the realm served by this runtime.
    pub pkg_path: String,
    /// Root directory for session logs and snapshots.
    pub data_dir: PathBuf,
    /// Snapshot every N committed steps. 0 disables snapshots.
    pub snapshot_interval: u64,
    /// Run the invariant suite on every commit.
    pub validate_invariants: bool,
    /// Check snapshot digests and invariants when resuming from one.
    pub verify_snapshots: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pkg_path: "gno.land/r/demo".to_string(),
            data_dir: PathBuf::from("data"),
            snapshot_interval: 100,
            validate_invariants: true,
            verify_snapshots: true,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: RuntimeConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pkg_path.is_empty() {
            return Err(RuntimeError::Config("pkg_path must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            validate_invariants: self.validate_invariants,
        }
    }
}
