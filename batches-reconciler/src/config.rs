//! Reconciler settings at `<home>/.batches/config.yaml`.
//!
//! Every field has a default, so a missing file or a partial one is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Concurrent worker tasks.
    pub workers: usize,
    /// Idle wait between queue polls.
    pub poll_interval_ms: u64,
    pub lease_duration_secs: u64,
    /// Pause after a push so the host can recompute mergeability.
    pub sleep_after_push_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval_ms: 1000,
            lease_duration_secs: 300,
            sleep_after_push_secs: 3,
            retry: RetryPolicy::default(),
        }
    }
}

impl ReconcilerConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    #[must_use]
    pub const fn sleep_after_push(&self) -> Duration {
        Duration::from_secs(self.sleep_after_push_secs)
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// `<home>/.batches/config.yaml`
#[must_use]
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".batches").join("config.yaml")
}

/// Load the config rooted at `home`. A missing file yields the defaults.
pub fn load_at(home: &Path) -> Result<ReconcilerConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(ReconcilerConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    if contents.trim().is_empty() {
        return Ok(ReconcilerConfig::default());
    }
    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
}

/// [`load_at`] rooted at the user's home directory.
pub fn load() -> Result<ReconcilerConfig, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
    load_at(&home)
}

/// Render `config` as YAML.
pub fn to_yaml(config: &ReconcilerConfig) -> Result<String, ConfigError> {
    Ok(serde_yaml::to_string(config)?)
}
