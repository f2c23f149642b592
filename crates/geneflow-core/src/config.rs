// Copyright (c) 2025 GeneFlow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed orchestrator configuration, replacing an untyped settings mapping
//! with a struct validated once at startup.

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_job_retry() -> u32 {
    3
}

fn default_max_concurrent_steps() -> usize {
    4
}

/// Per-context backend configuration (gateway URLs, queue names, credential
/// file paths). Kept as a string map since each backend interprets its own
/// keys; typed wrappers live in the backend's own crate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default)]
    pub settings: HashMap<String, String>,
}

/// Top-level orchestrator configuration, loaded from YAML with environment
/// variable overrides of the form `GENEFLOW_<FIELD>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// How many times a failed map item may be resubmitted before the step
    /// is considered permanently failed.
    #[serde(default = "default_job_retry")]
    pub job_retry: u32,

    /// Seconds between polling passes over running steps.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// How many steps may run concurrently.
    #[serde(default = "default_max_concurrent_steps")]
    pub max_concurrent_steps: usize,

    /// Per-execution-context settings, keyed by context name
    /// (`local`/`gridengine`/`slurm`/`agave`).
    #[serde(default)]
    pub contexts: HashMap<String, ContextConfig>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            job_retry: default_job_retry(),
            poll_interval_secs: default_poll_interval_secs(),
            max_concurrent_steps: default_max_concurrent_steps(),
            contexts: HashMap::new(),
        }
    }
}

impl OrchestratorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Loads from a YAML file, then applies any `GENEFLOW_*` environment
    /// overrides for the scalar fields.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| OrchestratorError::data(e.to_string(), path.display().to_string()))?;
        Self::load_str(&content)
    }

    pub fn load_str(content: &str) -> Result<Self> {
        let mut config: Self = serde_yaml::from_str(content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("GENEFLOW_JOB_RETRY") {
            if let Ok(parsed) = v.parse() {
                self.job_retry = parsed;
            }
        }
        if let Ok(v) = std::env::var("GENEFLOW_POLL_INTERVAL_SECS") {
            if let Ok(parsed) = v.parse() {
                self.poll_interval_secs = parsed;
            }
        }
        if let Ok(v) = std::env::var("GENEFLOW_MAX_CONCURRENT_STEPS") {
            if let Ok(parsed) = v.parse() {
                self.max_concurrent_steps = parsed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_fields_omitted() {
        let config = OrchestratorConfig::load_str("job_retry: 5\n").unwrap();
        assert_eq!(config.job_retry, 5);
        assert_eq!(config.poll_interval_secs, 10);
        assert_eq!(config.max_concurrent_steps, 4);
    }

    #[test]
    fn env_override_takes_precedence() {
        std::env::set_var("GENEFLOW_JOB_RETRY", "9");
        let config = OrchestratorConfig::load_str("job_retry: 5\n").unwrap();
        std::env::remove_var("GENEFLOW_JOB_RETRY");
        assert_eq!(config.job_retry, 9);
    }
}
