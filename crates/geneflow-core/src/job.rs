// Copyright (c) 2025 GeneFlow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `Job` entity: a concrete invocation of a workflow.

use crate::error::{OrchestratorError, Result};
use crate::value::{is_valid_key, StringOrList};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The literal fallback key used in a job's three-level execution mapping.
pub const DEFAULT_KEY: &str = "default";

/// A three-level execution override mapping: `step name -> value`, with
/// `"default"` as the fallback entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOverride<T> {
    #[serde(flatten)]
    pub entries: HashMap<String, T>,
}

impl<T: Clone> ExecutionOverride<T> {
    /// Resolves the effective value for `step_name`, falling back to the
    /// `"default"` entry.
    pub fn resolve(&self, step_name: &str) -> Option<&T> {
        self.entries
            .get(step_name)
            .or_else(|| self.entries.get(DEFAULT_KEY))
    }
}

/// A concrete invocation of a workflow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Job {
    #[serde(rename = "gfVersion", default = "default_gf_version_job")]
    pub gf_version: String,
    #[serde(default)]
    pub job_id: String,
    #[serde(default = "default_username")]
    pub username: String,
    pub name: String,
    #[serde(default)]
    pub workflow_id: String,
    #[serde(default)]
    pub workflow_name: String,
    pub output_uri: String,
    pub work_uri: HashMap<String, String>,
    #[serde(default)]
    pub no_output_hash: bool,
    #[serde(default)]
    pub inputs: HashMap<String, StringOrList>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    #[serde(default)]
    pub publish: Vec<String>,
    #[serde(default)]
    pub execution: JobExecution,
}

fn default_gf_version_job() -> String {
    crate::app::GF_VERSION.to_string()
}

fn default_username() -> String {
    "user".to_string()
}

/// The job's three-level `{context, method, parameters}` execution override.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobExecution {
    #[serde(default)]
    pub context: ExecutionOverride<String>,
    #[serde(default)]
    pub method: ExecutionOverride<String>,
    #[serde(default)]
    pub parameters: ExecutionOverride<HashMap<String, String>>,
}

impl Job {
    pub fn validate(&self) -> Result<()> {
        if self.gf_version != crate::app::GF_VERSION {
            return Err(OrchestratorError::validation(
                format!("unsupported gfVersion: {}", self.gf_version),
                self.name.clone(),
            ));
        }
        if self.output_uri.is_empty() {
            return Err(OrchestratorError::validation(
                "output_uri is required",
                self.name.clone(),
            ));
        }
        if self.work_uri.is_empty() {
            return Err(OrchestratorError::validation(
                "work_uri is required",
                self.name.clone(),
            ));
        }
        for key in self.inputs.keys().chain(self.parameters.keys()) {
            if !is_valid_key(key) {
                return Err(OrchestratorError::validation(
                    format!("invalid key name: {key}"),
                    self.name.clone(),
                ));
            }
        }
        Ok(())
    }

    /// The effective execution context for `step_name`: per-step override,
    /// else the job's `default` entry, else `"local"`.
    pub fn context_for(&self, step_name: &str) -> String {
        self.execution
            .context
            .resolve(step_name)
            .cloned()
            .unwrap_or_else(|| "local".to_string())
    }

    pub fn method_for(&self, step_name: &str) -> String {
        self.execution
            .method
            .resolve(step_name)
            .cloned()
            .unwrap_or_else(|| "auto".to_string())
    }

    pub fn parameters_for(&self, step_name: &str) -> HashMap<String, String> {
        self.execution
            .parameters
            .resolve(step_name)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job {
            gf_version: "v3.0".into(),
            name: "job1".into(),
            output_uri: "file:///out".into(),
            work_uri: HashMap::from([("local".to_string(), "file:///work".to_string())]),
            ..Default::default()
        }
    }

    #[test]
    fn rejects_missing_output_uri() {
        let mut j = job();
        j.output_uri.clear();
        assert!(j.validate().is_err());
    }

    #[test]
    fn context_override_falls_back_to_default() {
        let mut j = job();
        j.execution.context.entries.insert("default".into(), "gridengine".into());
        assert_eq!(j.context_for("unrelated_step"), "gridengine");
        j.execution.context.entries.insert("step1".into(), "slurm".into());
        assert_eq!(j.context_for("step1"), "slurm");
    }
}
