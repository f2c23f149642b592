// Copyright (c) 2025 GeneFlow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `Workflow` entity: a named DAG of steps binding apps to an execution
//! context.

use crate::error::{OrchestratorError, Result};
use crate::value::{is_valid_key, StringOrList};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_gf_version_pub() -> String {
    crate::app::GF_VERSION.to_string()
}

/// A workflow-level input or parameter declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowIoDeclaration {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default: Option<StringOrList>,
    #[serde(default)]
    pub value: Option<StringOrList>,
}

/// An app reference within a workflow's `apps` mapping: a git URI + version,
/// plus input/parameter/image binding overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppBinding {
    #[serde(default)]
    pub git: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub inputs: HashMap<String, String>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    #[serde(default)]
    pub images: HashMap<String, String>,
}

/// How a step enumerates its unit (map) tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MapSpec {
    #[serde(default)]
    pub uri: String,
    #[serde(default = "default_glob")]
    pub glob: String,
    #[serde(default)]
    pub regex: String,
    #[serde(default)]
    pub inclusive: bool,
}

fn default_glob() -> String {
    "*".to_string()
}

impl Default for MapSpec {
    fn default() -> Self {
        Self {
            uri: String::new(),
            glob: default_glob(),
            regex: String::new(),
            inclusive: false,
        }
    }
}

/// A step's execution-context binding: which backend, which method, and any
/// backend-specific parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepExecution {
    #[serde(default = "default_context")]
    pub context: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

fn default_context() -> String {
    "local".to_string()
}

fn default_method() -> String {
    "auto".to_string()
}

impl Default for StepExecution {
    fn default() -> Self {
        Self {
            context: default_context(),
            method: default_method(),
            parameters: HashMap::new(),
        }
    }
}

const ALLOWED_CONTEXTS: &[&str] = &["local", "gridengine", "slurm", "agave"];

/// One node of the workflow DAG.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    #[serde(default)]
    pub step_id: String,
    /// Filled in by the Definition store from the `steps` mapping key.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub app_id: String,
    /// Exactly one of `app_name` / `app` is present; enforced in `validate`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(default)]
    pub depend: Vec<String>,
    /// Populated by the DAG analyzer; `0` until numbered.
    #[serde(default)]
    pub number: u32,
    #[serde(default)]
    pub letter: String,
    #[serde(default)]
    pub map: MapSpec,
    #[serde(default)]
    pub template: HashMap<String, String>,
    #[serde(default)]
    pub publish: bool,
    #[serde(default)]
    pub execution: StepExecution,
}

impl Step {
    pub fn validate(&self) -> Result<()> {
        match (&self.app_name, &self.app) {
            (Some(_), Some(_)) => {
                return Err(OrchestratorError::validation(
                    "step must specify app_name or app, not both",
                    self.name.clone(),
                ))
            }
            (None, None) => {
                return Err(OrchestratorError::validation(
                    "step must specify either app_name or app",
                    self.name.clone(),
                ))
            }
            _ => {}
        }

        if !self.template.contains_key("output") {
            return Err(OrchestratorError::validation(
                "step template must bind 'output'",
                self.name.clone(),
            ));
        }

        if !ALLOWED_CONTEXTS.contains(&self.execution.context.as_str()) {
            return Err(OrchestratorError::validation(
                format!("invalid execution context: {}", self.execution.context),
                self.name.clone(),
            ));
        }

        Ok(())
    }
}

/// A named DAG of steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Workflow {
    #[serde(rename = "gfVersion", default = "default_gf_version_pub")]
    pub gf_version: String,
    #[serde(default)]
    pub workflow_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub git: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub inputs: HashMap<String, WorkflowIoDeclaration>,
    #[serde(default)]
    pub parameters: HashMap<String, WorkflowIoDeclaration>,
    #[serde(default)]
    pub publish: Vec<String>,
    #[serde(default)]
    pub apps: HashMap<String, AppBinding>,
    pub steps: HashMap<String, Step>,
}

impl Workflow {
    pub fn validate(&self) -> Result<()> {
        if self.gf_version != crate::app::GF_VERSION {
            return Err(OrchestratorError::validation(
                format!("unsupported gfVersion: {}", self.gf_version),
                self.name.clone(),
            ));
        }
        if self.name.is_empty() {
            return Err(OrchestratorError::validation(
                "workflow name is required",
                "<workflow>",
            ));
        }

        for key in self
            .inputs
            .keys()
            .chain(self.parameters.keys())
            .chain(self.apps.keys())
            .chain(self.steps.keys())
        {
            if !is_valid_key(key) {
                return Err(OrchestratorError::validation(
                    format!("invalid key name: {key}"),
                    self.name.clone(),
                ));
            }
        }

        for (step_name, step) in &self.steps {
            step.validate()
                .map_err(|_| OrchestratorError::validation("invalid step", step_name.clone()))?;
            for dep in &step.depend {
                if !self.steps.contains_key(dep) {
                    return Err(OrchestratorError::graph(
                        format!("step '{step_name}' depends on unknown step"),
                        dep.clone(),
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(depend: Vec<&str>) -> Step {
        Step {
            app_name: Some("app1".into()),
            depend: depend.into_iter().map(String::from).collect(),
            template: HashMap::from([("output".to_string(), "{{ output }}".to_string())]),
            ..Default::default()
        }
    }

    #[test]
    fn rejects_both_app_and_app_name() {
        let mut s = step(vec![]);
        s.app = Some("inline".into());
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_missing_output_template() {
        let mut s = step(vec![]);
        s.template.clear();
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_unknown_dependency() {
        let mut wf = Workflow {
            gf_version: "v3.0".into(),
            name: "wf".into(),
            ..Default::default()
        };
        wf.steps.insert("a".into(), step(vec!["missing"]));
        assert!(wf.validate().is_err());
    }
}
