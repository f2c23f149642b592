// Copyright (c) 2025 GeneFlow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `App` entity: a reusable, versioned unit of computation.

use crate::error::{OrchestratorError, Result};
use crate::value::is_valid_key;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const GF_VERSION: &str = "v3.0";

/// A tagged execution-phase entry: one `pre`/`methods`/`post` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionEntry {
    #[serde(rename = "type", default = "default_entry_type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(rename = "if", default)]
    pub if_predicates: Vec<String>,
    #[serde(rename = "else", default)]
    pub else_predicates: Vec<String>,
    #[serde(default)]
    pub run: String,
}

fn default_entry_type() -> EntryKind {
    EntryKind::Shell
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Docker,
    Singularity,
    #[default]
    Shell,
}

/// A named alternative within the `methods` phase; exactly one is selected
/// per run by matching `if_predicates` against the run's execution method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodAlternative {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "if", default)]
    pub if_predicates: Vec<String>,
    #[serde(default)]
    pub commands: Vec<ExecutionEntry>,
}

/// The three ordered phases of an app's execution recipe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppExecution {
    #[serde(default)]
    pub pre: Vec<ExecutionEntry>,
    #[serde(default)]
    pub methods: Vec<MethodAlternative>,
    #[serde(default)]
    pub post: Vec<ExecutionEntry>,
}

impl AppExecution {
    /// Selects the single `methods` alternative whose name matches
    /// `exec_method`, falling back to the first alternative with no
    /// constraint if none match exactly.
    pub fn select_method(&self, exec_method: &str) -> Option<&MethodAlternative> {
        self.methods
            .iter()
            .find(|m| m.name == exec_method)
            .or_else(|| self.methods.first())
    }
}

/// A post-processing rule attached to an input or parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostProcess {
    #[serde(rename = "type", default = "default_entry_type")]
    pub kind: EntryKind,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(rename = "if", default)]
    pub if_predicates: Vec<String>,
    #[serde(rename = "else", default)]
    pub else_predicates: Vec<String>,
    #[serde(default)]
    pub run: String,
}

/// A declared app input or parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IoDeclaration {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub script_default: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub test_value: String,
    #[serde(default)]
    pub post: Vec<PostProcess>,
}

/// A reusable, versioned unit of computation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct App {
    #[serde(rename = "gfVersion", default = "default_gf_version")]
    pub gf_version: String,
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
    pub inputs: HashMap<String, IoDeclaration>,
    #[serde(default)]
    pub parameters: HashMap<String, IoDeclaration>,
    #[serde(default)]
    pub images: HashMap<String, String>,
    #[serde(default)]
    pub execution: AppExecution,
}

fn default_gf_version() -> String {
    GF_VERSION.to_string()
}

impl App {
    /// Validates schema-level constraints not already enforced by serde
    /// defaults: `gfVersion`, key-name rules, and description length.
    pub fn validate(&self) -> Result<()> {
        if self.gf_version != GF_VERSION {
            return Err(OrchestratorError::validation(
                format!("unsupported gfVersion: {}", self.gf_version),
                self.name.clone(),
            ));
        }
        if self.name.is_empty() {
            return Err(OrchestratorError::validation("app name is required", "<app>"));
        }
        if self.description.len() > 64 {
            return Err(OrchestratorError::validation(
                "description exceeds 64 characters",
                self.name.clone(),
            ));
        }
        for key in self
            .inputs
            .keys()
            .chain(self.parameters.keys())
            .chain(self.images.keys())
        {
            if !is_valid_key(key) {
                return Err(OrchestratorError::validation(
                    format!("invalid key name: {key}"),
                    self.name.clone(),
                ));
            }
        }
        Ok(())
    }
}
