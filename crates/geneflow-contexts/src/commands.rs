// Copyright (c) 2025 GeneFlow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resolves an app's `pre` + selected `methods` alternative + `post` entries
//! into one ordered list of rendered shell command lines, shared by every
//! shell-submitting backend (local, gridengine, slurm).

use crate::template::render_command;
use geneflow_core::app::App;
use geneflow_core::error::{OrchestratorError, Result};
use geneflow_core::step::MapItem;
use geneflow_core::workflow::Step;

pub fn resolved_commands(app: &App, step: &Step, map_item: &MapItem) -> Result<Vec<String>> {
    let alternative = app.execution.select_method(&step.execution.method).ok_or_else(|| {
        OrchestratorError::validation("app declares no execution methods", step.name.clone())
    })?;

    let mut rendered = Vec::new();
    for entry in &app.execution.pre {
        rendered.push(render_command(&entry.run, &map_item.template, &step.execution.parameters)?);
    }
    for entry in &alternative.commands {
        rendered.push(render_command(&entry.run, &map_item.template, &step.execution.parameters)?);
    }
    for entry in &app.execution.post {
        rendered.push(render_command(&entry.run, &map_item.template, &step.execution.parameters)?);
    }
    Ok(rendered)
}
