// Copyright (c) 2025 GeneFlow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Renders an app's execution-entry commands against a map item's resolved
//! template and a step's execution parameters.

use geneflow_core::error::{OrchestratorError, Result};
use handlebars::Handlebars;
use std::collections::HashMap;

/// Renders `run` as a handlebars template against `template` and
/// `parameters`, with `parameters` taking precedence on key collision.
pub fn render_command(
    run: &str,
    template: &HashMap<String, String>,
    parameters: &HashMap<String, String>,
) -> Result<String> {
    let mut data: HashMap<&str, &str> = HashMap::new();
    for (k, v) in template {
        data.insert(k.as_str(), v.as_str());
    }
    for (k, v) in parameters {
        data.insert(k.as_str(), v.as_str());
    }

    let hb = Handlebars::new();
    hb.render_template(run, &data)
        .map_err(|e| OrchestratorError::validation(e.to_string(), "<template>"))
}
