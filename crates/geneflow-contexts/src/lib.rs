// Copyright (c) 2025 GeneFlow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Execution context adapters: one [`geneflow_core::step::Backend`] per
//! `execution.context` value a workflow step may declare.

pub mod agave;
pub mod commands;
pub mod gridengine;
pub mod local;
pub mod slurm;
pub mod template;

pub use agave::{AgaveBackend, AgaveRunnerFactory};
pub use gridengine::{GridEngineBackend, GridEngineRunnerFactory};
pub use local::{LocalBackend, LocalRunnerFactory};
pub use slurm::{SlurmBackend, SlurmRunnerFactory};

use geneflow_core::app::App;
use geneflow_core::data_manager::DataManager;
use geneflow_core::error::{OrchestratorError, Result};
use geneflow_core::scheduler::{StepRunner, StepRunnerFactory};
use geneflow_core::uri::Uri;
use geneflow_core::workflow::Step;
use std::sync::Arc;

/// Optional remote-gateway settings for the `agave` context, only needed
/// when a workflow actually declares a step with that context.
#[derive(Debug, Clone, Default)]
pub struct AgaveGatewayConfig {
    pub base_url: String,
    pub token: String,
}

/// Dispatches to the concrete backend factory matching a step's declared
/// `execution.context`, so one workflow can mix execution contexts across
/// its steps.
pub struct DispatchingRunnerFactory {
    local: LocalRunnerFactory,
    gridengine: GridEngineRunnerFactory,
    slurm: SlurmRunnerFactory,
    agave: Option<AgaveRunnerFactory>,
}

impl DispatchingRunnerFactory {
    pub fn new(data_manager: Arc<dyn DataManager>, agave: Option<AgaveGatewayConfig>) -> Self {
        Self {
            local: LocalRunnerFactory { data_manager: data_manager.clone() },
            gridengine: GridEngineRunnerFactory { data_manager: data_manager.clone() },
            slurm: SlurmRunnerFactory { data_manager: data_manager.clone() },
            agave: agave.map(|cfg| AgaveRunnerFactory {
                data_manager,
                base_url: cfg.base_url,
                token: cfg.token,
            }),
        }
    }
}

impl StepRunnerFactory for DispatchingRunnerFactory {
    fn create(&self, step: &Step, app: &App, output_uri: Uri, job_retry: u32) -> Result<Box<dyn StepRunner>> {
        match step.execution.context.as_str() {
            "local" => self.local.create(step, app, output_uri, job_retry),
            "gridengine" => self.gridengine.create(step, app, output_uri, job_retry),
            "slurm" => self.slurm.create(step, app, output_uri, job_retry),
            "agave" => self
                .agave
                .as_ref()
                .ok_or_else(|| OrchestratorError::validation("agave gateway not configured", step.name.clone()))?
                .create(step, app, output_uri, job_retry),
            other => Err(OrchestratorError::validation(
                format!("unknown execution context: {other}"),
                step.name.clone(),
            )),
        }
    }
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
