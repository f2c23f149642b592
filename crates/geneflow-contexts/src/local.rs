// Copyright (c) 2025 GeneFlow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `local` execution context: runs an app's resolved shell commands as a
//! child process on the same host the engine runs on. Submission is
//! synchronous, so every map item is already terminal by the time `submit`
//! returns.

use crate::commands::resolved_commands;
use async_trait::async_trait;
use geneflow_core::app::App;
use geneflow_core::data_manager::{DataManager, DataManagerCtx};
use geneflow_core::error::{OrchestratorError, Result};
use geneflow_core::scheduler::{StepRunner, StepRunnerFactory};
use geneflow_core::step::{Backend, MapItem, MapItemStatus, RunAttempt, StepMachine};
use geneflow_core::uri::Uri;
use geneflow_core::workflow::Step;
use std::sync::Arc;
use tracing::debug;

pub struct LocalBackend;

#[async_trait]
impl Backend for LocalBackend {
    fn context_name(&self) -> &'static str {
        "local"
    }

    async fn submit(&self, step: &Step, app: &App, map_item: &MapItem, archive_root: &Uri) -> Result<RunAttempt> {
        let commands = resolved_commands(app, step, map_item)?;
        let job_id = uuid::Uuid::new_v4().to_string();

        for command in &commands {
            debug!(step = %step.name, item = %map_item.filename, %command, "running local command");
            let status = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(&archive_root.chopped_path)
                .status()
                .await
                .map_err(|e| OrchestratorError::submit(e.to_string(), map_item.filename.clone()))?;

            if !status.success() {
                return Ok(RunAttempt {
                    job_id,
                    extra_job_id: None,
                    archive_uri: None,
                    status: Some(MapItemStatus::Failed),
                });
            }
        }

        Ok(RunAttempt {
            job_id,
            extra_job_id: None,
            archive_uri: None,
            status: Some(MapItemStatus::Finished),
        })
    }

    async fn poll(&self, attempt: &RunAttempt) -> Result<MapItemStatus> {
        Ok(attempt.status.unwrap_or(MapItemStatus::Unknown))
    }

    async fn cancel(&self, _attempt: &RunAttempt) -> Result<()> {
        Ok(())
    }

    async fn collect_output(
        &self,
        _attempt: &RunAttempt,
        output_name: &str,
        dest_dir: &Uri,
        data_manager: &dyn DataManager,
        ctx: &DataManagerCtx,
    ) -> Result<()> {
        // the command already wrote directly into the step's working
        // directory; nothing staged from an archive for the local context.
        let _ = (output_name, dest_dir, data_manager, ctx);
        Ok(())
    }

    fn archive_root(&self, work_uri: &Uri) -> Uri {
        work_uri.clone()
    }
}

pub struct LocalRunnerFactory {
    pub data_manager: Arc<dyn DataManager>,
}

impl StepRunnerFactory for LocalRunnerFactory {
    fn create(&self, step: &Step, app: &App, output_uri: Uri, job_retry: u32) -> Result<Box<dyn StepRunner>> {
        Ok(Box::new(StepMachine::new(
            step.clone(),
            app.clone(),
            LocalBackend,
            self.data_manager.clone(),
            DataManagerCtx::default(),
            output_uri,
            job_retry,
            true,
        )))
    }
}
