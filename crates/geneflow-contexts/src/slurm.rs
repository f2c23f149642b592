// Copyright (c) 2025 GeneFlow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `slurm` execution context: submits a generated batch script via
//! `sbatch` and polls through the same exit-marker convention as the
//! gridengine adapter.

use crate::commands::resolved_commands;
use async_trait::async_trait;
use geneflow_core::app::App;
use geneflow_core::data_manager::{DataManager, DataManagerCtx};
use geneflow_core::error::{OrchestratorError, Result};
use geneflow_core::scheduler::{StepRunner, StepRunnerFactory};
use geneflow_core::step::{Backend, MapItem, MapItemStatus, RunAttempt, StepMachine};
use geneflow_core::uri::Uri;
use geneflow_core::workflow::Step;
use regex::Regex;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const SUBMIT_BIN: &str = "sbatch";
const POLL_BIN: &str = "squeue";
const CANCEL_BIN: &str = "scancel";

fn job_id_pattern() -> Regex {
    Regex::new(r"\d+").expect("static pattern")
}

async fn write_script(path: &std::path::Path, archive_dir: &str, commands: &[String]) -> Result<()> {
    let mut script = format!("#!/bin/sh\n#SBATCH --job-name=geneflow\nset -e\ncd \"{archive_dir}\"\n");
    for command in commands {
        script.push_str(command);
        script.push('\n');
    }
    script.push_str(&format!("echo $? > {}.exit\n", path.display()));

    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| OrchestratorError::submit(e.to_string(), path.display().to_string()))?;
    file.write_all(script.as_bytes())
        .await
        .map_err(|e| OrchestratorError::submit(e.to_string(), path.display().to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o755);
        tokio::fs::set_permissions(path, perms)
            .await
            .map_err(|e| OrchestratorError::submit(e.to_string(), path.display().to_string()))?;
    }
    Ok(())
}

pub struct SlurmBackend;

#[async_trait]
impl Backend for SlurmBackend {
    fn context_name(&self) -> &'static str {
        "slurm"
    }

    async fn submit(&self, step: &Step, app: &App, map_item: &MapItem, archive_root: &Uri) -> Result<RunAttempt> {
        let commands = resolved_commands(app, step, map_item)?;
        let script_path = std::path::Path::new(&archive_root.chopped_path).join(format!("{}.sbatch", map_item.filename));
        write_script(&script_path, &archive_root.chopped_path, &commands).await?;

        let output = tokio::process::Command::new(SUBMIT_BIN)
            .arg(&script_path)
            .output()
            .await
            .map_err(|e| OrchestratorError::submit(e.to_string(), map_item.filename.clone()))?;

        if !output.status.success() {
            return Err(OrchestratorError::submit(
                String::from_utf8_lossy(&output.stderr).to_string(),
                map_item.filename.clone(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let job_id = job_id_pattern()
            .find(&stdout)
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| OrchestratorError::submit("no job id in sbatch output", map_item.filename.clone()))?;

        debug!(step = %step.name, item = %map_item.filename, %job_id, "submitted to slurm");
        Ok(RunAttempt {
            job_id,
            extra_job_id: None,
            archive_uri: Some(script_path.display().to_string()),
            status: Some(MapItemStatus::Queued),
        })
    }

    async fn poll(&self, attempt: &RunAttempt) -> Result<MapItemStatus> {
        let script_path = attempt
            .archive_uri
            .clone()
            .ok_or_else(|| OrchestratorError::poll("missing script path", attempt.job_id.clone()))?;
        let exit_marker = format!("{script_path}.exit");

        if tokio::fs::metadata(&exit_marker).await.is_ok() {
            let contents = tokio::fs::read_to_string(&exit_marker).await.unwrap_or_default();
            return Ok(if contents.trim() == "0" {
                MapItemStatus::Finished
            } else {
                MapItemStatus::Failed
            });
        }

        let output = tokio::process::Command::new(POLL_BIN)
            .arg("-j")
            .arg(&attempt.job_id)
            .output()
            .await
            .map_err(|e| OrchestratorError::poll(e.to_string(), attempt.job_id.clone()))?;

        Ok(if output.status.success() {
            MapItemStatus::Running
        } else {
            MapItemStatus::Unknown
        })
    }

    async fn cancel(&self, attempt: &RunAttempt) -> Result<()> {
        let _ = tokio::process::Command::new(CANCEL_BIN)
            .arg(&attempt.job_id)
            .status()
            .await;
        Ok(())
    }

    async fn collect_output(
        &self,
        attempt: &RunAttempt,
        output_name: &str,
        dest_dir: &Uri,
        data_manager: &dyn DataManager,
        ctx: &DataManagerCtx,
    ) -> Result<()> {
        let script_path = attempt
            .archive_uri
            .clone()
            .ok_or_else(|| OrchestratorError::data("missing archive path", attempt.job_id.clone()))?;
        let archive_dir = std::path::Path::new(&script_path)
            .parent()
            .ok_or_else(|| OrchestratorError::data("archive path has no parent", attempt.job_id.clone()))?;
        let archive_uri = Uri::parse(&archive_dir.display().to_string());

        data_manager.mkdir(dest_dir, true, ctx).await?;
        data_manager
            .copy(&archive_uri.join(output_name), &dest_dir.join(output_name), ctx)
            .await?;

        let log_src = archive_uri.join("_log");
        if data_manager.exists(&log_src, ctx).await.unwrap_or(false) {
            let log_dst = dest_dir.join("_log");
            data_manager.mkdir(&log_dst, true, ctx).await?;
            for entry in data_manager.list(&log_src, ctx).await.unwrap_or_default() {
                let _ = data_manager.copy(&log_src.join(&entry), &log_dst.join(&entry), ctx).await;
            }
        }
        Ok(())
    }
}

pub struct SlurmRunnerFactory {
    pub data_manager: Arc<dyn DataManager>,
}

impl StepRunnerFactory for SlurmRunnerFactory {
    fn create(&self, step: &Step, app: &App, output_uri: Uri, job_retry: u32) -> Result<Box<dyn StepRunner>> {
        Ok(Box::new(StepMachine::new(
            step.clone(),
            app.clone(),
            SlurmBackend,
            self.data_manager.clone(),
            DataManagerCtx::default(),
            output_uri,
            job_retry,
            true,
        )))
    }
}
