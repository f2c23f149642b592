// Copyright (c) 2025 GeneFlow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! GeneFlow CLI.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use geneflow_contexts::{AgaveGatewayConfig, DispatchingRunnerFactory};
use geneflow_core::config::OrchestratorConfig;
use geneflow_core::data_manager::{DataManager, DataManagerCtx, LocalDataManager};
use geneflow_core::definition::Definition;
use geneflow_core::scheduler::Scheduler;
use geneflow_core::uri::Uri;
use geneflow_status::FileStatusSink;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "geneflow")]
#[command(version, about = "Scientific workflow orchestrator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Minimum log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Append logs to this file in addition to stderr
    #[arg(long, global = true)]
    log_file: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate app/workflow/job definitions (multi-document YAML)
    Validate {
        /// Path to a definition file
        #[arg(value_name = "FILE")]
        file: String,
    },

    /// Run a job against its workflow
    Run {
        /// Path to a definition file containing app and workflow documents
        #[arg(value_name = "FILE")]
        file: String,

        /// Path to a definition file containing the job document
        #[arg(long)]
        job: String,

        /// Path to an orchestrator config file
        #[arg(long)]
        config: Option<String>,

        /// Agave gateway base URL (only needed if any step uses the agave context)
        #[arg(long, env = "GENEFLOW_AGAVE_BASE_URL")]
        agave_base_url: Option<String>,

        /// Agave gateway bearer token
        #[arg(long, env = "GENEFLOW_AGAVE_TOKEN")]
        agave_token: Option<String>,
    },

    /// Print recorded step statuses from a status log
    Status {
        /// Path to a FileStatusSink JSONL log
        #[arg(value_name = "FILE")]
        file: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("geneflow={}", cli.log_level).into());

    // kept alive for the process lifetime: dropping it stops the non-blocking writer.
    let _log_file_guard = cli.log_file.as_ref().map(|path| {
        let file = std::fs::OpenOptions::new().create(true).append(true).open(path).unwrap_or_else(|e| {
            eprintln!("{} failed to open log file {path}: {e}", "Error:".red().bold());
            std::process::exit(1);
        });
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        tracing_subscriber::registry()
            .with(env_filter.clone())
            .with(tracing_subscriber::fmt::layer())
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
            .init();
        guard
    });
    if cli.log_file.is_none() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let result = match cli.command {
        Commands::Validate { file } => validate(&file),
        Commands::Run { file, job, config, agave_base_url, agave_token } => {
            run(&file, &job, config.as_deref(), agave_base_url, agave_token).await
        }
        Commands::Status { file } => status(&file),
    };

    if let Err(e) = result {
        error!("{}", e);
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn validate(file_path: &str) -> Result<()> {
    println!("{} {}", "Validating:".cyan().bold(), file_path);

    let mut definition = Definition::new();
    definition
        .load(Path::new(file_path))
        .with_context(|| format!("definition failed to validate: {file_path}"))?;

    println!("{}", "✓ Definition is valid".green().bold());
    println!("  Apps: {}", definition.apps().len());
    for (name, workflow) in definition.workflows() {
        println!("  Workflow: {name} ({} steps)", workflow.steps.len());
        let mut steps: Vec<_> = workflow.steps.values().collect();
        steps.sort_by_key(|s| (s.number, s.letter.clone()));
        for step in steps {
            let label = if step.letter.is_empty() {
                step.number.to_string()
            } else {
                format!("{}{}", step.number, step.letter)
            };
            println!("    [{label}] {} (context: {})", step.name, step.execution.context);
        }
    }
    println!("  Jobs: {}", definition.jobs().len());

    Ok(())
}

async fn run(
    file_path: &str,
    job_path: &str,
    config_path: Option<&str>,
    agave_base_url: Option<String>,
    agave_token: Option<String>,
) -> Result<()> {
    println!("{} {}", "Running:".cyan().bold(), file_path);

    let mut definition = Definition::new();
    definition
        .load(Path::new(file_path))
        .with_context(|| format!("failed to load definitions: {file_path}"))?;
    definition
        .load(Path::new(job_path))
        .with_context(|| format!("failed to load job: {job_path}"))?;

    let workflow = definition
        .workflows()
        .values()
        .next()
        .context("definition file contains no workflow")?;
    let job = definition.jobs().values().next().context("job file contains no job")?;

    info!(workflow = %workflow.name, job = %job.name, "starting run");

    let config = match config_path {
        Some(path) => OrchestratorConfig::load(Path::new(path))?,
        None => OrchestratorConfig::default(),
    };

    let data_manager: Arc<dyn DataManager> = Arc::new(LocalDataManager);
    let agave = match (agave_base_url, agave_token) {
        (Some(base_url), Some(token)) => Some(AgaveGatewayConfig { base_url, token }),
        _ => None,
    };
    let factory = Arc::new(DispatchingRunnerFactory::new(data_manager.clone(), agave));

    let work_uri = job
        .work_uri
        .get("local")
        .map(|s| Uri::parse(s))
        .unwrap_or_else(|| Uri::parse(&job.output_uri));

    data_manager
        .mkdir(&work_uri, true, &DataManagerCtx::default())
        .await
        .context("failed to create work directory")?;

    let status_path = geneflow_status::default_status_log_path(Path::new(&work_uri.chopped_path));
    let status_sink = Arc::new(FileStatusSink::open(&status_path).context("failed to open status log")?);

    let mut scheduler = Scheduler::new(workflow, definition.apps(), Some(job), factory, config, work_uri)
        .with_status_sink(status_sink);

    let cancel_token = scheduler.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_token.cancel();
        }
    });

    println!("{}", "Executing workflow...".cyan());
    let outcome = scheduler.run().await.context("workflow execution failed")?;

    if outcome.succeeded() {
        let output_uri = Uri::parse(&job.output_uri);
        let ctx = DataManagerCtx::default();
        let publish = if job.publish.is_empty() { &workflow.publish } else { &job.publish };
        scheduler
            .publish_outputs(data_manager.as_ref(), &ctx, &output_uri, publish, job.no_output_hash)
            .await
            .context("failed to publish outputs")?;

        println!("{}", "✓ Job completed successfully".green().bold());
        println!("  Finished steps: {}", outcome.finished.join(", "));
    } else {
        println!("{}", "✗ Job failed".red().bold());
        println!("  Finished: {}", outcome.finished.join(", "));
        println!("  Failed: {}", outcome.failed.join(", "));
        anyhow::bail!("one or more steps failed");
    }

    Ok(())
}

fn status(file_path: &str) -> Result<()> {
    let records = geneflow_status::FileStatusSink::read_all(file_path)
        .with_context(|| format!("failed to read status log: {file_path}"))?;

    for record in records {
        let colored_status = match record.status.as_str() {
            "finished" => record.status.green(),
            "failed" => record.status.red(),
            "running" => record.status.yellow(),
            _ => record.status.normal(),
        };
        println!(
            "{} {} [{}] {}",
            record.observed_at.to_rfc3339().dimmed(),
            record.workflow_name.cyan(),
            record.step_name,
            colored_status
        );
    }
    Ok(())
}
