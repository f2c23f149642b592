// Copyright (c) 2025 GeneFlow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The workflow engine: drives every step of a [`Workflow`] through the
//! state machine contract in dependency order, polling running steps until
//! the whole DAG finishes or a step exhausts its retries.

use crate::app::App;
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::job::Job;
use crate::step::StepAggregateStatus;
use crate::uri::Uri;
use crate::workflow::{Step, Workflow};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// A cooperative cancel signal shared between a running [`Scheduler`] and
/// whoever holds the handle. Checked once per loop iteration: halts further
/// submissions and best-effort-cancels whatever is currently running.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Object-safe view over a [`crate::step::StepMachine`], generic over its
/// backend erased behind a trait object so the scheduler can drive
/// heterogeneous execution contexts within one workflow.
#[async_trait]
pub trait StepRunner: Send + Sync {
    fn step_name(&self) -> &str;
    async fn initialize(&mut self) -> Result<()>;
    /// Creates the output directory and enumerates map items.
    async fn prepare(&mut self) -> Result<()>;
    async fn run(&mut self) -> Result<()>;
    async fn poll(&mut self);
    /// Resubmits any failed map item; returns the retry-exhausted error if
    /// the limit has been reached.
    async fn retry(&mut self) -> Result<()>;
    async fn finalize(&mut self) -> Result<()>;
    /// Best-effort cancellation of every live map item.
    async fn cancel(&self);
    fn status(&self) -> StepAggregateStatus;
    fn output_uri(&self) -> &Uri;
    fn detail(&self) -> serde_json::Value;
}

#[async_trait]
impl<B: crate::step::Backend> StepRunner for crate::step::StepMachine<B> {
    fn step_name(&self) -> &str {
        &self.step.name
    }

    async fn initialize(&mut self) -> Result<()> {
        crate::step::StepMachine::initialize(self)
    }

    async fn prepare(&mut self) -> Result<()> {
        self.init_data_uri().await?;
        let filenames = self.get_map_uri_list().await?;
        self.build_map_items(filenames);
        Ok(())
    }

    async fn run(&mut self) -> Result<()> {
        crate::step::StepMachine::run(self).await
    }

    async fn poll(&mut self) {
        self.check_running_jobs().await;
    }

    async fn retry(&mut self) -> Result<()> {
        self.retry_failed().await
    }

    async fn finalize(&mut self) -> Result<()> {
        self.clean_up().await
    }

    async fn cancel(&self) {
        crate::step::StepMachine::cancel(self).await
    }

    fn status(&self) -> StepAggregateStatus {
        self.aggregate_status()
    }

    fn output_uri(&self) -> &Uri {
        &self.output_uri
    }

    fn detail(&self) -> serde_json::Value {
        self.serialize_detail()
    }
}

/// Builds a [`StepRunner`] for one step, resolving its bound app and output
/// directory. Implemented once per execution context in `geneflow-contexts`.
pub trait StepRunnerFactory: Send + Sync {
    fn create(&self, step: &Step, app: &App, output_uri: Uri, job_retry: u32) -> Result<Box<dyn StepRunner>>;
}

/// Reports aggregate step status as the workflow progresses. Implemented by
/// `geneflow-status`'s sinks; the no-op default is used when status
/// reporting is not configured.
pub trait StatusSink: Send + Sync {
    fn report(&self, workflow_name: &str, step_name: &str, status: StepAggregateStatus, detail: serde_json::Value);
}

/// Discards every status update. Used when no sink is configured.
pub struct NullStatusSink;

impl StatusSink for NullStatusSink {
    fn report(&self, _workflow_name: &str, _step_name: &str, _status: StepAggregateStatus, _detail: serde_json::Value) {}
}

/// The terminal outcome of a workflow run.
#[derive(Debug, Default)]
pub struct WorkflowOutcome {
    pub finished: Vec<String>,
    pub failed: Vec<String>,
}

impl WorkflowOutcome {
    pub fn succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Drives one workflow to completion.
pub struct Scheduler<'a> {
    workflow: &'a Workflow,
    apps: &'a HashMap<String, App>,
    job: Option<&'a Job>,
    factory: Arc<dyn StepRunnerFactory>,
    config: OrchestratorConfig,
    work_uri: Uri,
    status_sink: Arc<dyn StatusSink>,
    cancel_token: CancelToken,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        workflow: &'a Workflow,
        apps: &'a HashMap<String, App>,
        job: Option<&'a Job>,
        factory: Arc<dyn StepRunnerFactory>,
        config: OrchestratorConfig,
        work_uri: Uri,
    ) -> Self {
        Self {
            workflow,
            apps,
            job,
            factory,
            config,
            work_uri,
            status_sink: Arc::new(NullStatusSink),
            cancel_token: CancelToken::new(),
        }
    }

    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.status_sink = sink;
        self
    }

    /// A clonable handle that can be used to cancel this run from another
    /// task (e.g. a signal handler) while `run` is in flight.
    pub fn cancel_handle(&self) -> CancelToken {
        self.cancel_token.clone()
    }

    fn app_for(&self, step: &Step) -> Result<&App> {
        let name = step
            .app_name
            .as_ref()
            .ok_or_else(|| OrchestratorError::validation("step has no app_name", step.name.clone()))?;
        self.apps
            .get(name)
            .ok_or_else(|| OrchestratorError::NotFound(format!("app not found: {name}")))
    }

    /// Directory name convention: `{number}{letter}-{name}`, so a directory
    /// listing sorts in execution-layer order.
    fn output_uri_for(&self, step: &Step) -> Uri {
        let dirname = format!("{:04}{}-{}", step.number, step.letter, step.name);
        self.work_uri.join(&dirname)
    }

    /// Applies a job's per-step execution overrides (context/method/params)
    /// on top of the workflow's own defaults.
    fn resolve_step(&self, step: &Step) -> Step {
        let mut resolved = step.clone();
        if let Some(job) = self.job {
            resolved.execution.context = job.context_for(&step.name).to_string();
            resolved.execution.method = job.method_for(&step.name).to_string();
            resolved.execution.parameters = job.parameters_for(&step.name).clone();
        }
        resolved
    }

    /// Runs every step of the workflow in dependency order, polling running
    /// steps at `config.poll_interval`, until the DAG is exhausted.
    pub async fn run(&mut self) -> Result<WorkflowOutcome> {
        let mut finished: HashSet<String> = HashSet::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut running: HashMap<String, Box<dyn StepRunner>> = HashMap::new();

        loop {
            if self.cancel_token.is_cancelled() {
                warn!(workflow = %self.workflow.name, "cancellation requested, stopping running steps");
                for runner in running.values() {
                    runner.cancel().await;
                }
                return Err(OrchestratorError::Cancelled);
            }

            let propagated = self.launch_ready_steps(&finished, &failed, &mut running).await?;
            failed.extend(propagated);

            if running.is_empty() {
                break;
            }

            tokio::time::sleep(self.config.poll_interval()).await;

            let mut settled = Vec::new();
            for (name, runner) in running.iter_mut() {
                runner.poll().await;
                self.status_sink.report(&self.workflow.name, name, runner.status(), runner.detail());

                match runner.status() {
                    StepAggregateStatus::Finished => {
                        runner.finalize().await?;
                        info!(workflow = %self.workflow.name, step = %name, "step finished");
                        settled.push((name.clone(), true));
                    }
                    StepAggregateStatus::Failed => match runner.retry().await {
                        Ok(()) => {
                            info!(workflow = %self.workflow.name, step = %name, "retried failed map items");
                        }
                        Err(e) => {
                            error!(workflow = %self.workflow.name, step = %name, error = %e, "step failed, retries exhausted");
                            settled.push((name.clone(), false));
                        }
                    },
                    _ => {}
                }
            }

            for (name, ok) in settled {
                running.remove(&name);
                if ok {
                    finished.insert(name);
                } else {
                    failed.insert(name);
                }
            }
        }

        let mut outcome = WorkflowOutcome {
            finished: finished.into_iter().collect(),
            failed: failed.into_iter().collect(),
        };
        outcome.finished.sort();
        outcome.failed.sort();
        Ok(outcome)
    }

    /// Launches every step whose dependencies are all `finished`. Returns the
    /// names of steps skipped because a dependency propagated a failure to
    /// them; the caller folds these into its own `failed` set.
    async fn launch_ready_steps(
        &self,
        finished: &HashSet<String>,
        failed: &HashSet<String>,
        running: &mut HashMap<String, Box<dyn StepRunner>>,
    ) -> Result<Vec<String>> {
        let mut newly_failed = Vec::new();
        for (name, step) in &self.workflow.steps {
            if finished.contains(name) || failed.contains(name) || running.contains_key(name) {
                continue;
            }
            if step.depend.iter().any(|d| failed.contains(d)) {
                warn!(workflow = %self.workflow.name, step = %name, "skipping step with failed dependency");
                newly_failed.push(name.clone());
                continue;
            }
            if !step.depend.iter().all(|d| finished.contains(d)) {
                continue;
            }

            let resolved = self.resolve_step(step);
            let app = self.app_for(&resolved)?;
            let output_uri = self.output_uri_for(&resolved);
            let mut runner = self.factory.create(&resolved, app, output_uri, self.config.job_retry)?;
            runner.initialize().await?;
            runner.prepare().await?;
            runner.run().await?;
            info!(workflow = %self.workflow.name, step = %name, "step submitted");
            running.insert(name.clone(), runner);
        }
        Ok(newly_failed)
    }

    /// Stages each name in `publish` from the step's own output directory
    /// into `output_root`, optionally under a content-hashed subdirectory
    /// when `no_output_hash` is false.
    pub async fn publish_outputs(
        &self,
        data_manager: &dyn crate::data_manager::DataManager,
        ctx: &crate::data_manager::DataManagerCtx,
        output_root: &Uri,
        publish: &[String],
        no_output_hash: bool,
    ) -> Result<()> {
        for step_name in publish {
            let step = self
                .workflow
                .steps
                .get(step_name)
                .ok_or_else(|| OrchestratorError::NotFound(format!("publish step not found: {step_name}")))?;
            let src = self.output_uri_for(step);

            let dst = if no_output_hash {
                output_root.join(step_name)
            } else {
                let listing = data_manager.list(&src, ctx).await.unwrap_or_default();
                let mut hasher = Sha256::new();
                hasher.update(step_name.as_bytes());
                for entry in &listing {
                    hasher.update(entry.as_bytes());
                }
                let digest = format!("{:x}", hasher.finalize());
                output_root.join(&format!("{}-{}", step_name, &digest[..16]))
            };

            data_manager.mkdir(&dst, true, ctx).await?;
            for entry in data_manager.list(&src, ctx).await? {
                data_manager
                    .copy(&src.join(&entry), &dst.join(&entry), ctx)
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;
    use crate::data_manager::{DataManager, DataManagerCtx, LocalDataManager};
    use crate::step::{Backend, MapItem, MapItemStatus, RunAttempt, StepMachine};
    use crate::workflow::{MapSpec, StepExecution};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockBackend {
        submissions: AtomicU32,
        always_fail: bool,
    }

    impl MockBackend {
        fn new() -> Self {
            Self { submissions: AtomicU32::new(0), always_fail: false }
        }

        fn always_failing() -> Self {
            Self { submissions: AtomicU32::new(0), always_fail: true }
        }
    }

    #[async_trait]
    impl Backend for MockBackend {
        fn context_name(&self) -> &'static str {
            "local"
        }

        async fn submit(&self, _step: &Step, _app: &App, map_item: &MapItem, _archive_root: &Uri) -> Result<RunAttempt> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            Ok(RunAttempt {
                job_id: format!("job-{}", map_item.filename),
                extra_job_id: None,
                archive_uri: None,
                status: Some(MapItemStatus::Pending),
            })
        }

        async fn poll(&self, _attempt: &RunAttempt) -> Result<MapItemStatus> {
            Ok(if self.always_fail { MapItemStatus::Failed } else { MapItemStatus::Finished })
        }

        async fn cancel(&self, _attempt: &RunAttempt) -> Result<()> {
            Ok(())
        }

        async fn collect_output(
            &self,
            _attempt: &RunAttempt,
            _output_name: &str,
            _dest_dir: &Uri,
            _data_manager: &dyn DataManager,
            _ctx: &DataManagerCtx,
        ) -> Result<()> {
            Ok(())
        }
    }

    struct MockRunnerFactory {
        data_manager: Arc<dyn DataManager>,
        map_uri: Uri,
        fail_steps: HashSet<String>,
    }

    impl StepRunnerFactory for MockRunnerFactory {
        fn create(&self, step: &Step, app: &App, output_uri: Uri, job_retry: u32) -> Result<Box<dyn StepRunner>> {
            let mut step = step.clone();
            step.map = MapSpec {
                uri: self.map_uri.chopped_uri.clone(),
                ..MapSpec::default()
            };
            let backend = if self.fail_steps.contains(&step.name) {
                MockBackend::always_failing()
            } else {
                MockBackend::new()
            };
            Ok(Box::new(StepMachine::new(
                step,
                app.clone(),
                backend,
                self.data_manager.clone(),
                DataManagerCtx::default(),
                output_uri,
                job_retry,
                true,
            )))
        }
    }

    fn test_step(name: &str, depend: Vec<&str>) -> Step {
        Step {
            name: name.into(),
            app_name: Some("app1".into()),
            depend: depend.into_iter().map(String::from).collect(),
            template: HashMap::from([("output".to_string(), "{{ filename }}.out".to_string())]),
            execution: StepExecution {
                context: "local".into(),
                method: "auto".into(),
                parameters: HashMap::new(),
            },
            ..Default::default()
        }
    }

    /// Linear DAG: stepA -> stepB. Both map over the same single input file
    /// through a mock local backend; asserts the scheduler drives both steps
    /// to completion in dependency order.
    #[tokio::test]
    async fn linear_dag_runs_to_completion_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let dm: Arc<dyn DataManager> = Arc::new(LocalDataManager);
        let ctx = DataManagerCtx::default();

        let input_uri = Uri::parse(&format!("local://{}/input", tmp.path().display()));
        dm.mkdir(&input_uri, true, &ctx).await.unwrap();
        tokio::fs::write(tmp.path().join("input").join("a.txt"), b"hi").await.unwrap();

        let mut steps = HashMap::new();
        steps.insert("stepA".to_string(), test_step("stepA", vec![]));
        steps.insert("stepB".to_string(), test_step("stepB", vec!["stepA"]));

        let workflow = Workflow {
            gf_version: crate::app::GF_VERSION.to_string(),
            name: "test-workflow".into(),
            steps,
            ..Default::default()
        };

        let mut apps = HashMap::new();
        apps.insert("app1".to_string(), App { name: "app1".into(), ..Default::default() });

        let factory = Arc::new(MockRunnerFactory { data_manager: dm, map_uri: input_uri, fail_steps: HashSet::new() });
        let work_uri = Uri::parse(&format!("local://{}/work", tmp.path().display()));
        let config = OrchestratorConfig { poll_interval_secs: 0, ..OrchestratorConfig::default() };

        let mut scheduler = Scheduler::new(&workflow, &apps, None, factory, config, work_uri);
        let outcome = scheduler.run().await.unwrap();

        assert!(outcome.succeeded());
        assert_eq!(outcome.finished, vec!["stepA".to_string(), "stepB".to_string()]);
        assert!(outcome.failed.is_empty());
    }

    /// A step whose map input directory doesn't exist fails `prepare`,
    /// aborting the whole run rather than silently skipping it.
    #[tokio::test]
    async fn missing_map_input_aborts_run() {
        let tmp = tempfile::tempdir().unwrap();
        let dm: Arc<dyn DataManager> = Arc::new(LocalDataManager);

        let input_uri = Uri::parse(&format!("local://{}/missing-input", tmp.path().display()));

        let mut steps = HashMap::new();
        steps.insert("stepA".to_string(), test_step("stepA", vec![]));
        steps.insert("stepB".to_string(), test_step("stepB", vec!["stepA"]));

        let workflow = Workflow {
            gf_version: crate::app::GF_VERSION.to_string(),
            name: "test-workflow".into(),
            steps,
            ..Default::default()
        };

        let mut apps = HashMap::new();
        apps.insert("app1".to_string(), App { name: "app1".into(), ..Default::default() });

        // stepA's map.uri does not exist, so prepare() fails and launch
        // propagates the error rather than ever marking it running.
        let factory = Arc::new(MockRunnerFactory { data_manager: dm, map_uri: input_uri, fail_steps: HashSet::new() });
        let work_uri = Uri::parse(&format!("local://{}/work", tmp.path().display()));
        let config = OrchestratorConfig { poll_interval_secs: 0, ..OrchestratorConfig::default() };

        let mut scheduler = Scheduler::new(&workflow, &apps, None, factory, config, work_uri);
        assert!(scheduler.run().await.is_err());
    }

    /// stepA always fails and exhausts its retry budget; stepB depends on it
    /// and must never run, but must still be recorded as failed rather than
    /// silently disappearing from the outcome.
    #[tokio::test]
    async fn dependency_failure_propagates_to_dependents() {
        let tmp = tempfile::tempdir().unwrap();
        let dm: Arc<dyn DataManager> = Arc::new(LocalDataManager);
        let ctx = DataManagerCtx::default();

        let input_uri = Uri::parse(&format!("local://{}/input", tmp.path().display()));
        dm.mkdir(&input_uri, true, &ctx).await.unwrap();
        tokio::fs::write(tmp.path().join("input").join("a.txt"), b"hi").await.unwrap();

        let mut steps = HashMap::new();
        steps.insert("stepA".to_string(), test_step("stepA", vec![]));
        steps.insert("stepB".to_string(), test_step("stepB", vec!["stepA"]));

        let workflow = Workflow {
            gf_version: crate::app::GF_VERSION.to_string(),
            name: "test-workflow".into(),
            steps,
            ..Default::default()
        };

        let mut apps = HashMap::new();
        apps.insert("app1".to_string(), App { name: "app1".into(), ..Default::default() });

        let factory = Arc::new(MockRunnerFactory {
            data_manager: dm,
            map_uri: input_uri,
            fail_steps: HashSet::from(["stepA".to_string()]),
        });
        let work_uri = Uri::parse(&format!("local://{}/work", tmp.path().display()));
        let config = OrchestratorConfig { poll_interval_secs: 0, job_retry: 0, ..OrchestratorConfig::default() };

        let mut scheduler = Scheduler::new(&workflow, &apps, None, factory, config, work_uri);
        let outcome = scheduler.run().await.unwrap();

        assert!(!outcome.succeeded());
        assert_eq!(outcome.failed, vec!["stepA".to_string(), "stepB".to_string()]);
        assert!(outcome.finished.is_empty());
    }
}
