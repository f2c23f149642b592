// Copyright (c) 2025 GeneFlow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-step map-reduce execution state machine.
//!
//! This is the central abstraction of the engine: every execution context
//! shares the same nine-operation contract. Concrete
//! backends differ only in how they submit and poll a single map item; that
//! difference is captured by the [`Backend`] trait, and [`StepMachine`]
//! provides the shared orchestration (retry bookkeeping, status
//! aggregation, data staging) on top of any `Backend` implementation.

use crate::app::App;
use crate::data_manager::{DataManager, DataManagerCtx};
use crate::error::{OrchestratorError, Result};
use crate::uri::Uri;
use crate::workflow::Step;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-map-item, per-attempt status. Ordering is defined by
/// [`MapItemStatus::rank`]: it doubles as the aggregate-status supremum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapItemStatus {
    Pending,
    Queued,
    Running,
    Finished,
    Failed,
    Stopped,
    Unknown,
}

impl MapItemStatus {
    /// Aggregate ordering: `Finished ≺ Unknown ≺ Running ≺ Queued ≺ Pending
    /// ≺ Failed`. A step's status is the supremum of its map items under
    /// this order; lower rank wins ties toward "still healthy".
    fn rank(self) -> u8 {
        match self {
            Self::Finished => 0,
            Self::Unknown => 1,
            Self::Running => 2,
            Self::Queued => 3,
            Self::Pending => 4,
            Self::Stopped => 5,
            Self::Failed => 6,
        }
    }

    pub fn is_terminal_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }
}

impl PartialOrd for MapItemStatus {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MapItemStatus {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// A single submission attempt for a map item. Append-only: past entries are
/// never mutated once a new attempt begins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunAttempt {
    /// Backend-opaque job id(s), serialized as returned by the backend.
    pub job_id: String,
    /// A second, backend-specific id opportunistically discovered later
    /// (e.g. an HPC queue id visible only after the job has been queued).
    pub extra_job_id: Option<String>,
    pub archive_uri: Option<String>,
    pub status: Option<MapItemStatus>,
}

/// One unit task within a step, typically corresponding to one input file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapItem {
    pub filename: String,
    pub template: HashMap<String, String>,
    pub attempt: u32,
    pub run: Vec<RunAttempt>,
    pub status: MapItemStatus,
}

impl MapItem {
    pub fn new(filename: impl Into<String>, template: HashMap<String, String>) -> Self {
        Self {
            filename: filename.into(),
            template,
            attempt: 0,
            run: vec![RunAttempt {
                status: Some(MapItemStatus::Pending),
                ..RunAttempt::default()
            }],
            status: MapItemStatus::Pending,
        }
    }

    /// `attempt == len(run) - 1` invariant.
    pub fn invariant_holds(&self) -> bool {
        self.run.len() == (self.attempt as usize) + 1
            && self.run.get(self.attempt as usize).and_then(|r| r.status) == Some(self.status)
    }

    fn current_attempt(&self) -> &RunAttempt {
        &self.run[self.attempt as usize]
    }

    fn current_attempt_mut(&mut self) -> &mut RunAttempt {
        let idx = self.attempt as usize;
        &mut self.run[idx]
    }
}

/// The backend-specific half of the contract: how to submit one map item and
/// how to poll/cancel it. Implemented once per execution context
/// (local/gridengine/slurm/agave) in `geneflow-contexts`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// The `execution.context` value this backend services.
    fn context_name(&self) -> &'static str;

    /// Submits one map item's resolved template for execution, returning
    /// the initial run-attempt record (job id + archive URI, status
    /// `Pending`). A submission failure is fatal to the whole step.
    async fn submit(
        &self,
        step: &Step,
        app: &App,
        map_item: &MapItem,
        archive_root: &Uri,
    ) -> Result<RunAttempt>;

    /// Polls the current attempt's backend status.
    async fn poll(&self, attempt: &RunAttempt) -> Result<MapItemStatus>;

    /// Best-effort cancellation of a live attempt.
    async fn cancel(&self, attempt: &RunAttempt) -> Result<()>;

    /// Copies a completed attempt's declared output artifact (and, if
    /// present, its `_log` directory) from the backend's archive location
    /// into `dest_dir`.
    async fn collect_output(
        &self,
        attempt: &RunAttempt,
        output_name: &str,
        dest_dir: &Uri,
        data_manager: &dyn DataManager,
        ctx: &DataManagerCtx,
    ) -> Result<()>;

    /// Where this backend archives job output before `collect_output` stages
    /// it into the step's final output directory.
    fn archive_root(&self, work_uri: &Uri) -> Uri {
        work_uri.join("_archive")
    }
}

/// Aggregate status of a step, derived from its map items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepAggregateStatus {
    Pending,
    Running,
    Finished,
    Failed,
}

/// Owns one step's map structure and drives it through the nine operations
/// of the state machine, parameterized over a concrete [`Backend`].
pub struct StepMachine<B: Backend> {
    pub step: Step,
    pub app: App,
    backend: B,
    data_manager: Arc<dyn DataManager>,
    dm_ctx: DataManagerCtx,
    pub map: Vec<MapItem>,
    pub output_uri: Uri,
    job_retry_limit: u32,
    clean: bool,
}

impl<B: Backend> StepMachine<B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        step: Step,
        app: App,
        backend: B,
        data_manager: Arc<dyn DataManager>,
        dm_ctx: DataManagerCtx,
        output_uri: Uri,
        job_retry_limit: u32,
        clean: bool,
    ) -> Self {
        Self {
            step,
            app,
            backend,
            data_manager,
            dm_ctx,
            map: Vec::new(),
            output_uri,
            job_retry_limit,
            clean,
        }
    }

    /// 1. Validates the adapter matches this step's declared context.
    pub fn initialize(&self) -> Result<()> {
        if self.step.execution.context != self.backend.context_name() {
            return Err(OrchestratorError::validation(
                format!(
                    "step execution context '{}' does not match adapter '{}'",
                    self.step.execution.context,
                    self.backend.context_name()
                ),
                self.step.name.clone(),
            ));
        }
        Ok(())
    }

    /// 2. Creates the step's output directory, optionally cleaning a stale
    ///    one first. A failed delete is only a warning; a failed create is
    ///    fatal.
    pub async fn init_data_uri(&self) -> Result<()> {
        if self.clean && self.data_manager.exists(&self.output_uri, &self.dm_ctx).await? {
            if let Err(e) = self.data_manager.delete(&self.output_uri, &self.dm_ctx).await {
                warn!(step = %self.step.name, error = %e, "failed to clean stale output directory");
            }
        }
        self.data_manager
            .mkdir(&self.output_uri, true, &self.dm_ctx)
            .await
            .map_err(|e| {
                OrchestratorError::data(
                    format!("cannot create output uri: {e}"),
                    self.output_uri.chopped_uri.clone(),
                )
            })
    }

    /// 3. Lists `map.uri`, filtering by `map.glob` and `map.regex`.
    pub async fn get_map_uri_list(&self) -> Result<Vec<String>> {
        let map_uri = Uri::parse(&self.step.map.uri);
        let entries = self.data_manager.list(&map_uri, &self.dm_ctx).await?;

        let glob_pattern = glob::Pattern::new(&self.step.map.glob)
            .map_err(|e| OrchestratorError::validation(e.to_string(), self.step.name.clone()))?;
        let regex = if self.step.map.regex.is_empty() {
            None
        } else {
            Some(
                regex::Regex::new(&self.step.map.regex)
                    .map_err(|e| OrchestratorError::validation(e.to_string(), self.step.name.clone()))?,
            )
        };

        Ok(entries
            .into_iter()
            .filter(|name| glob_pattern.matches(name))
            .filter(|name| regex.as_ref().map(|r| r.is_match(name)).unwrap_or(true))
            .collect())
    }

    /// 4. Populates `self.map` from the enumerated filenames, resolving each
    ///    item's template against the app's defaults.
    pub fn build_map_items(&mut self, filenames: Vec<String>) {
        self.map = filenames
            .into_iter()
            .map(|filename| {
                let template = self.resolve_template(&filename);
                MapItem::new(filename, template)
            })
            .collect();
    }

    fn resolve_template(&self, filename: &str) -> HashMap<String, String> {
        let mut template: HashMap<String, String> = self
            .app
            .inputs
            .iter()
            .chain(self.app.parameters.iter())
            .map(|(k, decl)| {
                let default = if !decl.value.is_empty() { &decl.value } else { &decl.default };
                (k.clone(), default.clone())
            })
            .collect();

        for (k, v) in &self.step.template {
            template.insert(k.clone(), v.replace("{{ filename }}", filename));
        }
        template.insert("exec_method".to_string(), self.step.execution.method.clone());
        template
    }

    /// 5. Submits one backend task per map item. A single submission
    ///    failure aborts the whole step (no partial success).
    pub async fn run(&mut self) -> Result<()> {
        let archive_root = self.backend.archive_root(&self.output_uri);
        for map_item in &mut self.map {
            let attempt = self
                .backend
                .submit(&self.step, &self.app, map_item, &archive_root)
                .await
                .map_err(|e| {
                    OrchestratorError::submit(e.to_string(), map_item.filename.clone())
                })?;
            let status = attempt.status.unwrap_or(MapItemStatus::Pending);
            map_item.status = status;
            *map_item.current_attempt_mut() = attempt;
            map_item.current_attempt_mut().status = Some(status);
        }
        info!(step = %self.step.name, items = self.map.len(), "step submitted, now running");
        Ok(())
    }

    /// 6. Polls every map item's current attempt. Unrecoverable poll errors
    ///    degrade to `Unknown` rather than failing the step.
    pub async fn check_running_jobs(&mut self) {
        for map_item in &mut self.map {
            let status = match self.backend.poll(map_item.current_attempt()).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(step = %self.step.name, item = %map_item.filename, error = %e, "poll failed, marking UNKNOWN");
                    MapItemStatus::Unknown
                }
            };
            map_item.status = status;
            map_item.current_attempt_mut().status = Some(status);
        }
    }

    /// 7. Re-submits any map item in `Failed`/`Stopped`, bounded by the
    ///    configured retry limit. Exceeding the limit is fatal.
    pub async fn retry_failed(&mut self) -> Result<()> {
        let archive_root = self.backend.archive_root(&self.output_uri);
        for map_item in &mut self.map {
            if !map_item.status.is_terminal_failure() {
                continue;
            }

            if map_item.attempt >= self.job_retry_limit {
                return Err(OrchestratorError::RetryExhausted {
                    filename: map_item.filename.clone(),
                    last_job_id: map_item.current_attempt().job_id.clone(),
                });
            }

            debug!(
                step = %self.step.name,
                item = %map_item.filename,
                attempt = map_item.attempt,
                "retrying failed map item"
            );
            map_item.attempt += 1;
            map_item.run.push(RunAttempt::default());

            let attempt = self
                .backend
                .submit(&self.step, &self.app, map_item, &archive_root)
                .await
                .map_err(|e| {
                    OrchestratorError::submit(e.to_string(), map_item.filename.clone())
                })?;
            let status = attempt.status.unwrap_or(MapItemStatus::Pending);
            *map_item.current_attempt_mut() = attempt;
            map_item.status = status;
            map_item.current_attempt_mut().status = Some(status);
        }
        Ok(())
    }

    /// 8. Stages each map item's declared output (and `_log` directory, if
    ///    present) from the backend's archive into the step's output
    ///    directory.
    pub async fn clean_up(&self) -> Result<()> {
        let output_name = self
            .step
            .template
            .get("output")
            .ok_or_else(|| OrchestratorError::validation("missing output template", self.step.name.clone()))?;

        for map_item in &self.map {
            self.backend
                .collect_output(
                    map_item.current_attempt(),
                    output_name,
                    &self.output_uri,
                    self.data_manager.as_ref(),
                    &self.dm_ctx,
                )
                .await?;
        }
        info!(step = %self.step.name, "step finished, outputs collected");
        Ok(())
    }

    /// The step's aggregate status: the supremum of its map items under
    /// [`MapItemStatus`]'s ordering.
    pub fn aggregate_status(&self) -> StepAggregateStatus {
        if self.map.is_empty() {
            return StepAggregateStatus::Finished;
        }
        if self
            .map
            .iter()
            .any(|m| m.status == MapItemStatus::Failed && m.attempt >= self.job_retry_limit)
        {
            return StepAggregateStatus::Failed;
        }
        if self.map.iter().all(|m| m.status == MapItemStatus::Finished) {
            return StepAggregateStatus::Finished;
        }
        StepAggregateStatus::Running
    }

    /// Serializes the map structure for status reporting.
    pub fn serialize_detail(&self) -> serde_json::Value {
        serde_json::to_value(&self.map).unwrap_or(serde_json::Value::Null)
    }

    /// Best-effort cancellation of every live map item.
    pub async fn cancel(&self) {
        for map_item in &self.map {
            if !matches!(
                map_item.status,
                MapItemStatus::Finished | MapItemStatus::Failed | MapItemStatus::Stopped
            ) {
                let _ = self.backend.cancel(map_item.current_attempt()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_manager::LocalDataManager;

    struct MockBackend {
        fail_first_attempt: bool,
    }

    #[async_trait]
    impl Backend for MockBackend {
        fn context_name(&self) -> &'static str {
            "local"
        }

        async fn submit(
            &self,
            _step: &Step,
            _app: &App,
            map_item: &MapItem,
            _archive_root: &Uri,
        ) -> Result<RunAttempt> {
            Ok(RunAttempt {
                job_id: format!("job-{}-{}", map_item.filename, map_item.attempt),
                extra_job_id: None,
                archive_uri: None,
                status: Some(MapItemStatus::Pending),
            })
        }

        async fn poll(&self, attempt: &RunAttempt) -> Result<MapItemStatus> {
            if self.fail_first_attempt && attempt.job_id.ends_with("-0") {
                Ok(MapItemStatus::Failed)
            } else {
                Ok(MapItemStatus::Finished)
            }
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

    fn test_step() -> Step {
        Step {
            app_name: Some("app1".into()),
            name: "step1".into(),
            execution: crate::workflow::StepExecution {
                context: "local".into(),
                method: "auto".into(),
                parameters: HashMap::new(),
            },
            template: HashMap::from([("output".to_string(), "out.txt".to_string())]),
            ..Default::default()
        }
    }

    fn machine(backend: MockBackend, retry_limit: u32) -> StepMachine<MockBackend> {
        StepMachine::new(
            test_step(),
            App::default(),
            backend,
            Arc::new(LocalDataManager),
            DataManagerCtx::default(),
            Uri::parse("local:///tmp/out"),
            retry_limit,
            false,
        )
    }

    #[tokio::test]
    async fn retry_success_ends_finished_with_two_attempts() {
        let mut m = machine(MockBackend { fail_first_attempt: true }, 1);
        m.build_map_items(vec!["sample.txt".to_string()]);
        m.run().await.unwrap();
        m.check_running_jobs().await;
        assert_eq!(m.map[0].status, MapItemStatus::Failed);

        m.retry_failed().await.unwrap();
        assert_eq!(m.map[0].attempt, 1);
        assert_eq!(m.map[0].run.len(), 2);

        m.check_running_jobs().await;
        assert_eq!(m.map[0].status, MapItemStatus::Finished);
        assert_eq!(m.aggregate_status(), StepAggregateStatus::Finished);
        assert!(m.map[0].invariant_holds());
    }

    #[tokio::test]
    async fn retry_exhaustion_is_fatal_naming_filename() {
        let mut m = machine(MockBackend { fail_first_attempt: true }, 0);
        m.build_map_items(vec!["sample.txt".to_string()]);
        m.run().await.unwrap();
        m.check_running_jobs().await;

        let err = m.retry_failed().await.unwrap_err();
        match err {
            OrchestratorError::RetryExhausted { filename, .. } => {
                assert_eq!(filename, "sample.txt");
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_map_item_list_is_immediately_finished() {
        let mut m = machine(MockBackend { fail_first_attempt: false }, 1);
        m.build_map_items(vec![]);
        m.run().await.unwrap();
        assert_eq!(m.aggregate_status(), StepAggregateStatus::Finished);
    }

    #[test]
    fn map_item_invariant_holds_on_creation() {
        let item = MapItem::new("a.txt", HashMap::new());
        assert!(item.invariant_holds());
    }

    #[test]
    fn status_ordering_matches_spec() {
        assert!(MapItemStatus::Finished < MapItemStatus::Unknown);
        assert!(MapItemStatus::Unknown < MapItemStatus::Running);
        assert!(MapItemStatus::Running < MapItemStatus::Queued);
        assert!(MapItemStatus::Queued < MapItemStatus::Pending);
        assert!(MapItemStatus::Pending < MapItemStatus::Failed);
    }
}
