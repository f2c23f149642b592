// Copyright (c) 2025 GeneFlow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Step status reporting sinks: an opaque record of what the scheduler
//! observed, not a job database. Mirrors the shape of an audit log (one
//! append-only record per observation) without the durability or querying
//! guarantees a real job database would need.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use geneflow_core::scheduler::StatusSink;
use geneflow_core::step::StepAggregateStatus;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// One observed status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub workflow_name: String,
    pub step_name: String,
    pub status: String,
    pub detail: serde_json::Value,
    pub observed_at: DateTime<Utc>,
}

fn status_label(status: StepAggregateStatus) -> &'static str {
    match status {
        StepAggregateStatus::Pending => "pending",
        StepAggregateStatus::Running => "running",
        StepAggregateStatus::Finished => "finished",
        StepAggregateStatus::Failed => "failed",
    }
}

/// Keeps only the latest record per `(workflow, step)` in memory.
#[derive(Default)]
pub struct InMemoryStatusSink {
    records: DashMap<(String, String), StatusRecord>,
}

impl InMemoryStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self, workflow_name: &str, step_name: &str) -> Option<StatusRecord> {
        self.records
            .get(&(workflow_name.to_string(), step_name.to_string()))
            .map(|entry| entry.clone())
    }

    pub fn all(&self) -> Vec<StatusRecord> {
        self.records.iter().map(|entry| entry.value().clone()).collect()
    }
}

impl StatusSink for InMemoryStatusSink {
    fn report(&self, workflow_name: &str, step_name: &str, status: StepAggregateStatus, detail: serde_json::Value) {
        self.records.insert(
            (workflow_name.to_string(), step_name.to_string()),
            StatusRecord {
                workflow_name: workflow_name.to_string(),
                step_name: step_name.to_string(),
                status: status_label(status).to_string(),
                detail,
                observed_at: Utc::now(),
            },
        );
    }
}

/// Appends one JSON line per observation to a file. Never rewrites or
/// compacts past entries.
pub struct FileStatusSink {
    file: Mutex<std::fs::File>,
}

impl FileStatusSink {
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path.as_ref())?;
        Ok(Self { file: Mutex::new(file) })
    }

    pub fn read_all(path: impl AsRef<Path>) -> std::io::Result<Vec<StatusRecord>> {
        let contents = std::fs::read_to_string(path)?;
        Ok(contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

impl StatusSink for FileStatusSink {
    fn report(&self, workflow_name: &str, step_name: &str, status: StepAggregateStatus, detail: serde_json::Value) {
        let record = StatusRecord {
            workflow_name: workflow_name.to_string(),
            step_name: step_name.to_string(),
            status: status_label(status).to_string(),
            detail,
            observed_at: Utc::now(),
        };
        if let Ok(line) = serde_json::to_string(&record) {
            let mut file = self.file.lock();
            let _ = writeln!(file, "{line}");
        }
    }
}

/// Convenience constructor for the default per-job status log path.
pub fn default_status_log_path(work_dir: &Path) -> PathBuf {
    work_dir.join("status.jsonl")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_sink_keeps_latest_per_step() {
        let sink = InMemoryStatusSink::new();
        sink.report("wf1", "stepA", StepAggregateStatus::Running, serde_json::json!({}));
        sink.report("wf1", "stepA", StepAggregateStatus::Finished, serde_json::json!({"n": 1}));
        let latest = sink.latest("wf1", "stepA").unwrap();
        assert_eq!(latest.status, "finished");
    }

    #[test]
    fn file_sink_round_trips_records() {
        let tmp = tempfile::tempdir().unwrap();
        let path = default_status_log_path(tmp.path());
        {
            let sink = FileStatusSink::open(&path).unwrap();
            sink.report("wf1", "stepA", StepAggregateStatus::Running, serde_json::json!({}));
            sink.report("wf1", "stepB", StepAggregateStatus::Finished, serde_json::json!({}));
        }
        let records = FileStatusSink::read_all(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].step_name, "stepA");
    }
}
