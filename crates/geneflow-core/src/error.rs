// Copyright (c) 2025 GeneFlow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Structured error taxonomy for the orchestration engine.

use std::time::Duration;

/// Result alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// The orchestrator's error taxonomy.
///
/// Every variant carries a human message and, where applicable, the name of
/// the offending entity (step, file, URI). Validation and graph errors are
/// fatal to loading; data errors can degrade to a warning at the call site
/// before being surfaced here; submit/retry-exhausted errors are fatal to the
/// step that raised them.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Schema mismatch in an app/workflow/job definition.
    #[error("validation error in {offender}: {message}")]
    Validation { message: String, offender: String },

    /// Cycle or dangling dependency in a workflow DAG.
    #[error("graph error: {message} (offender: {offender})")]
    Graph { message: String, offender: String },

    /// URI scheme mismatch, or mkdir/copy/list failure.
    #[error("data error: {message}")]
    Data { message: String, offender: String },

    /// Backend refused a task submission.
    #[error("submit error for map item {offender}: {message}")]
    Submit { message: String, offender: String },

    /// Backend unreachable or returned an unparseable state. Non-fatal: the
    /// caller should treat the map item as `Unknown` and re-poll.
    #[error("poll error for map item {offender}: {message}")]
    Poll { message: String, offender: String },

    /// A map item failed and `attempt` has reached the configured limit.
    #[error(
        "retry limit reached for map item '{filename}' (last job id: {last_job_id})"
    )]
    RetryExhausted {
        filename: String,
        last_job_id: String,
    },

    /// A step or map item operation exceeded its configured timeout.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// User-initiated stop. Terminal, not a failure.
    #[error("workflow cancelled")]
    Cancelled,

    /// A referenced step, app, or workflow could not be found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other internal error not covered by a dedicated variant.
    #[error("{0}")]
    Other(String),
}

impl OrchestratorError {
    pub fn validation(message: impl Into<String>, offender: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            offender: offender.into(),
        }
    }

    pub fn graph(message: impl Into<String>, offender: impl Into<String>) -> Self {
        Self::Graph {
            message: message.into(),
            offender: offender.into(),
        }
    }

    pub fn data(message: impl Into<String>, offender: impl Into<String>) -> Self {
        Self::Data {
            message: message.into(),
            offender: offender.into(),
        }
    }

    pub fn submit(message: impl Into<String>, offender: impl Into<String>) -> Self {
        Self::Submit {
            message: message.into(),
            offender: offender.into(),
        }
    }

    pub fn poll(message: impl Into<String>, offender: impl Into<String>) -> Self {
        Self::Poll {
            message: message.into(),
            offender: offender.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// True for errors that degrade to a logged warning rather than aborting
    /// the step (e.g. a failed pre-run cleanup delete).
    pub fn is_recoverable_warning(&self) -> bool {
        matches!(self, Self::Data { .. })
    }
}

impl From<serde_yaml::Error> for OrchestratorError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::validation(err.to_string(), "<yaml>")
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(err: std::io::Error) -> Self {
        Self::data(err.to_string(), "<io>")
    }
}
