// Copyright (c) 2025 GeneFlow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The definition store: parses, validates, and indexes app/workflow/job
//! documents loaded from a multi-document YAML file.

use crate::app::App;
use crate::dag::number_steps;
use crate::error::{OrchestratorError, Result};
use crate::job::Job;
use crate::workflow::Workflow;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Discriminates a loaded YAML document by its required `class` field. An
/// `app`/`job` document may itself batch several entities under an `apps`/
/// `jobs` key; `workflow` documents never batch.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "class", rename_all = "lowercase")]
enum Document {
    App(AppDocument),
    Workflow(Box<Workflow>),
    Job(JobDocument),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum AppDocument {
    Batch { apps: Vec<App> },
    Single(Box<App>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum JobDocument {
    Batch { jobs: Vec<Job> },
    Single(Box<Job>),
}

/// Holds every app, workflow, and job loaded so far, indexed by name.
///
/// Immutable once validated entities are added: `apps`/`workflows`/`jobs`
/// only ever grow via `add_*`, and loading a malformed document aborts the
/// whole file without partial mutation.
#[derive(Debug, Default)]
pub struct Definition {
    apps: HashMap<String, App>,
    workflows: HashMap<String, Workflow>,
    jobs: HashMap<String, Job>,
}

impl Definition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a multi-document YAML file. A document must carry a `class`
    /// discriminator (`app`, `workflow`, or `job`); `apps`/`jobs` documents
    /// may batch several entities, `workflow` documents never do. A failed
    /// document aborts the whole load with no partial mutation: documents
    /// are first fully parsed and validated into a staging buffer, and only
    /// committed to the store if every document in the file succeeds.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| OrchestratorError::data(e.to_string(), path.display().to_string()))?;
        self.load_str(&content)
    }

    /// Same as [`Definition::load`] but from an in-memory string (used by
    /// tests and callers that already have the document text).
    pub fn load_str(&mut self, content: &str) -> Result<()> {
        let mut staged_apps = Vec::new();
        let mut staged_workflows = Vec::new();
        let mut staged_jobs = Vec::new();

        for raw_doc in serde_yaml::Deserializer::from_str(content) {
            let doc = Document::deserialize(raw_doc)
                .map_err(|e| OrchestratorError::validation(e.to_string(), "<document>"))?;

            match doc {
                Document::App(AppDocument::Single(app)) => {
                    app.validate()?;
                    staged_apps.push(*app);
                }
                Document::App(AppDocument::Batch { apps }) => {
                    for app in apps {
                        app.validate()?;
                        staged_apps.push(app);
                    }
                }
                Document::Workflow(workflow) => {
                    let numbered = Self::validate_and_number(*workflow)?;
                    staged_workflows.push(numbered);
                }
                Document::Job(JobDocument::Single(job)) => {
                    job.validate()?;
                    staged_jobs.push(*job);
                }
                Document::Job(JobDocument::Batch { jobs }) => {
                    for job in jobs {
                        job.validate()?;
                        staged_jobs.push(job);
                    }
                }
            }
        }

        for app in staged_apps {
            self.add_app(app)?;
        }
        for workflow in staged_workflows {
            self.add_workflow(workflow)?;
        }
        for job in staged_jobs {
            self.add_job(job)?;
        }

        Ok(())
    }

    fn validate_and_number(mut workflow: Workflow) -> Result<Workflow> {
        workflow.validate()?;
        number_steps(&mut workflow)?;
        for (step_name, step) in workflow.steps.iter_mut() {
            step.name = step_name.clone();
        }
        Ok(workflow)
    }

    pub fn add_app(&mut self, app: App) -> Result<()> {
        app.validate()?;
        if self.apps.contains_key(&app.name) {
            return Err(OrchestratorError::validation(
                "duplicate app name",
                app.name.clone(),
            ));
        }
        self.apps.insert(app.name.clone(), app);
        Ok(())
    }

    pub fn add_workflow(&mut self, workflow: Workflow) -> Result<()> {
        let numbered = Self::validate_and_number(workflow)?;
        if self.workflows.contains_key(&numbered.name) {
            return Err(OrchestratorError::validation(
                "duplicate workflow name",
                numbered.name.clone(),
            ));
        }
        self.workflows.insert(numbered.name.clone(), numbered);
        Ok(())
    }

    pub fn add_job(&mut self, job: Job) -> Result<()> {
        job.validate()?;
        if self.jobs.contains_key(&job.name) {
            return Err(OrchestratorError::validation(
                "duplicate job name",
                job.name.clone(),
            ));
        }
        self.jobs.insert(job.name.clone(), job);
        Ok(())
    }

    pub fn apps(&self) -> &HashMap<String, App> {
        &self.apps
    }

    pub fn app(&self, name: &str) -> Result<&App> {
        self.apps
            .get(name)
            .ok_or_else(|| OrchestratorError::NotFound(format!("app not found: {name}")))
    }

    pub fn workflows(&self) -> &HashMap<String, Workflow> {
        &self.workflows
    }

    pub fn workflow(&self, name: &str) -> Result<&Workflow> {
        self.workflows
            .get(name)
            .ok_or_else(|| OrchestratorError::NotFound(format!("workflow not found: {name}")))
    }

    pub fn jobs(&self) -> &HashMap<String, Job> {
        &self.jobs
    }

    pub fn job(&self, name: &str) -> Result<&Job> {
        self.jobs
            .get(name)
            .ok_or_else(|| OrchestratorError::NotFound(format!("job not found: {name}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const APP_YAML: &str = r#"
class: app
gfVersion: v3.0
name: test-app
description: a test app
execution:
  pre: []
  methods:
    - name: auto
      commands:
        - type: shell
          run: echo hi
  post: []
"#;

    const WORKFLOW_YAML: &str = r#"
class: workflow
gfVersion: v3.0
name: test-workflow
description: a test workflow
git: ""
version: "1.0"
apps:
  app1:
    git: ""
    version: "1.0"
steps:
  stepA:
    app_name: app1
    depend: []
    template:
      output: "{{ output }}"
  stepB:
    app_name: app1
    depend: [stepA]
    template:
      output: "{{ output }}"
"#;

    #[test]
    fn loads_app_and_workflow() {
        let mut def = Definition::new();
        def.load_str(APP_YAML).unwrap();
        def.load_str(WORKFLOW_YAML).unwrap();

        assert!(def.app("test-app").is_ok());
        let wf = def.workflow("test-workflow").unwrap();
        assert_eq!(wf.steps["stepA"].number, 1);
        assert_eq!(wf.steps["stepB"].number, 2);
    }

    #[test]
    fn duplicate_app_name_is_rejected_without_mutation() {
        let mut def = Definition::new();
        def.load_str(APP_YAML).unwrap();
        let before = def.apps().len();
        let err = def.load_str(APP_YAML);
        assert!(err.is_err());
        assert_eq!(def.apps().len(), before);
    }

    #[test]
    fn batched_apps_container_loads_all() {
        let batched = r#"
class: app
apps:
  - gfVersion: v3.0
    name: app-one
    description: one
  - gfVersion: v3.0
    name: app-two
    description: two
"#;
        let mut def = Definition::new();
        def.load_str(batched).unwrap();
        assert_eq!(def.apps().len(), 2);
    }

    #[test]
    fn unknown_class_is_rejected() {
        let bad = "class: bogus\n";
        let mut def = Definition::new();
        assert!(def.load_str(bad).is_err());
    }

    #[test]
    fn partial_failure_aborts_whole_file() {
        // second document in the same file is invalid (dangling depend)
        let combined = format!(
            "{}\n---\nclass: workflow\ngfVersion: v3.0\nname: bad-wf\ndescription: d\nsteps:\n  a:\n    app_name: app1\n    depend: [missing]\n    template:\n      output: x\n",
            APP_YAML
        );
        let mut def = Definition::new();
        assert!(def.load_str(&combined).is_err());
        // the app document, though individually valid, was not committed
        assert!(def.app("test-app").is_err());
    }
}
