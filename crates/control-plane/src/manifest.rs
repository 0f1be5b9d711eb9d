//! Startup manifest.
//!
//! A YAML document listing functions, tasks and the runs to submit once
//! the dispatcher is up:
//!
//! ```yaml
//! functions:
//!   - id: models
//!     name: warehouse models
//!     kind: dbt
//!     project: analytics
//!     spec:
//!       image: dbt:latest
//! tasks:
//!   - id: nightly
//!     function: models
//!     kind: transform
//!     project: analytics
//!     spec:
//!       command: run
//! runs:
//!   - task: nightly
//!     deadline_secs: 3600
//! ```

use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;

use runhub_core::{Function, RunOverrides, Spec, Task};

use crate::error::{AppError, AppResult};
use crate::services::Dispatcher;
use crate::store::MemoryEntityStore;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub functions: Vec<FunctionEntry>,

    #[serde(default)]
    pub tasks: Vec<TaskEntry>,

    #[serde(default)]
    pub runs: Vec<RunRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionEntry {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub kind: String,
    pub project: String,
    #[serde(default)]
    pub spec: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskEntry {
    pub id: String,
    pub function: String,
    pub kind: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub spec: Map<String, Value>,
}

/// A run to create from a task and submit.
#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    pub task: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub overrides: Map<String, Value>,
    #[serde(default)]
    pub deadline_secs: Option<u64>,
}

/// Outcome of submitting the manifest's runs.
#[derive(Debug, Default)]
pub struct SubmitSummary {
    pub submitted: Vec<String>,
    pub failed: Vec<(String, String)>,
}

fn spec_of(kind: String, fields: &Map<String, Value>) -> Spec {
    fields
        .iter()
        .fold(Spec::new(kind), |spec, (k, v)| spec.with(k.clone(), v.clone()))
}

impl FunctionEntry {
    fn to_function(&self) -> Function {
        Function {
            id: self.id.clone(),
            name: self.name.clone().unwrap_or_else(|| self.id.clone()),
            kind: self.kind.clone(),
            project: self.project.clone(),
            spec: spec_of(self.kind.clone(), &self.spec),
        }
    }
}

impl TaskEntry {
    fn to_task(&self, function: &FunctionEntry) -> Task {
        Task {
            id: self.id.clone(),
            function: self.function.clone(),
            kind: self.kind.clone(),
            project: self.project.clone().unwrap_or_else(|| function.project.clone()),
            spec: spec_of(format!("{}+{}", function.kind, self.kind), &self.spec),
        }
    }
}

/// Parse a manifest from YAML and check its references.
pub fn parse_manifest(content: &str) -> AppResult<Manifest> {
    let manifest: Manifest = serde_yaml::from_str(content)?;
    manifest.validate()?;
    Ok(manifest)
}

/// Read and parse a manifest file.
pub async fn load_manifest(path: impl AsRef<Path>) -> AppResult<Manifest> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AppError::Config(format!("cannot read manifest {}: {}", path.display(), e)))?;
    parse_manifest(&content)
}

impl Manifest {
    fn function(&self, id: &str) -> Option<&FunctionEntry> {
        self.functions.iter().find(|f| f.id == id)
    }

    fn validate(&self) -> AppResult<()> {
        for task in &self.tasks {
            if self.function(&task.function).is_none() {
                return Err(AppError::Parse(format!(
                    "task '{}' references unknown function '{}'",
                    task.id, task.function
                )));
            }
        }
        for run in &self.runs {
            if !self.tasks.iter().any(|t| t.id == run.task) {
                return Err(AppError::Parse(format!(
                    "run request references unknown task '{}'",
                    run.task
                )));
            }
        }
        Ok(())
    }

    /// Load the manifest's functions and tasks into `entities`.
    pub async fn seed(&self, entities: &MemoryEntityStore) {
        for entry in &self.functions {
            entities.insert_function(entry.to_function()).await;
        }
        for entry in &self.tasks {
            // References were checked at parse time.
            if let Some(function) = self.function(&entry.function) {
                entities.insert_task(entry.to_task(function)).await;
            }
        }

        tracing::info!(
            functions = self.functions.len(),
            tasks = self.tasks.len(),
            "Manifest entities loaded"
        );
    }

    /// Create and submit every run request. A failing request is logged
    /// and does not stop the others.
    pub async fn submit(&self, dispatcher: &Dispatcher) -> SubmitSummary {
        let mut summary = SubmitSummary::default();

        for request in &self.runs {
            let overrides = RunOverrides {
                id: request.id.clone(),
                overrides: request.overrides.clone(),
            };

            let result = async {
                let run = dispatcher.create_run_for_task(&request.task, &overrides).await?;
                let run_id = run.id.clone();
                match request.deadline_secs {
                    Some(secs) => {
                        dispatcher
                            .submit_with_deadline(run, Duration::from_secs(secs))
                            .await?
                    }
                    None => dispatcher.submit(run).await?,
                }
                Ok::<_, AppError>(run_id)
            }
            .await;

            match result {
                Ok(run_id) => summary.submitted.push(run_id),
                Err(e) => {
                    tracing::error!(task = %request.task, error = %e, "Manifest run not submitted");
                    summary.failed.push((request.task.clone(), e.to_string()));
                }
            }
        }

        summary
    }
}
