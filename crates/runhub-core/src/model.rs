//! Functions, tasks, runs and runnables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{CoreError, CoreResult};
use crate::spec::Spec;
use crate::state::RunState;

/// Composite key selecting a builder or runner: `runtime+task`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DispatchKey {
    pub runtime: String,
    pub task: String,
}

impl DispatchKey {
    pub fn new(runtime: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
            task: task.into(),
        }
    }

    /// Descriptor stored on a run: `runtime/task`.
    pub fn descriptor(&self) -> String {
        format!("{}/{}", self.runtime, self.task)
    }

    /// Parse a run descriptor (`runtime/task`).
    pub fn from_descriptor(descriptor: &str) -> CoreResult<Self> {
        match descriptor.split_once('/') {
            Some((runtime, task)) if !runtime.is_empty() && !task.is_empty() => {
                Ok(Self::new(runtime, task))
            }
            _ => Err(CoreError::InvalidSpec(format!(
                "malformed task descriptor '{}'",
                descriptor
            ))),
        }
    }
}

impl std::fmt::Display for DispatchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}+{}", self.runtime, self.task)
    }
}

/// A function: what to execute. `kind` names the owning runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub project: String,
    #[serde(default)]
    pub spec: Spec,
}

/// A task: how to execute a function. `kind` is the task type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub function: String,
    pub kind: String,
    pub project: String,
    #[serde(default)]
    pub spec: Spec,
}

/// Caller-supplied run id and spec overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub overrides: Map<String, Value>,
}

impl RunOverrides {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            overrides: Map::new(),
        }
    }

    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.overrides.insert(key.into(), value);
        self
    }
}

/// One execution attempt of a function under a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub task_id: String,
    pub project: String,
    /// Runtime and task kind, as `runtime/kind`.
    pub task: String,
    pub spec: Spec,
    pub state: RunState,
    /// Detail recorded by the transition into a failure or stop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Framework the run was handed to, once dispatch bound one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    /// Dispatch key derived from the task descriptor.
    pub fn dispatch_key(&self) -> CoreResult<DispatchKey> {
        DispatchKey::from_descriptor(&self.task)
    }
}

/// Resource requests and limits for a job container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
    #[serde(default)]
    pub limits: BTreeMap<String, String>,
}

impl Resources {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.limits.is_empty()
    }
}

/// Container job payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub image: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub resources: Resources,
}

/// Local process payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessPayload {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

/// Substrate-specific part of a runnable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RunnablePayload {
    Job(JobPayload),
    Process(ProcessPayload),
}

/// Executable descriptor projected from exactly one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Runnable {
    /// Same as the run id.
    pub id: String,
    pub project: String,
    /// Framework that owns this runnable.
    pub framework: String,
    /// Run state at projection time.
    pub state: RunState,
    pub payload: RunnablePayload,
}

impl Runnable {
    /// Create a runnable for `run`, copying its id, project and state.
    pub fn for_run(run: &Run, framework: impl Into<String>, payload: RunnablePayload) -> Self {
        Self {
            id: run.id.clone(),
            project: run.project.clone(),
            framework: framework.into(),
            state: run.state,
            payload,
        }
    }

    pub fn job(&self) -> Option<&JobPayload> {
        match &self.payload {
            RunnablePayload::Job(job) => Some(job),
            _ => None,
        }
    }

    pub fn process(&self) -> Option<&ProcessPayload> {
        match &self.payload {
            RunnablePayload::Process(process) => Some(process),
            _ => None,
        }
    }
}
