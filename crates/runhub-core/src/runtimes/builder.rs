//! Schema-driven run builder shared by the built-in runtimes.

use chrono::Utc;
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};
use crate::model::{DispatchKey, Function, Run, RunOverrides, Task};
use crate::registry::Builder;
use crate::spec::{apply_overrides, merge, MergePolicy, Spec, SpecSchema};
use crate::state::RunState;

/// Builds runs by merging function, task and caller specs, then validating
/// the result against the run schema of its dispatch key.
pub struct SpecBuilder {
    key: DispatchKey,
    schema: SpecSchema,
    defaults: Map<String, Value>,
}

impl SpecBuilder {
    pub fn new(key: DispatchKey, schema: SpecSchema) -> Self {
        Self {
            key,
            schema,
            defaults: Map::new(),
        }
    }

    /// Runtime default, applied only where no spec layer set the key.
    pub fn with_default(mut self, key: impl Into<String>, value: Value) -> Self {
        self.defaults.insert(key.into(), value);
        self
    }

    fn defaults_spec(&self) -> Spec {
        self.defaults
            .iter()
            .fold(Spec::new(self.schema.kind), |spec, (k, v)| spec.with(k.clone(), v.clone()))
    }
}

impl Builder for SpecBuilder {
    fn key(&self) -> DispatchKey {
        self.key.clone()
    }

    fn build(&self, function: &Function, task: &Task, incoming: &RunOverrides) -> CoreResult<Run> {
        if function.kind != self.key.runtime {
            return Err(CoreError::InvalidSpec(format!(
                "function '{}' belongs to runtime '{}', not '{}'",
                function.id, function.kind, self.key.runtime
            )));
        }

        // The task's function reference is part of its spec.
        let mut task_spec = task.spec.clone();
        if !task.function.is_empty() {
            let reference = Spec::new("").with("function", Value::String(task.function.clone()));
            task_spec = merge(&task_spec, &reference, MergePolicy::KeepBase);
        }

        let task_merged = merge(&function.spec, &task_spec, MergePolicy::OverrideWins);
        let overridden = apply_overrides(&task_merged, &incoming.overrides);
        let with_defaults = merge(&overridden, &self.defaults_spec(), MergePolicy::KeepBase);

        let spec = Spec::configure(&self.schema, &with_defaults.to_map())?;

        let now = Utc::now();
        let run = Run {
            id: incoming
                .id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            task_id: task.id.clone(),
            project: task.project.clone(),
            task: self.key.descriptor(),
            spec,
            state: RunState::Created,
            message: None,
            framework: None,
            created_at: now,
            updated_at: now,
        };

        tracing::debug!(
            run_id = %run.id,
            key = %self.key,
            fields = run.spec.to_map().len(),
            "Run built"
        );

        Ok(run)
    }
}
