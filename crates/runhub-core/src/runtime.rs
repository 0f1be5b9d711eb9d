//! Runtimes: one ecosystem bound to its builders and runners.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::model::{DispatchKey, Function, Run, RunOverrides, Runnable, Task};
use crate::registry::{Builder, PluginCatalog, Runner};

/// Builders and runners of one runtime, keyed by task kind.
pub struct Runtime {
    name: String,
    builders: BTreeMap<String, Arc<dyn Builder>>,
    runners: BTreeMap<String, Arc<dyn Runner>>,
}

impl Runtime {
    /// Collect every builder and runner whose key carries this runtime.
    pub fn discover(name: &str, catalog: &PluginCatalog) -> Self {
        let builders = catalog
            .builders
            .iter()
            .filter(|(key, _)| key.runtime == name)
            .map(|(key, b)| (key.task.clone(), b.clone()))
            .collect();
        let runners = catalog
            .runners
            .iter()
            .filter(|(key, _)| key.runtime == name)
            .map(|(key, r)| (key.task.clone(), r.clone()))
            .collect();

        Self {
            name: name.to_string(),
            builders,
            runners,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Task kinds with a registered builder.
    pub fn task_kinds(&self) -> Vec<&str> {
        self.builders.keys().map(String::as_str).collect()
    }

    /// Build a run with the builder for `task.kind`.
    pub fn builder(&self, function: &Function, task: &Task, incoming: &RunOverrides) -> CoreResult<Run> {
        let builder = self.builders.get(&task.kind).ok_or_else(|| {
            CoreError::UnsupportedTask(DispatchKey::new(&self.name, &task.kind).to_string())
        })?;
        builder.build(function, task, incoming)
    }

    /// Produce a runnable with the runner for the run's task kind.
    pub fn runner(&self, run: &Run) -> CoreResult<Runnable> {
        let key = run.dispatch_key()?;
        let runner = self
            .runners
            .get(&key.task)
            .ok_or_else(|| CoreError::UnsupportedTask(key.to_string()))?;
        runner.produce(run)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("name", &self.name)
            .field("builders", &self.builders.keys().collect::<Vec<_>>())
            .field("runners", &self.runners.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// All runtimes known to the process, discovered once from the catalog.
#[derive(Debug, Default)]
pub struct Runtimes {
    runtimes: BTreeMap<String, Runtime>,
}

impl Runtimes {
    pub fn discover(catalog: &PluginCatalog) -> Self {
        let runtimes = catalog
            .runtime_names()
            .into_iter()
            .map(|name| {
                let runtime = Runtime::discover(&name, catalog);
                tracing::info!(runtime = %name, tasks = ?runtime.task_kinds(), "Runtime discovered");
                (name, runtime)
            })
            .collect();
        Self { runtimes }
    }

    /// Resolve a runtime by name.
    pub fn get(&self, name: &str) -> CoreResult<&Runtime> {
        self.runtimes
            .get(name)
            .ok_or_else(|| CoreError::UnsupportedTask(format!("no runtime '{}'", name)))
    }

    pub fn names(&self) -> Vec<&str> {
        self.runtimes.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtimes::register_runtimes;
    use crate::spec::Spec;
    use serde_json::json;

    fn catalog() -> PluginCatalog {
        let mut catalog = PluginCatalog::new();
        register_runtimes(&mut catalog).unwrap();
        catalog
    }

    #[test]
    fn test_discover_filters_by_runtime() {
        let catalog = catalog();
        let dbt = Runtime::discover("dbt", &catalog);
        assert_eq!(dbt.task_kinds(), vec!["transform"]);

        let runtimes = Runtimes::discover(&catalog);
        assert!(runtimes.get("dbt").is_ok());
        assert!(runtimes.get("mlrun").is_ok());
        assert!(matches!(
            runtimes.get("kfp"),
            Err(CoreError::UnsupportedTask(_))
        ));
    }

    #[test]
    fn test_unknown_task_kind() {
        let catalog = catalog();
        let dbt = Runtime::discover("dbt", &catalog);

        let function = Function {
            id: "f1".into(),
            name: "models".into(),
            kind: "dbt".into(),
            project: "demo".into(),
            spec: Spec::new("dbt").with("image", json!("dbt:latest")),
        };
        let task = Task {
            id: "t1".into(),
            function: "f1".into(),
            kind: "unknown".into(),
            project: "demo".into(),
            spec: Spec::new("dbt+unknown"),
        };

        let err = dbt.builder(&function, &task, &RunOverrides::default()).unwrap_err();
        assert_eq!(err.to_string(), "Unsupported task: dbt+unknown");
    }
}
