//! Plugin contracts and registries.
//!
//! Builders, runners and frameworks are compiled in and registered once at
//! startup through [`PluginCatalog`]. Once the catalog is frozen into an
//! `Arc` nothing can register anymore, so lookups need no locking.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::error::{CoreError, CoreResult};
use crate::model::{DispatchKey, Function, Run, RunOverrides, Runnable, Task};

/// Turns a function, a task and caller overrides into a finalized run.
pub trait Builder: Send + Sync {
    /// Dispatch key this builder serves.
    fn key(&self) -> DispatchKey;

    fn build(&self, function: &Function, task: &Task, incoming: &RunOverrides) -> CoreResult<Run>;
}

/// Projects a run into an executable descriptor. Must be side-effect free.
pub trait Runner: Send + Sync {
    /// Dispatch key this runner serves.
    fn key(&self) -> DispatchKey;

    fn produce(&self, run: &Run) -> CoreResult<Runnable>;
}

/// Executes runnables on one substrate.
///
/// `execute` starts the work and returns without waiting for completion;
/// progress is reported through the context. Repeated calls for a run id
/// that was already submitted must not create new substrate work.
#[async_trait]
pub trait Framework: Send + Sync {
    /// Framework name matched against [`Runnable::framework`].
    fn name(&self) -> &'static str;

    async fn execute(&self, runnable: Runnable, ctx: ExecutionContext) -> CoreResult<()>;

    /// Ask the substrate to cancel the run. Best effort.
    async fn stop(&self, run_id: &str) -> CoreResult<()>;
}

/// Keyed map of plugin implementations with explicit failure on misses.
pub struct Registry<K, V> {
    name: &'static str,
    entries: BTreeMap<K, V>,
}

impl<K: Ord + Display + Clone, V: Clone> Registry<K, V> {
    /// Create an empty registry; `name` is used in error messages.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: BTreeMap::new(),
        }
    }

    /// Register a value. Fails with [`CoreError::DuplicateKey`] if taken.
    pub fn register(&mut self, key: K, value: V) -> CoreResult<()> {
        if self.entries.contains_key(&key) {
            return Err(CoreError::DuplicateKey(format!("{} '{}'", self.name, key)));
        }
        self.entries.insert(key, value);
        Ok(())
    }

    /// Look up a value. Fails with [`CoreError::NotFound`] if absent.
    pub fn lookup(&self, key: &K) -> CoreResult<V> {
        self.entries
            .get(key)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("{} '{}'", self.name, key)))
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> std::fmt::Debug for Registry<K, V>
where
    K: Display,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.name)
            .field(
                "keys",
                &self.entries.keys().map(|k| k.to_string()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

pub type BuilderRegistry = Registry<DispatchKey, Arc<dyn Builder>>;
pub type RunnerRegistry = Registry<DispatchKey, Arc<dyn Runner>>;
pub type FrameworkRegistry = Registry<String, Arc<dyn Framework>>;

/// The three registries, populated during bootstrap.
#[derive(Debug)]
pub struct PluginCatalog {
    pub builders: BuilderRegistry,
    pub runners: RunnerRegistry,
    pub frameworks: FrameworkRegistry,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self {
            builders: Registry::new("builder"),
            runners: Registry::new("runner"),
            frameworks: Registry::new("framework"),
        }
    }

    /// Register a builder under the key it declares.
    pub fn register_builder<B: Builder + 'static>(&mut self, builder: B) -> CoreResult<()> {
        let key = builder.key();
        tracing::debug!(key = %key, "Registering builder");
        self.builders.register(key, Arc::new(builder))
    }

    /// Register a runner under the key it declares.
    pub fn register_runner<R: Runner + 'static>(&mut self, runner: R) -> CoreResult<()> {
        let key = runner.key();
        tracing::debug!(key = %key, "Registering runner");
        self.runners.register(key, Arc::new(runner))
    }

    /// Register a framework under its name.
    pub fn register_framework(&mut self, framework: Arc<dyn Framework>) -> CoreResult<()> {
        let name = framework.name().to_string();
        tracing::debug!(framework = %name, "Registering framework");
        self.frameworks.register(name, framework)
    }

    /// Runtime names that have at least one builder.
    pub fn runtime_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.builders.keys().map(|k| k.runtime.clone()).collect();
        names.dedup();
        names
    }
}

impl Default for PluginCatalog {
    fn default() -> Self {
        Self::new()
    }
}
