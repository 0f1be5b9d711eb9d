//! RunHub Core Library
//!
//! Plugin contracts and built-in plugins for run dispatch.
//!
//! This crate provides:
//! - Typed, schema-checked specs with merge policies
//! - Builder, runner and framework registries
//! - Runtime discovery from registered plugins
//! - The run lifecycle state table
//! - Built-in runtimes (dbt, mlrun, shell) and frameworks (k8sjob, local)

pub mod context;
pub mod error;
pub mod frameworks;
pub mod model;
pub mod registry;
pub mod runtime;
pub mod runtimes;
pub mod spec;
pub mod state;

use std::sync::Arc;

pub use context::{ExecutionContext, StatusReporter};
pub use error::{CoreError, CoreResult};
pub use model::{DispatchKey, Function, Run, RunOverrides, Runnable, RunnablePayload, Task};
pub use registry::{Builder, Framework, PluginCatalog, Registry, Runner};
pub use runtime::{Runtime, Runtimes};
pub use spec::{MergePolicy, Spec, SpecSchema};
pub use state::{RunEvent, RunState};

use frameworks::{K8sJobConfig, K8sJobFramework, LocalConfig, LocalFramework};

/// Catalog with every built-in runtime and framework registered.
pub fn builtin_catalog(k8s: K8sJobConfig, local: LocalConfig) -> CoreResult<PluginCatalog> {
    let mut catalog = PluginCatalog::new();
    runtimes::register_runtimes(&mut catalog)?;
    catalog.register_framework(Arc::new(K8sJobFramework::in_cluster(k8s)))?;
    catalog.register_framework(Arc::new(LocalFramework::new(local)))?;
    Ok(catalog)
}
