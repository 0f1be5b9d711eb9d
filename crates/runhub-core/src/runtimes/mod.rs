//! Built-in runtimes.
//!
//! - `dbt` - `transform` tasks as container jobs
//! - `mlrun` - `job` tasks as container jobs
//! - `shell` - `exec` tasks as local processes

mod builder;
mod dbt;
mod mlrun;
mod shell;

pub use self::builder::SpecBuilder;
pub use self::dbt::{DbtTransformRunner, DBT_TRANSFORM_SCHEMA};
pub use self::mlrun::{MlrunJobRunner, MLRUN_JOB_SCHEMA};
pub use self::shell::{ShellExecRunner, SHELL_EXEC_SCHEMA};

use std::collections::BTreeMap;

use crate::error::{CoreError, CoreResult};
use crate::model::{Resources, Run};
use crate::registry::PluginCatalog;
use crate::spec::Spec;

/// Register the builder and runner of every built-in runtime.
pub fn register_runtimes(catalog: &mut PluginCatalog) -> CoreResult<()> {
    catalog.register_builder(dbt::builder())?;
    catalog.register_runner(DbtTransformRunner)?;

    catalog.register_builder(mlrun::builder())?;
    catalog.register_runner(MlrunJobRunner)?;

    catalog.register_builder(shell::builder())?;
    catalog.register_runner(ShellExecRunner)?;

    Ok(())
}

/// Spec env plus the run identity variables every workload gets.
fn run_env(run: &Run) -> BTreeMap<String, String> {
    let mut env = run.spec.get_str_map("env");
    env.insert("RUNHUB_RUN_ID".to_string(), run.id.clone());
    env.insert("RUNHUB_PROJECT".to_string(), run.project.clone());
    env
}

fn resources(spec: &Spec) -> CoreResult<Resources> {
    match spec.get("resources") {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| CoreError::InvalidSpec(format!("resources: {}", e))),
        None => Ok(Resources::default()),
    }
}
