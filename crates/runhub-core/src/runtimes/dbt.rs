//! dbt runtime: `transform` tasks run as container jobs.

use crate::error::CoreResult;
use crate::frameworks::K8S_JOB;
use crate::model::{DispatchKey, JobPayload, Run, Runnable, RunnablePayload};
use crate::registry::Runner;
use crate::spec::{FieldDef, FieldType, SpecSchema};

use super::builder::SpecBuilder;
use super::{resources, run_env};

pub const RUNTIME: &str = "dbt";
pub const TRANSFORM: &str = "transform";

/// Run spec of `dbt+transform`.
pub const DBT_TRANSFORM_SCHEMA: SpecSchema = SpecSchema {
    kind: "dbt+transform",
    fields: &[
        FieldDef::required("function", FieldType::String),
        FieldDef::optional("image", FieldType::String),
        FieldDef::optional("command", FieldType::String),
        FieldDef::optional("args", FieldType::StringList),
        FieldDef::optional("env", FieldType::StringMap),
        FieldDef::optional("resources", FieldType::Object),
        FieldDef::optional("profiles_dir", FieldType::String),
    ],
};

pub(super) fn builder() -> SpecBuilder {
    SpecBuilder::new(DispatchKey::new(RUNTIME, TRANSFORM), DBT_TRANSFORM_SCHEMA)
}

/// Projects `dbt+transform` runs into `k8sjob` runnables.
pub struct DbtTransformRunner;

impl Runner for DbtTransformRunner {
    fn key(&self) -> DispatchKey {
        DispatchKey::new(RUNTIME, TRANSFORM)
    }

    fn produce(&self, run: &Run) -> CoreResult<Runnable> {
        let spec = &run.spec;
        let image = spec.require_str("image")?.to_string();
        let command = spec.require_str("command")?.to_string();

        let mut env = run_env(run);
        if let Some(dir) = spec.get_str("profiles_dir") {
            env.insert("DBT_PROFILES_DIR".to_string(), dir.to_string());
        }

        let payload = JobPayload {
            image,
            command,
            args: spec.get_str_list("args"),
            env,
            resources: resources(spec)?,
        };

        Ok(Runnable::for_run(run, K8S_JOB, RunnablePayload::Job(payload)))
    }
}
