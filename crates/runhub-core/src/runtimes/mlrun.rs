//! MLRun runtime: `job` tasks run a handler in a container job.

use serde_json::Value;

use crate::error::CoreResult;
use crate::frameworks::K8S_JOB;
use crate::model::{DispatchKey, JobPayload, Run, Runnable, RunnablePayload};
use crate::registry::Runner;
use crate::spec::{FieldDef, FieldType, SpecSchema};

use super::builder::SpecBuilder;
use super::{resources, run_env};

pub const RUNTIME: &str = "mlrun";
pub const JOB: &str = "job";

pub const DEFAULT_IMAGE: &str = "mlrun/mlrun";

/// Run spec of `mlrun+job`.
pub const MLRUN_JOB_SCHEMA: SpecSchema = SpecSchema {
    kind: "mlrun+job",
    fields: &[
        FieldDef::required("function", FieldType::String),
        FieldDef::optional("image", FieldType::String),
        FieldDef::optional("command", FieldType::String),
        FieldDef::optional("handler", FieldType::String),
        FieldDef::optional("source", FieldType::String),
        FieldDef::optional("args", FieldType::StringList),
        FieldDef::optional("env", FieldType::StringMap),
        FieldDef::optional("parameters", FieldType::Object),
        FieldDef::optional("resources", FieldType::Object),
    ],
};

pub(super) fn builder() -> SpecBuilder {
    SpecBuilder::new(DispatchKey::new(RUNTIME, JOB), MLRUN_JOB_SCHEMA)
        .with_default("image", Value::String(DEFAULT_IMAGE.to_string()))
        .with_default("command", Value::String("python".to_string()))
}

/// Projects `mlrun+job` runs into `k8sjob` runnables.
///
/// The handler is passed as `-m <handler>`; parameters travel as JSON in
/// `MLRUN_PARAMETERS`.
pub struct MlrunJobRunner;

impl Runner for MlrunJobRunner {
    fn key(&self) -> DispatchKey {
        DispatchKey::new(RUNTIME, JOB)
    }

    fn produce(&self, run: &Run) -> CoreResult<Runnable> {
        let spec = &run.spec;
        let image = spec.require_str("image")?.to_string();
        let command = spec.require_str("command")?.to_string();
        let handler = spec.require_str("handler")?;

        let mut args = vec!["-m".to_string(), handler.to_string()];
        args.extend(spec.get_str_list("args"));

        let mut env = run_env(run);
        if let Some(parameters) = spec.get("parameters") {
            env.insert("MLRUN_PARAMETERS".to_string(), parameters.to_string());
        }
        if let Some(source) = spec.get_str("source") {
            env.insert("MLRUN_SOURCE".to_string(), source.to_string());
        }

        let payload = JobPayload {
            image,
            command,
            args,
            env,
            resources: resources(spec)?,
        };

        Ok(Runnable::for_run(run, K8S_JOB, RunnablePayload::Job(payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::model::{Function, RunOverrides, Task};
    use crate::registry::Builder;
    use crate::spec::Spec;
    use serde_json::json;

    #[test]
    fn test_defaults_and_handler() {
        let function = Function {
            id: "f9".into(),
            name: "trainer".into(),
            kind: "mlrun".into(),
            project: "ml".into(),
            spec: Spec::new("mlrun").with("handler", json!("train.main")),
        };
        let task = Task {
            id: "t9".into(),
            function: "f9".into(),
            kind: "job".into(),
            project: "ml".into(),
            spec: Spec::new("mlrun+job").with("parameters", json!({"epochs": 3})),
        };

        let run = builder()
            .build(&function, &task, &RunOverrides::default())
            .unwrap();
        let runnable = MlrunJobRunner.produce(&run).unwrap();
        let job = runnable.job().unwrap();

        assert_eq!(job.image, DEFAULT_IMAGE);
        assert_eq!(job.command, "python");
        assert_eq!(job.args, vec!["-m", "train.main"]);
        assert_eq!(job.env["MLRUN_PARAMETERS"], r#"{"epochs":3}"#);
    }

    #[test]
    fn test_missing_handler() {
        let function = Function {
            id: "f9".into(),
            name: "trainer".into(),
            kind: "mlrun".into(),
            project: "ml".into(),
            spec: Spec::new("mlrun"),
        };
        let task = Task {
            id: "t9".into(),
            function: "f9".into(),
            kind: "job".into(),
            project: "ml".into(),
            spec: Spec::new("mlrun+job"),
        };

        let run = builder()
            .build(&function, &task, &RunOverrides::default())
            .unwrap();
        let err = MlrunJobRunner.produce(&run).unwrap_err();
        assert!(matches!(err, CoreError::MissingField(field) if field == "handler"));
    }
}
