//! Shell runtime: `exec` tasks run as local processes.

use crate::error::CoreResult;
use crate::frameworks::LOCAL;
use crate::model::{DispatchKey, ProcessPayload, Run, Runnable, RunnablePayload};
use crate::registry::Runner;
use crate::spec::{FieldDef, FieldType, SpecSchema};

use super::builder::SpecBuilder;
use super::run_env;

pub const RUNTIME: &str = "shell";
pub const EXEC: &str = "exec";

/// Run spec of `shell+exec`.
pub const SHELL_EXEC_SCHEMA: SpecSchema = SpecSchema {
    kind: "shell+exec",
    fields: &[
        FieldDef::required("function", FieldType::String),
        FieldDef::optional("command", FieldType::String),
        FieldDef::optional("args", FieldType::StringList),
        FieldDef::optional("env", FieldType::StringMap),
        FieldDef::optional("cwd", FieldType::String),
    ],
};

pub(super) fn builder() -> SpecBuilder {
    SpecBuilder::new(DispatchKey::new(RUNTIME, EXEC), SHELL_EXEC_SCHEMA)
}

/// Projects `shell+exec` runs into `local` runnables.
pub struct ShellExecRunner;

impl Runner for ShellExecRunner {
    fn key(&self) -> DispatchKey {
        DispatchKey::new(RUNTIME, EXEC)
    }

    fn produce(&self, run: &Run) -> CoreResult<Runnable> {
        let spec = &run.spec;
        let payload = ProcessPayload {
            command: spec.require_str("command")?.to_string(),
            args: spec.get_str_list("args"),
            env: run_env(run),
            cwd: spec.get_str("cwd").map(str::to_string),
        };

        Ok(Runnable::for_run(run, LOCAL, RunnablePayload::Process(payload)))
    }
}
