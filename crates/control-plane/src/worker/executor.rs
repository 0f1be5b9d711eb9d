//! Execution of queued signals.

use serde_json::{Map, Value};
use std::sync::Arc;

use runhub_core::{ExecutionContext, PluginCatalog, RunEvent, StatusReporter};

use super::pool::{ExecutionSignal, Queued};
use crate::engine::{RunLifecycle, Ticket};

/// Hands runnables to their framework and records the outcome.
///
/// A successful `execute` is recorded as `DISPATCHED`; any failure as
/// `BUILD_FAILED` with the error text, which moves a ready run to `ERROR`.
pub struct SignalExecutor {
    lifecycle: Arc<RunLifecycle>,
    catalog: Arc<PluginCatalog>,
}

impl SignalExecutor {
    pub fn new(lifecycle: Arc<RunLifecycle>, catalog: Arc<PluginCatalog>) -> Self {
        Self { lifecycle, catalog }
    }

    /// Release a ticket whose signal will never run.
    pub async fn release(&self, ticket: Ticket) {
        self.lifecycle.skip(ticket).await;
    }

    pub(crate) async fn execute(&self, queued: Queued, worker_id: &str) {
        let Queued { signal, ticket } = queued;
        let ExecutionSignal { run_id, runnable } = signal;

        if ticket.lane().state().await.is_terminal() {
            tracing::debug!(run_id = %run_id, "Run already finished, dropping signal");
            self.release(ticket).await;
            return;
        }

        let name = runnable.framework.clone();
        let framework = match self.catalog.frameworks.lookup(&name) {
            Ok(framework) => framework,
            Err(e) => {
                tracing::error!(run_id = %run_id, framework = %name, error = %e, "No framework for runnable");
                self.lifecycle
                    .deliver(ticket, RunEvent::BuildFailed, failure(&name, &e))
                    .await;
                return;
            }
        };

        let reporter: Arc<dyn StatusReporter> = self.lifecycle.clone();
        let ctx = ExecutionContext::new(&run_id, reporter).with_worker_id(worker_id);

        tracing::debug!(run_id = %run_id, framework = %name, worker_id = %worker_id, "Executing runnable");

        match framework.execute(runnable, ctx).await {
            Ok(()) => {
                let mut context = Map::new();
                context.insert("framework".to_string(), Value::String(name));
                context.insert("worker_id".to_string(), Value::String(worker_id.to_string()));
                self.lifecycle
                    .deliver(ticket, RunEvent::Dispatched, context)
                    .await;
            }
            Err(e) => {
                tracing::error!(run_id = %run_id, framework = %name, error = %e, "Execution failed");
                self.lifecycle
                    .deliver(ticket, RunEvent::BuildFailed, failure(&name, &e))
                    .await;
            }
        }
    }
}

fn failure(framework: &str, error: &dyn std::fmt::Display) -> Map<String, Value> {
    let mut context = Map::new();
    context.insert("framework".to_string(), Value::String(framework.to_string()));
    context.insert("error".to_string(), Value::String(error.to_string()));
    context
}
