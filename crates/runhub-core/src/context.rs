//! Execution context handed to frameworks.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::state::RunEvent;

/// Side channel through which frameworks report substrate progress.
///
/// Implementations feed the run's state machine. Reporting never fails from
/// the framework's point of view: rejected events are the receiver's concern.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(&self, run_id: &str, event: RunEvent, context: Map<String, Value>);
}

/// Context passed to [`Framework::execute`](crate::registry::Framework::execute).
#[derive(Clone)]
pub struct ExecutionContext {
    /// Run being executed.
    pub run_id: String,

    /// Worker that picked up the execution signal.
    pub worker_id: Option<String>,

    reporter: Arc<dyn StatusReporter>,
}

impl ExecutionContext {
    pub fn new(run_id: impl Into<String>, reporter: Arc<dyn StatusReporter>) -> Self {
        Self {
            run_id: run_id.into(),
            worker_id: None,
            reporter,
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    /// Shared handle to the reporter, for watchers that outlive `execute`.
    pub fn reporter(&self) -> Arc<dyn StatusReporter> {
        self.reporter.clone()
    }

    /// Report successful substrate completion.
    pub async fn succeeded(&self, detail: Map<String, Value>) {
        self.reporter
            .report(&self.run_id, RunEvent::SubstrateDone, detail)
            .await;
    }

    /// Report substrate failure with a message.
    pub async fn failed(&self, message: impl Into<String>) {
        let mut detail = Map::new();
        detail.insert("error".to_string(), Value::String(message.into()));
        self.reporter
            .report(&self.run_id, RunEvent::SubstrateFailed, detail)
            .await;
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("run_id", &self.run_id)
            .field("worker_id", &self.worker_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(String, RunEvent, Map<String, Value>)>>,
    }

    #[async_trait]
    impl StatusReporter for Recorder {
        async fn report(&self, run_id: &str, event: RunEvent, context: Map<String, Value>) {
            self.events
                .lock()
                .await
                .push((run_id.to_string(), event, context));
        }
    }

    #[tokio::test]
    async fn test_context_reports() {
        let recorder = Arc::new(Recorder::default());
        let ctx = ExecutionContext::new("run-1", recorder.clone()).with_worker_id("worker-0");
        assert_eq!(ctx.worker_id.as_deref(), Some("worker-0"));

        ctx.failed("exit code 2").await;
        ctx.succeeded(Map::new()).await;

        let events = recorder.events.lock().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].1, RunEvent::SubstrateFailed);
        assert_eq!(events[0].2["error"], "exit code 2");
        assert_eq!(events[1].1, RunEvent::SubstrateDone);
    }
}
