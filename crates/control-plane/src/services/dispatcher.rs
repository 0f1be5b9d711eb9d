//! Run dispatcher.
//!
//! Builds runs from functions and tasks, projects them into runnables and
//! hands them to the worker pool. Submission returns as soon as the signal
//! is queued; substrate progress flows back through the lifecycle hub.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use runhub_core::{
    CoreError, Function, PluginCatalog, Run, RunEvent, RunOverrides, RunState, Runtimes, Task,
};

use crate::config::AppConfig;
use crate::engine::RunLifecycle;
use crate::error::{AppError, AppResult};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::result_ext::ResultExt;
use crate::store::{EntityStore, RunStore};
use crate::worker::{ExecutionSignal, PoolConfig, Queued, SignalExecutor, WorkerPool};

/// Dispatcher settings.
#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    pub pool: PoolConfig,

    /// Deadline armed for submissions that bring none.
    pub default_deadline: Option<Duration>,
}

impl From<&AppConfig> for DispatcherConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            pool: PoolConfig {
                worker_count: config.worker_count,
                queue_capacity: config.queue_capacity,
            },
            default_deadline: config.default_deadline(),
        }
    }
}

/// Entry point for run creation, submission and cancellation.
pub struct Dispatcher {
    catalog: Arc<PluginCatalog>,
    runtimes: Runtimes,
    lifecycle: Arc<RunLifecycle>,
    entities: Arc<dyn EntityStore>,
    pool: WorkerPool,
    default_deadline: Option<Duration>,
    deadlines: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Dispatcher {
    /// Freeze the catalog, discover runtimes and start the worker pool.
    /// Must be called inside a tokio runtime.
    pub fn new(
        catalog: PluginCatalog,
        store: Arc<dyn RunStore>,
        entities: Arc<dyn EntityStore>,
        config: DispatcherConfig,
    ) -> AppResult<Self> {
        let catalog = Arc::new(catalog);
        let runtimes = Runtimes::discover(&catalog);
        let metrics = Arc::new(Metrics::new()?);
        let lifecycle = Arc::new(RunLifecycle::new(store, catalog.clone(), metrics));
        let executor = Arc::new(SignalExecutor::new(lifecycle.clone(), catalog.clone()));
        let pool = WorkerPool::start(&config.pool, executor);

        Ok(Self {
            catalog,
            runtimes,
            lifecycle,
            entities,
            pool,
            default_deadline: config.default_deadline,
            deadlines: Mutex::new(HashMap::new()),
        })
    }

    pub fn runtimes(&self) -> &Runtimes {
        &self.runtimes
    }

    pub fn lifecycle(&self) -> &Arc<RunLifecycle> {
        &self.lifecycle
    }

    /// Build a run for `task` with the builder of the function's runtime.
    ///
    /// Pure: nothing is persisted until the run is submitted.
    pub fn create_run(&self, function: &Function, task: &Task, overrides: &RunOverrides) -> AppResult<Run> {
        let runtime = self.runtimes.get(&function.kind)?;
        let run = runtime.builder(function, task, overrides)?;

        tracing::info!(
            run_id = %run.id,
            runtime = %runtime.name(),
            task = %run.task,
            "Run created"
        );
        Ok(run)
    }

    /// Resolve a task and its function from the entity store, then build.
    pub async fn create_run_for_task(&self, task_id: &str, overrides: &RunOverrides) -> AppResult<Run> {
        let task = self
            .entities
            .load_task(task_id)
            .await?
            .ok_or_else(|| AppError::EntityNotFound(format!("task '{}'", task_id)))?;
        let function = self
            .entities
            .load_function(&task.function)
            .await?
            .ok_or_else(|| AppError::EntityNotFound(format!("function '{}'", task.function)))?;

        self.create_run(&function, &task, overrides)
    }

    /// Submit a run for execution. Arms the default deadline, if any.
    pub async fn submit(&self, run: Run) -> AppResult<()> {
        self.dispatch(run, self.default_deadline).await
    }

    /// Submit a run that is stopped if still running after `deadline`.
    pub async fn submit_with_deadline(&self, run: Run, deadline: Duration) -> AppResult<()> {
        self.dispatch(run, Some(deadline)).await
    }

    async fn dispatch(&self, run: Run, deadline: Option<Duration>) -> AppResult<()> {
        self.lifecycle.metrics().record_submitted();

        let key = run.dispatch_key()?;
        let runtime = self.runtimes.get(&key.runtime)?;

        let runnable = match runtime.runner(&run) {
            Ok(runnable) => runnable,
            Err(e) if e.is_configuration() => return Err(e.into()),
            Err(e) => {
                tracing::warn!(run_id = %run.id, key = %key, error = %e, "Run rejected by runner");
                let lane = self.lifecycle.open(&run).await?;
                let ticket = lane.reserve().await;
                self.lifecycle
                    .deliver(ticket, RunEvent::BuildFailed, error_context(&e))
                    .await;
                return Err(e.into());
            }
        };

        if !self.catalog.frameworks.contains(&runnable.framework) {
            return Err(CoreError::UnsupportedTask(format!(
                "no framework '{}'",
                runnable.framework
            ))
            .into());
        }

        let lane = self.lifecycle.open(&run).await?;
        let state = lane.state().await;
        if state.is_terminal() {
            tracing::info!(run_id = %run.id, state = %state, "Run already finished, submission ignored");
            return Ok(());
        }
        if state == RunState::Running {
            tracing::debug!(run_id = %run.id, "Run already running, submission ignored");
            self.arm_deadline(&run.id, deadline);
            return Ok(());
        }
        lane.bind_framework(&runnable.framework).await;

        if let Some(ticket) = lane.claim(RunState::Created).await {
            let seq = ticket.seq();
            let delivery = self
                .lifecycle
                .deliver(ticket, RunEvent::BuildOk, Map::new())
                .await;
            if let Some(Err(e)) = delivery.into_result(seq) {
                return Err(e);
            }
        }

        let Some(ticket) = lane.claim(RunState::Ready).await else {
            tracing::debug!(run_id = %run.id, "Run already being dispatched, submission ignored");
            self.arm_deadline(&run.id, deadline);
            return Ok(());
        };

        let framework = runnable.framework.clone();
        let queued = Queued {
            signal: ExecutionSignal {
                run_id: run.id.clone(),
                runnable,
            },
            ticket,
        };

        if let Err(e) = self.pool.enqueue(queued).await {
            if matches!(e, AppError::QueueFull(_)) {
                self.lifecycle.metrics().record_queue_rejection();
            }
            tracing::warn!(run_id = %run.id, error = %e, "Execution signal not queued");
            return Err(e);
        }

        tracing::info!(run_id = %run.id, framework = %framework, "Run submitted");

        self.arm_deadline(&run.id, deadline);
        Ok(())
    }

    /// Start the deadline timer of a run. A timer already pending for the
    /// run keeps running; resubmission never pushes a deadline back.
    fn arm_deadline(&self, run_id: &str, deadline: Option<Duration>) {
        let Some(deadline) = deadline else {
            return;
        };
        let Ok(mut deadlines) = self.deadlines.lock() else {
            tracing::error!(run_id = %run_id, "Deadline registry unavailable, deadline not armed");
            return;
        };

        deadlines.retain(|_, handle| !handle.is_finished());
        if deadlines.contains_key(run_id) {
            tracing::debug!(run_id = %run_id, "Deadline already armed");
            return;
        }

        let lifecycle = self.lifecycle.clone();
        let id = run_id.to_string();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;

            match lifecycle.state(&id).await {
                Ok(state) if !state.is_terminal() => {}
                _ => return,
            }

            tracing::warn!(run_id = %id, deadline_ms = deadline.as_millis() as u64, "Deadline exceeded, stopping run");
            let mut context = Map::new();
            context.insert(
                "reason".to_string(),
                Value::String(format!("deadline of {:?} exceeded", deadline)),
            );
            let _ = lifecycle
                .fire(&id, RunEvent::StopRequested, context)
                .await
                .log("stopping run at deadline");
        });

        deadlines.insert(run_id.to_string(), handle);
    }

    /// Request cancellation of a running run.
    ///
    /// The run moves to `STOPPED` as soon as the request is accepted; the
    /// framework is asked to cancel in the background. Returns the state
    /// after the request. A request the current state does not accept is
    /// logged and counted, and the unchanged state is returned. If an
    /// earlier event of the run is still in flight the request waits
    /// behind it.
    pub async fn stop(&self, run_id: &str, reason: &str) -> AppResult<RunState> {
        let lane = self.lifecycle.hub().attach(run_id).await?;
        let ticket = lane.reserve().await;
        let seq = ticket.seq();

        let mut context = Map::new();
        context.insert("reason".to_string(), Value::String(reason.to_string()));

        let delivery = self
            .lifecycle
            .deliver(ticket, RunEvent::StopRequested, context)
            .await;

        match delivery.into_result(seq) {
            Some(Ok(state)) => Ok(state),
            Some(Err(e)) if !e.is_illegal_transition() => Err(e),
            _ => Ok(lane.state().await),
        }
    }

    /// Current state of a run.
    pub async fn state(&self, run_id: &str) -> AppResult<RunState> {
        self.lifecycle.state(run_id).await
    }

    /// Current copy of a run.
    pub async fn run(&self, run_id: &str) -> AppResult<Run> {
        Ok(self.lifecycle.hub().attach(run_id).await?.snapshot().await)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.lifecycle.metrics().snapshot()
    }

    /// Dispatch metrics in the Prometheus text format.
    pub fn gather_metrics(&self) -> AppResult<String> {
        Ok(self.lifecycle.metrics().gather()?)
    }

    /// Signals waiting for a worker.
    pub fn queued(&self) -> usize {
        self.pool.queued()
    }

    /// Stop accepting submissions, drain queued signals and cancel pending
    /// deadlines.
    pub async fn shutdown(&self) {
        tracing::info!(queued = self.pool.queued(), "Dispatcher shutting down");
        self.pool.shutdown().await;

        if let Ok(mut deadlines) = self.deadlines.lock() {
            for (_, handle) in deadlines.drain() {
                handle.abort();
            }
        }
    }
}

fn error_context(error: &CoreError) -> Map<String, Value> {
    let mut context = Map::new();
    context.insert("error".to_string(), Value::String(error.to_string()));
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryEntityStore, MemoryRunStore};
    use runhub_core::runtimes::register_runtimes;
    use runhub_core::Spec;
    use serde_json::json;

    fn dispatcher(store: Arc<MemoryRunStore>, entities: Arc<MemoryEntityStore>) -> Dispatcher {
        let mut catalog = PluginCatalog::new();
        register_runtimes(&mut catalog).unwrap();
        Dispatcher::new(catalog, store, entities, DispatcherConfig::default()).unwrap()
    }

    fn function() -> Function {
        Function {
            id: "f1".into(),
            name: "models".into(),
            kind: "dbt".into(),
            project: "demo".into(),
            spec: Spec::new("dbt").with("image", json!("dbt:latest")),
        }
    }

    fn task(kind: &str) -> Task {
        Task {
            id: "t1".into(),
            function: "f1".into(),
            kind: kind.into(),
            project: "demo".into(),
            spec: Spec::new("dbt+transform").with("command", json!("run")),
        }
    }

    #[tokio::test]
    async fn test_create_run_for_task() {
        let entities = Arc::new(MemoryEntityStore::new());
        entities.insert_function(function()).await;
        entities.insert_task(task("transform")).await;
        let dispatcher = dispatcher(Arc::new(MemoryRunStore::new()), entities);

        let run = dispatcher
            .create_run_for_task("t1", &RunOverrides::with_id("r1"))
            .await
            .unwrap();
        assert_eq!(run.id, "r1");
        assert_eq!(run.spec.get_str("command"), Some("run"));

        let err = dispatcher
            .create_run_for_task("t2", &RunOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EntityNotFound(_)));
    }

    #[tokio::test]
    async fn test_unknown_runtime() {
        let dispatcher = dispatcher(
            Arc::new(MemoryRunStore::new()),
            Arc::new(MemoryEntityStore::new()),
        );
        let mut function = function();
        function.kind = "kfp".into();

        let err = dispatcher
            .create_run(&function, &task("transform"), &RunOverrides::default())
            .unwrap_err();
        assert!(matches!(err.core(), Some(CoreError::UnsupportedTask(_))));
    }

    #[tokio::test]
    async fn test_missing_framework_is_configuration_error() {
        let store = Arc::new(MemoryRunStore::new());
        let dispatcher = dispatcher(store.clone(), Arc::new(MemoryEntityStore::new()));

        let run = dispatcher
            .create_run(&function(), &task("transform"), &RunOverrides::with_id("r1"))
            .unwrap();
        let err = dispatcher.submit(run).await.unwrap_err();

        assert!(matches!(err.core(), Some(CoreError::UnsupportedTask(msg)) if msg.contains("k8sjob")));
        assert!(store.load("r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_gather_metrics_reports_submissions() {
        let dispatcher = dispatcher(
            Arc::new(MemoryRunStore::new()),
            Arc::new(MemoryEntityStore::new()),
        );
        let run = dispatcher
            .create_run(&function(), &task("transform"), &RunOverrides::with_id("r1"))
            .unwrap();
        let _ = dispatcher.submit(run).await;

        let text = dispatcher.gather_metrics().unwrap();
        assert!(text.contains("runhub_runs_submitted_total 1"));
        assert_eq!(dispatcher.metrics().submitted, 1);
    }

    #[tokio::test]
    async fn test_stop_unknown_run() {
        let dispatcher = dispatcher(
            Arc::new(MemoryRunStore::new()),
            Arc::new(MemoryEntityStore::new()),
        );
        let err = dispatcher.stop("missing", "test").await.unwrap_err();
        assert!(matches!(err, AppError::RunNotFound(_)));
    }
}
