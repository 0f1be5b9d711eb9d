//! Run state machine.

use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;

use runhub_core::state::transition;
use runhub_core::{Run, RunEvent, RunState};

use crate::error::AppResult;
use crate::store::RunStore;

/// Lifecycle of one run.
///
/// Every accepted event is persisted before the in-memory state moves, so a
/// failed save leaves the machine where it was. Context payloads of accepted
/// events accumulate in [`RunStateMachine::context`].
pub struct RunStateMachine {
    run: Run,
    context: Map<String, Value>,
    store: Arc<dyn RunStore>,
}

impl RunStateMachine {
    pub fn new(run: Run, store: Arc<dyn RunStore>) -> Self {
        Self {
            run,
            context: Map::new(),
            store,
        }
    }

    pub fn run(&self) -> &Run {
        &self.run
    }

    pub fn state(&self) -> RunState {
        self.run.state
    }

    pub fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    /// Framework that received the run's runnable.
    pub fn framework(&self) -> Option<&str> {
        self.run.framework.as_deref()
    }

    /// Record the framework on the run. It is written with the next
    /// accepted event.
    pub fn bind_framework(&mut self, name: impl Into<String>) {
        self.run.framework = Some(name.into());
    }

    /// Apply `event`, persist the result and return the new state.
    ///
    /// Fails with `IllegalTransition` if the current state does not accept
    /// the event, or with the store's error if the save is rejected.
    pub async fn apply(&mut self, event: RunEvent, context: Map<String, Value>) -> AppResult<RunState> {
        let from = self.run.state;
        let next = transition(from, event)?;

        let mut updated = self.run.clone();
        updated.state = next;
        updated.updated_at = Utc::now();
        if matches!(next, RunState::Error | RunState::Stopped) {
            updated.message = detail(&context);
        }

        self.store.save(&updated).await?;

        tracing::info!(
            run_id = %updated.id,
            from = %from,
            event = %event,
            state = %next,
            "Run transitioned"
        );

        self.run = updated;
        self.context.extend(context);
        Ok(next)
    }
}

fn detail(context: &Map<String, Value>) -> Option<String> {
    ["error", "reason"]
        .iter()
        .find_map(|key| context.get(*key))
        .map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
}

impl std::fmt::Debug for RunStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunStateMachine")
            .field("run_id", &self.run.id)
            .field("state", &self.run.state)
            .field("framework", &self.run.framework)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::store::MemoryRunStore;
    use async_trait::async_trait;
    use runhub_core::{CoreError, Spec};

    fn run(id: &str) -> Run {
        let now = Utc::now();
        Run {
            id: id.to_string(),
            task_id: "t1".to_string(),
            project: "demo".to_string(),
            task: "dbt/transform".to_string(),
            spec: Spec::new("dbt+transform"),
            state: RunState::Created,
            message: None,
            framework: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn context(key: &str, value: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(key.to_string(), Value::String(value.to_string()));
        map
    }

    #[tokio::test]
    async fn test_happy_path_persists_every_step() {
        let store = Arc::new(MemoryRunStore::new());
        let mut machine = RunStateMachine::new(run("r1"), store.clone());

        assert_eq!(machine.apply(RunEvent::BuildOk, Map::new()).await.unwrap(), RunState::Ready);
        assert_eq!(store.load("r1").await.unwrap().unwrap().state, RunState::Ready);

        machine
            .apply(RunEvent::Dispatched, context("framework", "k8sjob"))
            .await
            .unwrap();
        machine.apply(RunEvent::SubstrateDone, Map::new()).await.unwrap();

        assert_eq!(machine.state(), RunState::Completed);
        assert_eq!(machine.context()["framework"], "k8sjob");
        assert_eq!(store.load("r1").await.unwrap().unwrap().state, RunState::Completed);
    }

    #[tokio::test]
    async fn test_created_rejects_dispatch() {
        let store = Arc::new(MemoryRunStore::new());
        let mut machine = RunStateMachine::new(run("r1"), store.clone());

        let err = machine.apply(RunEvent::Dispatched, Map::new()).await.unwrap_err();
        assert!(err.is_illegal_transition());
        assert_eq!(machine.state(), RunState::Created);
        assert!(store.load("r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failure_records_message() {
        let store = Arc::new(MemoryRunStore::new());
        let mut machine = RunStateMachine::new(run("r1"), store.clone());

        machine
            .apply(RunEvent::BuildFailed, context("error", "Missing field: command"))
            .await
            .unwrap();

        let saved = store.load("r1").await.unwrap().unwrap();
        assert_eq!(saved.state, RunState::Error);
        assert_eq!(saved.message.as_deref(), Some("Missing field: command"));

        for event in RunEvent::ALL {
            let err = machine.apply(event, Map::new()).await.unwrap_err();
            assert!(matches!(
                err,
                AppError::Core(CoreError::IllegalTransition { from: RunState::Error, .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_bound_framework_is_saved() {
        let store = Arc::new(MemoryRunStore::new());
        let mut machine = RunStateMachine::new(run("r1"), store.clone());

        machine.bind_framework("k8sjob");
        machine.apply(RunEvent::BuildOk, Map::new()).await.unwrap();

        let saved = store.load("r1").await.unwrap().unwrap();
        assert_eq!(saved.framework.as_deref(), Some("k8sjob"));

        let reopened = RunStateMachine::new(saved, store);
        assert_eq!(reopened.framework(), Some("k8sjob"));
    }

    struct FailingStore;

    #[async_trait]
    impl RunStore for FailingStore {
        async fn load(&self, _run_id: &str) -> AppResult<Option<Run>> {
            Ok(None)
        }

        async fn save(&self, _run: &Run) -> AppResult<()> {
            Err(AppError::Store("unavailable".to_string()))
        }

        async fn list_by_state(&self, _state: RunState) -> AppResult<Vec<Run>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_failed_save_keeps_state() {
        let mut machine = RunStateMachine::new(run("r1"), Arc::new(FailingStore));

        let err = machine.apply(RunEvent::BuildOk, Map::new()).await.unwrap_err();
        assert!(matches!(err, AppError::Store(_)));
        assert_eq!(machine.state(), RunState::Created);
    }
}
