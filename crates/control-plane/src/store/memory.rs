//! In-memory stores.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use runhub_core::{Function, Run, RunState, Task};

use super::{EntityStore, RunStore};
use crate::error::{AppError, AppResult};

/// Run store backed by a map.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: RwLock<HashMap<String, Run>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.runs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.runs.read().await.is_empty()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn load(&self, run_id: &str) -> AppResult<Option<Run>> {
        Ok(self.runs.read().await.get(run_id).cloned())
    }

    async fn save(&self, run: &Run) -> AppResult<()> {
        let mut runs = self.runs.write().await;
        if let Some(existing) = runs.get(&run.id) {
            if existing.state.is_terminal() {
                return Err(AppError::Store(format!(
                    "run '{}' is already {}",
                    run.id, existing.state
                )));
            }
        }
        runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn list_by_state(&self, state: RunState) -> AppResult<Vec<Run>> {
        let mut runs: Vec<Run> = self
            .runs
            .read()
            .await
            .values()
            .filter(|run| run.state == state)
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(runs)
    }
}

/// Function and task store backed by maps.
#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    functions: RwLock<HashMap<String, Function>>,
    tasks: RwLock<HashMap<String, Task>>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_function(&self, function: Function) {
        self.functions
            .write()
            .await
            .insert(function.id.clone(), function);
    }

    pub async fn insert_task(&self, task: Task) {
        self.tasks.write().await.insert(task.id.clone(), task);
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn load_function(&self, id: &str) -> AppResult<Option<Function>> {
        Ok(self.functions.read().await.get(id).cloned())
    }

    async fn load_task(&self, id: &str) -> AppResult<Option<Task>> {
        Ok(self.tasks.read().await.get(id).cloned())
    }
}
