//! Run and entity persistence.
//!
//! The control plane only needs to load and save runs and to read the
//! functions and tasks runs are built from. Two run stores are provided:
//! an in-memory one for tests and development and a Postgres one.

mod memory;
mod postgres;

pub use memory::{MemoryEntityStore, MemoryRunStore};
pub use postgres::PgRunStore;

use async_trait::async_trait;
use runhub_core::{Function, Run, RunState, Task};

use crate::error::AppResult;

/// Persistence for runs.
///
/// A save after the run reached a terminal state must be the last write
/// for that run id: implementations reject any later save with
/// [`AppError::Store`](crate::error::AppError::Store).
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn load(&self, run_id: &str) -> AppResult<Option<Run>>;

    async fn save(&self, run: &Run) -> AppResult<()>;

    async fn list_by_state(&self, state: RunState) -> AppResult<Vec<Run>>;
}

/// Read-only access to functions and tasks.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn load_function(&self, id: &str) -> AppResult<Option<Function>>;

    async fn load_task(&self, id: &str) -> AppResult<Option<Task>>;
}
