//! Execution workers.
//!
//! A bounded queue of execution signals feeds a fixed number of worker
//! tasks. Producers never wait: a full queue is reported back to them.

mod executor;
mod pool;

pub use executor::SignalExecutor;
pub use pool::{ExecutionSignal, PoolConfig, WorkerPool};
pub(crate) use pool::Queued;
