//! Bounded worker pool.

use serde::Serialize;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use runhub_core::Runnable;

use super::executor::SignalExecutor;
use crate::engine::Ticket;
use crate::error::{AppError, AppResult};
use crate::result_ext::ResultExt;

/// Request to execute one runnable.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSignal {
    pub run_id: String,
    pub runnable: Runnable,
}

/// Signal plus the lane position its outcome is delivered at.
pub(crate) struct Queued {
    pub signal: ExecutionSignal,
    pub ticket: Ticket,
}

/// Worker pool sizing.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker tasks.
    pub worker_count: usize,

    /// Signals that may wait in the queue.
    pub queue_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 256,
        }
    }
}

/// Fixed set of workers consuming one bounded queue.
pub struct WorkerPool {
    sender: RwLock<Option<mpsc::Sender<Queued>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    executor: Arc<SignalExecutor>,
    capacity: usize,
}

impl WorkerPool {
    /// Spawn the workers. Must be called inside a tokio runtime.
    pub fn start(config: &PoolConfig, executor: Arc<SignalExecutor>) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..config.worker_count.max(1))
            .map(|index| {
                let worker_id = format!("worker-{}", index);
                tokio::spawn(work(worker_id, receiver.clone(), executor.clone()))
            })
            .collect::<Vec<_>>();

        tracing::info!(
            workers = workers.len(),
            queue_capacity = capacity,
            "Worker pool started"
        );

        Self {
            sender: RwLock::new(Some(sender)),
            workers: Mutex::new(workers),
            executor,
            capacity,
        }
    }

    /// Queue a signal without waiting.
    ///
    /// Fails with [`AppError::QueueFull`] when the queue is at capacity and
    /// [`AppError::ShuttingDown`] after [`WorkerPool::shutdown`]. On failure
    /// the ticket is released so later events of the run are not held up.
    pub(crate) async fn enqueue(&self, queued: Queued) -> AppResult<()> {
        let result = match self.sender.read() {
            Ok(guard) => match guard.as_ref() {
                Some(sender) => sender.try_send(queued),
                None => Err(TrySendError::Closed(queued)),
            },
            Err(_) => Err(TrySendError::Closed(queued)),
        };

        match result {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(returned)) => {
                self.executor.release(returned.ticket).await;
                Err(AppError::QueueFull(self.capacity))
            }
            Err(TrySendError::Closed(returned)) => {
                self.executor.release(returned.ticket).await;
                Err(AppError::ShuttingDown)
            }
        }
    }

    /// Signals waiting for a worker.
    pub fn queued(&self) -> usize {
        self.sender
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().map(|s| self.capacity - s.capacity()))
            .unwrap_or(0)
    }

    /// Stop accepting signals, let the workers drain the queue and wait
    /// for them to exit.
    pub async fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.write() {
            sender.take();
        }

        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            let _ = worker.await.log("joining worker");
        }

        tracing::info!("Worker pool stopped");
    }
}

async fn work(
    worker_id: String,
    receiver: Arc<Mutex<mpsc::Receiver<Queued>>>,
    executor: Arc<SignalExecutor>,
) {
    tracing::debug!(worker_id = %worker_id, "Worker started");

    loop {
        let next = receiver.lock().await.recv().await;
        let Some(queued) = next else {
            break;
        };
        executor.execute(queued, &worker_id).await;
    }

    tracing::debug!(worker_id = %worker_id, "Worker stopped");
}
