//! Worker pool executing orchestration runs
//!
//! Notifications are queued on a bounded channel shared by `workers` tokio
//! tasks. Dispatch never blocks: a full or closed queue is reported to the
//! caller, which leaves the source message for redelivery. Every finished
//! [`TaskResult`] is logged and forwarded on the results channel.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::models::{FileNotification, TaskResult};

/// Executes one notification end to end
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, notification: &FileNotification) -> TaskResult;
}

/// Accepts notifications for asynchronous execution
pub trait TaskDispatcher: Send + Sync {
    fn dispatch(&self, notification: FileNotification) -> Result<(), DispatchError>;
}

/// Dispatch failures. Both are transient: the notification may be retried.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    #[error("worker queue is full")]
    Full,

    #[error("worker pool is shut down")]
    Closed,
}

impl DispatchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DispatchError::Full | DispatchError::Closed)
    }
}

pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<FileNotification>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start `workers` tasks behind a queue of `capacity` pending notifications
    pub fn spawn(
        runner: Arc<dyn TaskRunner>,
        workers: usize,
        capacity: usize,
    ) -> (Self, mpsc::UnboundedReceiver<TaskResult>) {
        let (sender, receiver) = mpsc::channel::<FileNotification>(capacity.max(1));
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|worker_id| {
                let receiver = receiver.clone();
                let runner = runner.clone();
                let results = results_tx.clone();

                tokio::spawn(async move {
                    loop {
                        let next = receiver.lock().await.recv().await;
                        let Some(notification) = next else {
                            break;
                        };

                        let result = run_isolated(runner.clone(), notification).await;
                        if result.is_success() {
                            info!(
                                worker_id,
                                bucket = %result.bucket,
                                key = %result.input_key,
                                "Task succeeded"
                            );
                        } else {
                            warn!(
                                worker_id,
                                bucket = %result.bucket,
                                key = %result.input_key,
                                error = result.error.as_deref().unwrap_or_default(),
                                "Task failed"
                            );
                        }

                        // Nobody listening is fine.
                        let _ = results.send(result);
                    }
                    debug!(worker_id, "Worker stopped");
                })
            })
            .collect();

        info!(workers = workers.max(1), capacity, "Worker pool started");

        (
            Self {
                sender: Mutex::new(Some(sender)),
                handles: Mutex::new(handles),
            },
            results_rx,
        )
    }

    /// Stop accepting work and wait for queued and in-flight runs to finish
    pub async fn shutdown(&self) {
        lock(&self.sender).take();
        let handles = std::mem::take(&mut *lock(&self.handles));

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }
        info!("Worker pool stopped");
    }
}

impl TaskDispatcher for WorkerPool {
    fn dispatch(&self, notification: FileNotification) -> Result<(), DispatchError> {
        let guard = lock(&self.sender);
        let sender = guard.as_ref().ok_or(DispatchError::Closed)?;

        sender.try_send(notification).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DispatchError::Full,
            mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
        })
    }
}

/// Run on a separate task so a panicking run becomes a failed result
async fn run_isolated(runner: Arc<dyn TaskRunner>, notification: FileNotification) -> TaskResult {
    let fallback = notification.clone();
    let handle = tokio::spawn(async move { runner.run(&notification).await });

    match handle.await {
        Ok(result) => result,
        Err(e) => TaskResult::failed(&fallback, format!("task aborted: {}", e)),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
