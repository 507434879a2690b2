//! Deferred execution of tagged background tasks.

use async_trait::async_trait;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use snipmaster_common::{Error, Result};

/// Platform facility that runs a tagged task later, possibly after the
/// caller has gone away.
#[async_trait]
pub trait BackgroundScheduler: Send + Sync {
    /// Whether registrations can currently be accepted.
    fn is_supported(&self) -> bool;

    /// Ask for the task `tag` to run. Registering a tag that is already
    /// waiting does not queue it twice.
    async fn register(&self, tag: &str) -> Result<()>;
}

#[derive(Debug)]
enum WorkerMessage {
    Run(String),
    Shutdown,
}

/// In-process background scheduler backed by a task queue.
///
/// The worker only queues tags; the paired [`BackgroundWorkerHandle`] runs
/// them and must be spawned on the runtime.
#[derive(Debug, Clone)]
pub struct BackgroundWorker {
    tx: mpsc::Sender<WorkerMessage>,
    queued: Arc<Mutex<HashSet<String>>>,
}

impl BackgroundWorker {
    /// Create a worker and the handle that executes its tasks.
    pub fn new() -> (Self, BackgroundWorkerHandle) {
        let (tx, rx) = mpsc::channel(32);
        let queued = Arc::new(Mutex::new(HashSet::new()));

        let worker = Self {
            tx,
            queued: queued.clone(),
        };
        let handle = BackgroundWorkerHandle { rx, queued };
        (worker, handle)
    }

    /// Stop the run loop after the tasks already queued.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(WorkerMessage::Shutdown).await;
    }

    fn queued(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.queued.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl BackgroundScheduler for BackgroundWorker {
    fn is_supported(&self) -> bool {
        !self.tx.is_closed()
    }

    async fn register(&self, tag: &str) -> Result<()> {
        if !self.queued().insert(tag.to_string()) {
            debug!("Background task {} already queued", tag);
            return Ok(());
        }

        if self.tx.send(WorkerMessage::Run(tag.to_string())).await.is_err() {
            self.queued().remove(tag);
            return Err(Error::BackgroundRegistration(format!(
                "worker stopped, cannot run {}",
                tag
            )));
        }

        debug!("Background task {} registered", tag);
        Ok(())
    }
}

/// Run loop for a [`BackgroundWorker`].
pub struct BackgroundWorkerHandle {
    rx: mpsc::Receiver<WorkerMessage>,
    queued: Arc<Mutex<HashSet<String>>>,
}

impl BackgroundWorkerHandle {
    /// Run queued tasks until shutdown.
    ///
    /// This should be spawned in a tokio task. `handler` is called once per
    /// dequeued tag; its errors are logged and the loop continues.
    pub async fn run<F, Fut>(mut self, handler: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send,
    {
        info!("Background worker started");

        while let Some(message) = self.rx.recv().await {
            match message {
                WorkerMessage::Shutdown => {
                    info!("Background worker shutting down");
                    break;
                }
                WorkerMessage::Run(tag) => {
                    // Dequeue first so a registration made while the task
                    // runs schedules another run.
                    self.queued
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .remove(&tag);

                    debug!("Running background task {}", tag);
                    if let Err(e) = handler(tag.clone()).await {
                        error!("Background task {} failed: {}", tag, e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_duplicate_registrations_coalesce() {
        let (worker, handle) = BackgroundWorker::new();

        worker.register("sync-snippets").await.unwrap();
        worker.register("sync-snippets").await.unwrap();
        worker.register("other").await.unwrap();
        worker.shutdown().await;

        let runs = Arc::new(Mutex::new(Vec::new()));
        let runs_clone = runs.clone();
        handle
            .run(move |tag| {
                let runs = runs_clone.clone();
                async move {
                    runs.lock().unwrap().push(tag);
                    Ok(())
                }
            })
            .await;

        assert_eq!(*runs.lock().unwrap(), vec!["sync-snippets", "other"]);
    }

    #[tokio::test]
    async fn test_handler_errors_do_not_stop_loop() {
        let (worker, handle) = BackgroundWorker::new();
        let count = Arc::new(AtomicU32::new(0));
        let count_clone = count.clone();

        let task = tokio::spawn(handle.run(move |_tag| {
            let count = count_clone.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err(Error::RemoteSync("boom".to_string()))
            }
        }));

        worker.register("a").await.unwrap();
        worker.register("b").await.unwrap();
        worker.shutdown().await;
        task.await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unsupported_after_shutdown() {
        let (worker, handle) = BackgroundWorker::new();
        assert!(worker.is_supported());

        worker.shutdown().await;
        handle.run(|_tag| async { Ok(()) }).await;

        assert!(!worker.is_supported());
        assert!(matches!(
            worker.register("sync-snippets").await,
            Err(Error::BackgroundRegistration(_))
        ));
    }
}
