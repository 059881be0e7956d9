//! Bounded-concurrency dispatch of file tasks onto the pipeline.
//!
//! Work items are queued without blocking the caller. A dispatcher takes a
//! semaphore permit before claiming each task in the registry, so tasks of a
//! job that is cancelled while queued are never started.

use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ErrorKind, JimakuError, Result};
use crate::pipeline::Pipeline;
use crate::registry::{JobId, JobRegistry, Stage, TaskError, TaskUpdate};

#[derive(Debug, Clone)]
pub struct WorkItem {
    pub job_id: JobId,
    pub filename: String,
}

pub struct WorkerPool {
    sender: mpsc::UnboundedSender<WorkItem>,
    shutdown: watch::Sender<bool>,
    dispatcher: JoinHandle<()>,
}

impl WorkerPool {
    /// Start the dispatcher. `concurrency` is clamped to at least one.
    pub fn start(pipeline: Arc<Pipeline>, registry: Arc<JobRegistry>, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let dispatcher = tokio::spawn(run_dispatcher(
            receiver,
            shutdown_rx,
            pipeline,
            registry,
            Arc::new(Semaphore::new(concurrency)),
        ));

        info!("Started worker pool with {} worker(s)", concurrency);
        Self {
            sender,
            shutdown,
            dispatcher,
        }
    }

    pub fn submit(&self, job_id: JobId, filename: String) -> Result<()> {
        self.sender
            .send(WorkItem { job_id, filename })
            .map_err(|_| JimakuError::Io(std::io::Error::other("worker pool is shut down")))
    }

    /// Stop dispatching. Tasks already running are allowed to finish; queued
    /// ones stay `Pending`.
    pub async fn shutdown(self) {
        info!("Shutting down worker pool...");
        let _ = self.shutdown.send(true);
        if let Err(e) = self.dispatcher.await {
            error!("Worker dispatcher panicked: {}", e);
        }
        info!("Worker pool stopped");
    }
}

async fn run_dispatcher(
    mut receiver: mpsc::UnboundedReceiver<WorkItem>,
    mut shutdown: watch::Receiver<bool>,
    pipeline: Arc<Pipeline>,
    registry: Arc<JobRegistry>,
    permits: Arc<Semaphore>,
) {
    let mut running = tokio::task::JoinSet::new();

    loop {
        let item = tokio::select! {
            _ = shutdown.changed() => break,
            item = receiver.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        let permit = tokio::select! {
            _ = shutdown.changed() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let task = match registry.claim_task(&item.job_id, &item.filename) {
            Ok(Some(task)) => task,
            Ok(None) => {
                debug!(
                    "Job {}: skipping '{}', no longer dispatchable",
                    item.job_id, item.filename
                );
                continue;
            }
            Err(e) => {
                warn!(
                    "Job {}: cannot dispatch '{}': {}",
                    item.job_id, item.filename, e
                );
                continue;
            }
        };

        let pipeline = Arc::clone(&pipeline);
        let registry = Arc::clone(&registry);
        running.spawn(async move {
            let _permit = permit;
            let job_id = item.job_id.clone();
            let run = tokio::spawn(async move { pipeline.process(&job_id, &task).await });
            if let Err(e) = run.await {
                if e.is_panic() {
                    record_panic(&registry, &item);
                }
            }
        });

        // Reap finished tasks so the set does not grow without bound.
        while let Some(result) = running.try_join_next() {
            if let Err(e) = result {
                error!("Worker task panicked: {}", e);
            }
        }
    }

    debug!("Dispatcher waiting for {} running task(s)", running.len());
    while let Some(result) = running.join_next().await {
        if let Err(e) = result {
            error!("Worker task panicked: {}", e);
        }
    }
}

/// Fail a task whose processing panicked before recording an outcome.
fn record_panic(registry: &JobRegistry, item: &WorkItem) {
    error!(
        "Job {}: processing of '{}' panicked",
        item.job_id, item.filename
    );
    let failure = TaskError::new(
        ErrorKind::CollaboratorFailure,
        Stage::Dispatch,
        "processing panicked",
    );
    if let Err(e) = registry.update_task(&item.job_id, &item.filename, TaskUpdate::Failed(failure)) {
        warn!(
            "Job {}: could not record failure of '{}': {}",
            item.job_id, item.filename, e
        );
    }
}
