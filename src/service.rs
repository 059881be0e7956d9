//! Transport-agnostic API surface.
//!
//! `SubtitleService` wires storage, the job registry, the glossary and the
//! worker pool together. The HTTP layer and the CLI both drive it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{JimakuError, Result};
use crate::glossary::{GlossaryEntry, GlossaryManager};
use crate::pipeline::{Pipeline, PipelineContext};
use crate::registry::{
    FileTask, Job, JobEvent, JobId, JobRegistry, Stage, Status, TaskError, TaskUpdate,
};
use crate::storage::Storage;
use crate::transcribe::Transcriber;
use crate::translate::Translator;
use crate::worker::WorkerPool;

/// One file received from a client.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub job_id: JobId,
    pub status: Status,
}

/// Client-facing view of a job. Storage paths are reduced to artifact names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: JobId,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub cancelled: bool,
    pub files: Vec<FileSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSummary {
    pub filename: String,
    pub status: Status,
    pub artifact: Option<String>,
    pub error: Option<TaskError>,
}

impl From<&FileTask> for FileSummary {
    fn from(task: &FileTask) -> Self {
        Self {
            filename: task.filename.clone(),
            status: task.status,
            artifact: task.artifact_name(),
            error: task.error.clone(),
        }
    }
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            created_at: job.created_at,
            cancelled: job.cancelled,
            files: job.tasks.iter().map(FileSummary::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlossaryUpdate {
    pub accepted: Vec<GlossaryEntry>,
    pub total: usize,
}

pub struct SubtitleService {
    registry: Arc<JobRegistry>,
    storage: Arc<Storage>,
    glossary: Arc<GlossaryManager>,
    workers: Arc<Mutex<Option<WorkerPool>>>,
}

impl SubtitleService {
    /// Build the service and start its worker pool. Must be called from
    /// within a Tokio runtime.
    pub fn new(
        config: &Config,
        transcriber: Arc<dyn Transcriber>,
        translator: Arc<dyn Translator>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(JobRegistry::new());
        let storage = Arc::new(Storage::open(&config.storage.root)?);
        let glossary = Arc::new(GlossaryManager::new());

        let pipeline = Pipeline::new(
            PipelineContext {
                transcriber,
                translator,
                storage: Arc::clone(&storage),
                registry: Arc::clone(&registry),
                glossary: Arc::clone(&glossary),
            },
            config.pipeline.target_language.clone(),
            config.pipeline.collaborator_timeout(),
        );
        let workers = WorkerPool::start(
            Arc::new(pipeline),
            Arc::clone(&registry),
            config.pipeline.workers,
        );

        info!(
            "Subtitle service ready (storage: {}, target language: {})",
            config.storage.root.display(),
            config.pipeline.target_language
        );

        Ok(Self {
            registry,
            storage,
            glossary,
            workers: Arc::new(Mutex::new(Some(workers))),
        })
    }

    /// Accept a batch of files and queue them for processing. Returns as soon
    /// as the inputs are stored.
    pub async fn upload(&self, files: Vec<UploadedFile>) -> Result<UploadReceipt> {
        for file in &files {
            Storage::validate_filename(&file.name)?;
        }

        let names = files.iter().map(|f| f.name.clone()).collect();
        let job = self.registry.create_job(names)?;
        let job_id = job.id;

        // Runs to completion even if this future is dropped.
        let intake = tokio::spawn(store_and_queue(
            Arc::clone(&self.registry),
            Arc::clone(&self.storage),
            Arc::clone(&self.workers),
            job_id.clone(),
            files,
        ));
        if let Err(e) = intake.await {
            error!("Job {}: intake task failed: {}", job_id, e);
            return Err(JimakuError::Io(std::io::Error::other(format!(
                "intake for job {} failed: {}",
                job_id, e
            ))));
        }

        let job = self.registry.get_job(&job_id)?;
        info!("Job {} accepted with {} file(s)", job.id, job.tasks.len());
        Ok(UploadReceipt {
            job_id: job.id,
            status: job.status,
        })
    }

    pub fn status(&self, job_id: &JobId) -> Result<Job> {
        self.registry.get_job(job_id)
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.registry.list_jobs()
    }

    /// Artifact bytes for a file of a job. `name` may be the uploaded filename
    /// or the artifact name; an uploaded filename takes precedence.
    pub async fn download(&self, job_id: &JobId, name: &str) -> Result<Vec<u8>> {
        let job = self.registry.get_job(job_id)?;
        let task = job
            .task(name)
            .or_else(|| {
                job.tasks
                    .iter()
                    .find(|task| task.artifact_name().as_deref() == Some(name))
            })
            .ok_or_else(|| JimakuError::NotFound(format!("file '{}' in job {}", name, job_id)))?;

        let artifact = task.artifact_path.as_ref().ok_or_else(|| {
            JimakuError::NotFound(format!(
                "subtitle for '{}' in job {} is not available ({:?})",
                task.filename, job_id, task.status
            ))
        })?;

        self.storage.read_output(artifact).await
    }

    pub fn list_outputs(&self) -> Result<Vec<String>> {
        self.storage.list_outputs()
    }

    pub fn add_glossary_terms(&self, terms: &[String], category: Option<&str>) -> GlossaryUpdate {
        let accepted = self.glossary.add_terms(terms, category);
        GlossaryUpdate {
            accepted,
            total: self.glossary.len(),
        }
    }

    pub fn glossary_terms(&self) -> Vec<GlossaryEntry> {
        self.glossary.current_terms()
    }

    pub fn cancel(&self, job_id: &JobId) -> Result<Job> {
        self.registry.cancel_job(job_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.registry.subscribe()
    }

    /// Wait for a job to settle. On timeout the latest snapshot is returned,
    /// which callers can tell apart with `Job::is_settled`.
    pub async fn wait_until_settled(&self, job_id: &JobId, timeout: Duration) -> Result<Job> {
        let mut events = self.registry.subscribe();
        let job = self.registry.get_job(job_id)?;
        if job.is_settled() {
            return Ok(job);
        }

        let wait = async {
            loop {
                match events.recv().await {
                    Ok(event) if event.job_id == *job_id && event.status.is_settled() => break,
                    Ok(_) | Err(RecvError::Lagged(_)) => {
                        if self.registry.get_job(job_id)?.is_settled() {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            Ok::<(), JimakuError>(())
        };

        if tokio::time::timeout(timeout, wait).await.is_err() {
            warn!("Job {} did not settle within {:?}", job_id, timeout);
        }
        self.registry.get_job(job_id)
    }

    /// Stop the worker pool, letting running tasks finish.
    pub async fn shutdown(&self) {
        let workers = self.workers.lock().take();
        if let Some(workers) = workers {
            workers.shutdown().await;
        }
    }
}

async fn store_and_queue(
    registry: Arc<JobRegistry>,
    storage: Arc<Storage>,
    workers: Arc<Mutex<Option<WorkerPool>>>,
    job_id: JobId,
    files: Vec<UploadedFile>,
) {
    for file in files {
        let stored = match storage.store_input(&job_id, &file.name, &file.bytes).await {
            Ok(path) => registry.record_input(&job_id, &file.name, path),
            Err(e) => Err(e),
        };

        let failure = match stored {
            Err(e) => {
                error!(
                    job_id = %job_id,
                    filename = %file.name,
                    stage = %Stage::Store,
                    "Failed to store input: {}",
                    e
                );
                Some(TaskError::from_error(Stage::Store, &e))
            }
            Ok(()) => match submit(&workers, &job_id, &file.name) {
                Err(e) => {
                    warn!("Job {}: could not queue '{}': {}", job_id, file.name, e);
                    Some(TaskError::from_error(Stage::Dispatch, &e))
                }
                Ok(()) => None,
            },
        };

        if let Some(failure) = failure {
            if let Err(e) = registry.update_task(&job_id, &file.name, TaskUpdate::Failed(failure)) {
                warn!("Job {}: could not record failure of '{}': {}", job_id, file.name, e);
            }
        }
    }
}

fn submit(workers: &Mutex<Option<WorkerPool>>, job_id: &JobId, filename: &str) -> Result<()> {
    match workers.lock().as_ref() {
        Some(workers) => workers.submit(job_id.clone(), filename.to_string()),
        None => Err(JimakuError::Io(std::io::Error::other(
            "service is shutting down",
        ))),
    }
}
