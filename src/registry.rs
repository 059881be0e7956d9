//! Job lifecycle tracking.
//!
//! The registry is the only shared mutable state in the service. Jobs are kept
//! in a map guarded by an `RwLock`, and each job sits behind its own `Mutex`,
//! so a task update and the aggregate status recomputation happen in one
//! critical section. Readers only ever receive cloned snapshots.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ErrorKind, JimakuError, Result};

const EVENT_CAPACITY: usize = 256;

/// Opaque job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl Status {
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Pipeline stage a task failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Store,
    Transcribe,
    Translate,
    Dispatch,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Store => "store",
            Self::Transcribe => "transcribe",
            Self::Translate => "translate",
            Self::Dispatch => "dispatch",
        };
        f.write_str(name)
    }
}

/// Error detail recorded on a failed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub stage: Stage,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: ErrorKind, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            message: message.into(),
        }
    }

    pub fn from_error(stage: Stage, err: &JimakuError) -> Self {
        Self::new(err.kind(), stage, err.to_string())
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, Stage::Dispatch, "job was cancelled")
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} during {}: {}", self.kind, self.stage, self.message)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTask {
    pub filename: String,
    pub input_path: Option<PathBuf>,
    pub artifact_path: Option<PathBuf>,
    pub status: Status,
    pub error: Option<TaskError>,
}

impl FileTask {
    fn new(filename: String) -> Self {
        Self {
            filename,
            input_path: None,
            artifact_path: None,
            status: Status::Pending,
            error: None,
        }
    }

    /// Artifact file name, once produced.
    pub fn artifact_name(&self) -> Option<String> {
        self.artifact_path
            .as_ref()
            .and_then(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: Status,
    pub tasks: Vec<FileTask>,
    pub created_at: DateTime<Utc>,
    pub cancelled: bool,
    /// Creation order within this registry.
    #[serde(skip)]
    sequence: u64,
}

impl Job {
    pub fn task(&self, filename: &str) -> Option<&FileTask> {
        self.tasks.iter().find(|task| task.filename == filename)
    }

    fn task_mut(&mut self, filename: &str) -> Result<&mut FileTask> {
        let id = self.id.clone();
        self.tasks
            .iter_mut()
            .find(|task| task.filename == filename)
            .ok_or_else(|| JimakuError::NotFound(format!("file '{}' in job {}", filename, id)))
    }

    /// Aggregate status derived from the task statuses.
    pub fn aggregate_status(tasks: &[FileTask]) -> Status {
        let all = |status| tasks.iter().all(|task| task.status == status);
        let any_failed = tasks.iter().any(|task| task.status == Status::Failed);
        let any_unsettled = tasks.iter().any(|task| !task.status.is_settled());

        if all(Status::Completed) {
            Status::Completed
        } else if any_failed && !any_unsettled {
            Status::Failed
        } else if all(Status::Pending) {
            Status::Pending
        } else {
            Status::InProgress
        }
    }

    pub fn is_settled(&self) -> bool {
        self.status.is_settled()
    }
}

/// State change applied to one task.
#[derive(Debug, Clone)]
pub enum TaskUpdate {
    Started,
    Completed { artifact: PathBuf },
    Failed(TaskError),
}

/// Broadcast whenever a job's aggregate status changes.
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub job_id: JobId,
    pub status: Status,
}

pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<Mutex<Job>>>>,
    next_sequence: AtomicU64,
    events: broadcast::Sender<JobEvent>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            jobs: RwLock::new(HashMap::new()),
            next_sequence: AtomicU64::new(0),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Create a job with one pending task per filename.
    pub fn create_job(&self, filenames: Vec<String>) -> Result<Job> {
        if filenames.is_empty() {
            return Err(JimakuError::Validation(
                "upload must contain at least one file".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for name in &filenames {
            if !seen.insert(name.as_str()) {
                return Err(JimakuError::Validation(format!(
                    "duplicate filename '{}' in upload",
                    name
                )));
            }
        }

        let mut jobs = self.jobs.write();
        let mut id = JobId::new();
        while jobs.contains_key(&id) {
            id = JobId::new();
        }

        let job = Job {
            id: id.clone(),
            status: Status::Pending,
            tasks: filenames.into_iter().map(FileTask::new).collect(),
            created_at: Utc::now(),
            cancelled: false,
            sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
        };
        jobs.insert(id.clone(), Arc::new(Mutex::new(job.clone())));

        info!("Created job {} with {} file(s)", id, job.tasks.len());
        Ok(job)
    }

    pub fn get_job(&self, job_id: &JobId) -> Result<Job> {
        let entry = self.entry(job_id)?;
        let job = entry.lock().clone();
        Ok(job)
    }

    /// Snapshots of all jobs, oldest first.
    pub fn list_jobs(&self) -> Vec<Job> {
        let entries: Vec<_> = self.jobs.read().values().cloned().collect();
        let mut jobs: Vec<Job> = entries.iter().map(|entry| entry.lock().clone()).collect();
        jobs.sort_by_key(|job| job.sequence);
        jobs
    }

    pub fn record_input(&self, job_id: &JobId, filename: &str, path: PathBuf) -> Result<()> {
        self.mutate(job_id, |job| {
            job.task_mut(filename)?.input_path = Some(path);
            Ok(())
        })
        .map(|_| ())
    }

    /// Apply a task update and recompute the aggregate status.
    pub fn update_task(&self, job_id: &JobId, filename: &str, update: TaskUpdate) -> Result<Job> {
        self.mutate(job_id, |job| apply_update(job.task_mut(filename)?, update))
            .map(|((), job)| job)
    }

    /// Move a pending task of a live job to `InProgress`. Returns `None` when
    /// the job was cancelled or the task is no longer pending.
    pub fn claim_task(&self, job_id: &JobId, filename: &str) -> Result<Option<FileTask>> {
        self.mutate(job_id, |job| {
            if job.cancelled {
                return Ok(None);
            }
            let task = job.task_mut(filename)?;
            if task.status != Status::Pending {
                return Ok(None);
            }
            apply_update(task, TaskUpdate::Started)?;
            Ok(Some(task.clone()))
        })
        .map(|(task, _)| task)
    }

    /// Stop dispatching a job. Pending tasks fail as cancelled; tasks already
    /// running are left to finish.
    pub fn cancel_job(&self, job_id: &JobId) -> Result<Job> {
        let ((), job) = self.mutate(job_id, |job| {
            job.cancelled = true;
            for task in job.tasks.iter_mut().filter(|t| t.status == Status::Pending) {
                apply_update(task, TaskUpdate::Failed(TaskError::cancelled()))?;
            }
            Ok(())
        })?;
        info!("Cancelled job {}", job_id);
        Ok(job)
    }

    fn entry(&self, job_id: &JobId) -> Result<Arc<Mutex<Job>>> {
        self.jobs
            .read()
            .get(job_id)
            .cloned()
            .ok_or_else(|| JimakuError::JobNotFound(job_id.to_string()))
    }

    /// Run `f` under the job's lock and refresh the aggregate status before the
    /// lock is released. Returns `f`'s value with a snapshot of the result.
    fn mutate<T>(&self, job_id: &JobId, f: impl FnOnce(&mut Job) -> Result<T>) -> Result<(T, Job)> {
        let entry = self.entry(job_id)?;
        let mut job = entry.lock();

        let before = job.status;
        let outcome = f(&mut *job);
        job.status = Job::aggregate_status(&job.tasks);

        if job.status != before {
            debug!("Job {} status {:?} -> {:?}", job.id, before, job.status);
            // No receivers is fine.
            let _ = self.events.send(JobEvent {
                job_id: job.id.clone(),
                status: job.status,
            });
        }

        let value = outcome?;
        Ok((value, job.clone()))
    }
}

fn apply_update(task: &mut FileTask, update: TaskUpdate) -> Result<()> {
    if task.status.is_settled() {
        return Err(JimakuError::Validation(format!(
            "task '{}' already settled as {:?}",
            task.filename, task.status
        )));
    }

    match update {
        TaskUpdate::Started => {
            task.status = Status::InProgress;
        }
        TaskUpdate::Completed { artifact } => {
            if task.status != Status::InProgress {
                return Err(JimakuError::Validation(format!(
                    "task '{}' completed without being started",
                    task.filename
                )));
            }
            task.artifact_path = Some(artifact);
            task.status = Status::Completed;
        }
        TaskUpdate::Failed(error) => {
            task.artifact_path = None;
            task.error = Some(error);
            task.status = Status::Failed;
        }
    }
    Ok(())
}
