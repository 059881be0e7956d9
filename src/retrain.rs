//! Corrected-subtitle ingestion and the retraining trigger.
//!
//! Ingestion copies human-corrected SRT files into the dataset directory.
//! Retrain requests are handed to a training collaborator through a queue so
//! the caller never waits on training.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::error::{JimakuError, Result};
use crate::subtitle::SubtitleDocument;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainRequest {
    pub dataset_dir: PathBuf,
    /// Files added by the ingestion that triggered this request
    pub new_files: Vec<PathBuf>,
    pub requested_at: DateTime<Utc>,
}

impl RetrainRequest {
    pub fn new(dataset_dir: impl Into<PathBuf>, new_files: Vec<PathBuf>) -> Self {
        Self {
            dataset_dir: dataset_dir.into(),
            new_files,
            requested_at: Utc::now(),
        }
    }
}

/// Training capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrainingCollaborator: Send + Sync {
    async fn retrain(&self, request: &RetrainRequest) -> Result<()>;
}

/// Runs an external training command with the dataset directory appended
pub struct CommandTrainer {
    command: Vec<String>,
}

impl CommandTrainer {
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(JimakuError::Config(
                "retraining.command must name a program".to_string(),
            ));
        }
        Ok(Self { command })
    }
}

#[async_trait]
impl TrainingCollaborator for CommandTrainer {
    async fn retrain(&self, request: &RetrainRequest) -> Result<()> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| JimakuError::Config("empty training command".to_string()))?;

        info!(
            "Starting retraining with {} new file(s): {}",
            request.new_files.len(),
            program
        );

        let output = Command::new(program)
            .args(args)
            .arg(&request.dataset_dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| JimakuError::Training(format!("Failed to execute {}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(JimakuError::Training(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                stderr.trim()
            )));
        }

        info!("Retraining finished");
        Ok(())
    }
}

/// Copy every parseable `.srt` file under `source` into `dataset_dir`,
/// keeping relative paths. Returns the copied destinations, sorted.
pub fn ingest_corrections(source: &Path, dataset_dir: &Path) -> Result<Vec<PathBuf>> {
    if !source.is_dir() {
        return Err(JimakuError::NotFound(format!(
            "corrections directory {}",
            source.display()
        )));
    }
    std::fs::create_dir_all(dataset_dir).map_err(|e| JimakuError::io_at(e, dataset_dir))?;

    let mut ingested = Vec::new();

    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source).to_path_buf();
            match e.into_io_error() {
                Some(io) => JimakuError::io_at(io, &path),
                None => JimakuError::Io(std::io::Error::other(format!(
                    "filesystem loop at {}",
                    path.display()
                ))),
            }
        })?;

        let path = entry.path();
        if !entry.file_type().is_file() || !is_srt(path) {
            continue;
        }

        let content = std::fs::read_to_string(path).map_err(|e| JimakuError::io_at(e, path))?;
        if let Err(e) = SubtitleDocument::parse(&content) {
            warn!("Skipping {}: {}", path.display(), e);
            continue;
        }

        let relative = path.strip_prefix(source).unwrap_or(path);
        let destination = dataset_dir.join(relative);
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent).map_err(|e| JimakuError::io_at(e, parent))?;
        }
        std::fs::copy(path, &destination).map_err(|e| JimakuError::io_at(e, path))?;

        debug!("Ingested {} -> {}", path.display(), destination.display());
        ingested.push(destination);
    }

    ingested.sort();
    info!(
        "Ingested {} corrected subtitle file(s) into {}",
        ingested.len(),
        dataset_dir.display()
    );
    Ok(ingested)
}

fn is_srt(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("srt"))
}

/// Single-consumer queue feeding retrain requests to a collaborator in order
pub struct RetrainingQueue {
    sender: mpsc::UnboundedSender<RetrainRequest>,
    consumer: JoinHandle<()>,
}

impl RetrainingQueue {
    pub fn start(trainer: Arc<dyn TrainingCollaborator>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<RetrainRequest>();

        let consumer = tokio::spawn(async move {
            while let Some(request) = receiver.recv().await {
                if let Err(e) = trainer.retrain(&request).await {
                    error!(
                        "Retraining on {} failed: {}",
                        request.dataset_dir.display(),
                        e
                    );
                }
            }
            debug!("Retraining queue drained");
        });

        Self { sender, consumer }
    }

    pub fn submit(&self, request: RetrainRequest) -> Result<()> {
        info!("Retraining requested for {}", request.dataset_dir.display());
        self.sender
            .send(request)
            .map_err(|_| JimakuError::Training("retraining queue is closed".to_string()))
    }

    /// Close the queue and wait for queued requests to be handled.
    pub async fn finish(self) {
        drop(self.sender);
        if let Err(e) = self.consumer.await {
            error!("Retraining consumer panicked: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;

    const VALID_SRT: &str = "1\n00:00:00,000 --> 00:00:01,500\nHello\n";

    #[test]
    fn test_ingest_copies_only_parseable_srt_files() {
        let source = TempDir::new().unwrap();
        source.child("ep1.srt").write_str(VALID_SRT).unwrap();
        source.child("season2/ep2.SRT").write_str(VALID_SRT).unwrap();
        source.child("notes.txt").write_str("not a subtitle").unwrap();
        source.child("broken.srt").write_str("one\nnot a timing\n").unwrap();
        let dataset = TempDir::new().unwrap();

        let ingested = ingest_corrections(source.path(), dataset.path()).unwrap();

        assert_eq!(
            ingested,
            vec![
                dataset.path().join("ep1.srt"),
                dataset.path().join("season2").join("ep2.SRT"),
            ]
        );
        dataset.child("ep1.srt").assert(VALID_SRT);
        assert!(!dataset.child("broken.srt").path().exists());
        assert!(!dataset.child("notes.txt").path().exists());
    }

    #[test]
    fn test_ingest_missing_source_is_not_found() {
        let dataset = TempDir::new().unwrap();
        let err = ingest_corrections(&dataset.path().join("nope"), dataset.path()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[test]
    fn test_command_trainer_requires_program() {
        assert!(CommandTrainer::new(Vec::new()).is_err());
        assert!(CommandTrainer::new(vec![" ".to_string()]).is_err());
        assert!(CommandTrainer::new(vec!["train.sh".to_string()]).is_ok());
    }

    #[tokio::test]
    async fn test_queue_hands_requests_to_trainer_in_order() {
        let mut trainer = MockTrainingCollaborator::new();
        let mut seq = mockall::Sequence::new();
        trainer
            .expect_retrain()
            .withf(|request| request.new_files.len() == 1)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(JimakuError::Training("out of memory".to_string())));
        trainer
            .expect_retrain()
            .withf(|request| request.new_files.len() == 2)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let queue = RetrainingQueue::start(Arc::new(trainer));
        queue
            .submit(RetrainRequest::new("/data", vec![PathBuf::from("a.srt")]))
            .unwrap();
        queue
            .submit(RetrainRequest::new(
                "/data",
                vec![PathBuf::from("a.srt"), PathBuf::from("b.srt")],
            ))
            .unwrap();

        queue.finish().await;
    }
}
