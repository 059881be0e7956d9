//! Per-file processing: transcribe, translate, synthesize SRT, store.
//!
//! Every failure is caught here and recorded on the task it belongs to, so a
//! broken file never takes its siblings down with it.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::error::{ErrorKind, JimakuError, Result};
use crate::glossary::GlossaryManager;
use crate::registry::{FileTask, JobId, JobRegistry, Stage, TaskError, TaskUpdate};
use crate::storage::Storage;
use crate::subtitle::{Segment, SubtitleDocument};
use crate::transcribe::Transcriber;
use crate::translate::Translator;

/// Tolerance when checking that a translator kept segment timing.
const TIMING_EPSILON: f64 = 1e-6;

/// Everything a pipeline run needs
pub struct PipelineContext {
    pub transcriber: Arc<dyn Transcriber>,
    pub translator: Arc<dyn Translator>,
    pub storage: Arc<Storage>,
    pub registry: Arc<JobRegistry>,
    pub glossary: Arc<GlossaryManager>,
}

pub struct Pipeline {
    ctx: PipelineContext,
    target_language: String,
    timeout: Duration,
}

impl Pipeline {
    pub fn new(ctx: PipelineContext, target_language: impl Into<String>, timeout: Duration) -> Self {
        Self {
            ctx,
            target_language: target_language.into(),
            timeout,
        }
    }

    /// Process one claimed task and record the outcome in the registry.
    pub async fn process(&self, job_id: &JobId, task: &FileTask) {
        let outcome = self.run_stages(job_id, task).await;

        let update = match outcome {
            Ok(artifact) => {
                info!(
                    "Job {}: '{}' completed -> {}",
                    job_id,
                    task.filename,
                    artifact.display()
                );
                TaskUpdate::Completed { artifact }
            }
            Err(failure) => {
                error!(
                    job_id = %job_id,
                    filename = %task.filename,
                    stage = %failure.stage,
                    "Processing failed: {}",
                    failure.message
                );
                TaskUpdate::Failed(failure)
            }
        };

        if let Err(e) = self.ctx.registry.update_task(job_id, &task.filename, update) {
            error!(
                "Job {}: could not record outcome for '{}': {}",
                job_id, task.filename, e
            );
        }
    }

    async fn run_stages(&self, job_id: &JobId, task: &FileTask) -> std::result::Result<PathBuf, TaskError> {
        let input = task.input_path.as_ref().ok_or_else(|| {
            TaskError::new(ErrorKind::NotFound, Stage::Store, "input was never stored")
        })?;
        let hints = self.ctx.glossary.hints();

        let segments = self
            .with_timeout(Stage::Transcribe, self.ctx.transcriber.transcribe(input, &hints))
            .await?;
        info!(
            "Job {}: '{}' transcribed into {} segment(s)",
            job_id,
            task.filename,
            segments.len()
        );

        let translated = if segments.is_empty() {
            Vec::new()
        } else {
            let translated = self
                .with_timeout(
                    Stage::Translate,
                    self.ctx
                        .translator
                        .translate(&segments, &self.target_language, &hints),
                )
                .await?;
            align_translation(&segments, translated)
                .map_err(|e| TaskError::from_error(Stage::Translate, &e))?
        };

        let document = SubtitleDocument::from_segments(&translated);
        let artifact_name = format!("{}.srt", task.filename);

        self.ctx
            .storage
            .store_output(job_id, &artifact_name, &document.to_srt())
            .await
            .map_err(|e| TaskError::from_error(Stage::Store, &e))
    }

    async fn with_timeout<T>(
        &self,
        stage: Stage,
        fut: impl Future<Output = Result<T>>,
    ) -> std::result::Result<T, TaskError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(TaskError::from_error(stage, &e)),
            Err(_) => Err(TaskError::new(
                ErrorKind::CollaboratorFailure,
                stage,
                format!("{} timed out after {:?}", stage, self.timeout),
            )),
        }
    }
}

/// Pair translated text with the source timing, rejecting translators that
/// dropped, added, or moved segments.
fn align_translation(source: &[Segment], translated: Vec<Segment>) -> Result<Vec<Segment>> {
    if source.len() != translated.len() {
        return Err(JimakuError::Translation(format!(
            "expected {} translated segment(s), got {}",
            source.len(),
            translated.len()
        )));
    }

    source
        .iter()
        .zip(translated)
        .enumerate()
        .map(|(idx, (original, translated))| {
            let moved = (original.start - translated.start).abs() > TIMING_EPSILON
                || (original.end - translated.end).abs() > TIMING_EPSILON;
            if moved {
                return Err(JimakuError::Translation(format!(
                    "segment {} timing changed from {:.3}-{:.3} to {:.3}-{:.3}",
                    idx + 1,
                    original.start,
                    original.end,
                    translated.start,
                    translated.end
                )));
            }
            Ok(Segment {
                start: original.start,
                end: original.end,
                text: translated.text,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Status;
    use crate::transcribe::MockTranscriber;
    use crate::translate::MockTranslator;
    use assert_fs::TempDir;

    struct Fixture {
        _dir: TempDir,
        registry: Arc<JobRegistry>,
        storage: Arc<Storage>,
        glossary: Arc<GlossaryManager>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let storage = Arc::new(Storage::open(dir.path()).unwrap());
            Self {
                _dir: dir,
                registry: Arc::new(JobRegistry::new()),
                storage,
                glossary: Arc::new(GlossaryManager::new()),
            }
        }

        fn pipeline(&self, transcriber: MockTranscriber, translator: MockTranslator) -> Pipeline {
            Pipeline::new(
                PipelineContext {
                    transcriber: Arc::new(transcriber),
                    translator: Arc::new(translator),
                    storage: Arc::clone(&self.storage),
                    registry: Arc::clone(&self.registry),
                    glossary: Arc::clone(&self.glossary),
                },
                "fr",
                Duration::from_secs(5),
            )
        }

        async fn claimed_task(&self, filename: &str) -> (JobId, FileTask) {
            let job = self.registry.create_job(vec![filename.to_string()]).unwrap();
            let path = self.storage.store_input(&job.id, filename, b"audio").await.unwrap();
            self.registry.record_input(&job.id, filename, path).unwrap();
            let task = self.registry.claim_task(&job.id, filename).unwrap().unwrap();
            (job.id, task)
        }
    }

    fn english() -> Vec<Segment> {
        vec![
            Segment::new(0.0, 1.5, "Hello"),
            Segment::new(1.5, 3.0, "Goodbye"),
        ]
    }

    fn to_french(segments: &[Segment]) -> Vec<Segment> {
        segments
            .iter()
            .map(|s| Segment::new(s.start, s.end, format!("fr:{}", s.text)))
            .collect()
    }

    #[tokio::test]
    async fn test_successful_run_stores_translated_srt() {
        let fixture = Fixture::new();
        let (job_id, task) = fixture.claimed_task("talk.wav").await;

        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .times(1)
            .returning(|_, _| Ok(english()));
        let mut translator = MockTranslator::new();
        translator
            .expect_translate()
            .withf(|segments, lang, hints| segments.len() == 2 && lang == "fr" && hints.is_empty())
            .times(1)
            .returning(|segments, _, _| Ok(to_french(segments)));

        fixture.pipeline(transcriber, translator).process(&job_id, &task).await;

        let job = fixture.registry.get_job(&job_id).unwrap();
        assert_eq!(job.status, Status::Completed);
        let done = job.task("talk.wav").unwrap();
        let artifact = done.artifact_path.clone().unwrap();
        assert_eq!(done.artifact_name().as_deref(), Some("talk.wav.srt"));

        let bytes = fixture.storage.read_output(&artifact).await.unwrap();
        let document = SubtitleDocument::parse(&String::from_utf8(bytes).unwrap()).unwrap();
        assert_eq!(document.entries.len(), 2);
        assert_eq!(document.entries[0].text, "fr:Hello");
        assert_eq!(document.entries[1].start, Duration::from_millis(1_500));
    }

    #[tokio::test]
    async fn test_glossary_hints_reach_both_collaborators() {
        let fixture = Fixture::new();
        fixture.glossary.add_terms(["Acme"], Some("brand"));
        let (job_id, task) = fixture.claimed_task("ad.mp4").await;

        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .withf(|_, hints| hints == ["Acme".to_string()])
            .returning(|_, _| Ok(english()));
        let mut translator = MockTranslator::new();
        translator
            .expect_translate()
            .withf(|_, _, hints| hints == ["Acme".to_string()])
            .returning(|segments, _, _| Ok(to_french(segments)));

        fixture.pipeline(transcriber, translator).process(&job_id, &task).await;
        assert_eq!(
            fixture.registry.get_job(&job_id).unwrap().status,
            Status::Completed
        );
    }

    #[tokio::test]
    async fn test_transcription_failure_is_recorded_on_task() {
        let fixture = Fixture::new();
        let (job_id, task) = fixture.claimed_task("broken.wav").await;

        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .returning(|_, _| Err(JimakuError::Transcription("model crashed".to_string())));
        let mut translator = MockTranslator::new();
        translator.expect_translate().never();

        fixture.pipeline(transcriber, translator).process(&job_id, &task).await;

        let job = fixture.registry.get_job(&job_id).unwrap();
        assert_eq!(job.status, Status::Failed);
        let failed = job.task("broken.wav").unwrap();
        let error = failed.error.as_ref().unwrap();
        assert_eq!(error.kind, ErrorKind::CollaboratorFailure);
        assert_eq!(error.stage, Stage::Transcribe);
        assert!(error.message.contains("model crashed"));
        assert!(failed.artifact_path.is_none());
        assert!(fixture.storage.list_outputs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_translator_that_moves_timing_fails_task() {
        let fixture = Fixture::new();
        let (job_id, task) = fixture.claimed_task("drift.wav").await;

        let mut transcriber = MockTranscriber::new();
        transcriber.expect_transcribe().returning(|_, _| Ok(english()));
        let mut translator = MockTranslator::new();
        translator.expect_translate().returning(|segments, _, _| {
            Ok(segments
                .iter()
                .map(|s| Segment::new(s.start + 0.5, s.end, s.text.clone()))
                .collect())
        });

        fixture.pipeline(transcriber, translator).process(&job_id, &task).await;

        let job = fixture.registry.get_job(&job_id).unwrap();
        let error = job.task("drift.wav").unwrap().error.clone().unwrap();
        assert_eq!(error.stage, Stage::Translate);
        assert_eq!(error.kind, ErrorKind::CollaboratorFailure);
    }

    #[tokio::test]
    async fn test_empty_transcript_skips_translation() {
        let fixture = Fixture::new();
        let (job_id, task) = fixture.claimed_task("silence.wav").await;

        let mut transcriber = MockTranscriber::new();
        transcriber.expect_transcribe().returning(|_, _| Ok(Vec::new()));
        let mut translator = MockTranslator::new();
        translator.expect_translate().never();

        fixture.pipeline(transcriber, translator).process(&job_id, &task).await;

        let job = fixture.registry.get_job(&job_id).unwrap();
        assert_eq!(job.status, Status::Completed);
    }

    #[test]
    fn test_align_translation_rejects_count_mismatch() {
        let err = align_translation(&english(), vec![Segment::new(0.0, 1.5, "x")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CollaboratorFailure);
    }
}
