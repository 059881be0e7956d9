//! Shared test utilities for jimaku integration tests.
//!
//! Uploaded "media" in these tests is plain text: every non-blank line becomes
//! one second-long segment. A file whose first line is `FAIL` makes the
//! transcriber error out, and `SLOW` makes it hang past the collaborator
//! timeout.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use assert_fs::TempDir;
use async_trait::async_trait;
use parking_lot::Mutex;

use jimaku::config::Config;
use jimaku::error::{JimakuError, Result};
use jimaku::service::SubtitleService;
use jimaku::subtitle::Segment;
use jimaku::transcribe::Transcriber;
use jimaku::translate::Translator;

/// Reads the stored input as text and records the hints it was given
#[derive(Default)]
pub struct ScriptedTranscriber {
    pub hints_seen: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, media_path: &Path, glossary_hints: &[String]) -> Result<Vec<Segment>> {
        self.hints_seen.lock().push(glossary_hints.to_vec());

        let content = tokio::fs::read_to_string(media_path).await?;
        match content.lines().next().map(str::trim) {
            Some("FAIL") => {
                return Err(JimakuError::Transcription("decoder crashed".to_string()));
            }
            Some("SLOW") => {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            _ => {}
        }

        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(i, line)| Segment::new(i as f64, i as f64 + 1.0, line.trim()))
            .collect())
    }
}

/// Prefixes every segment with the target language
pub struct TaggingTranslator;

#[async_trait]
impl Translator for TaggingTranslator {
    async fn translate(
        &self,
        segments: &[Segment],
        target_language: &str,
        _glossary_hints: &[String],
    ) -> Result<Vec<Segment>> {
        Ok(segments
            .iter()
            .map(|s| Segment::new(s.start, s.end, format!("[{}] {}", target_language, s.text)))
            .collect())
    }
}

/// A service over a temporary storage root with fake collaborators.
pub struct TestHarness {
    pub dir: TempDir,
    pub transcriber: Arc<ScriptedTranscriber>,
    pub service: Arc<SubtitleService>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(customize: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");

        let mut config = Config::default();
        config.storage.root = dir.path().join("storage");
        config.pipeline.target_language = "fr".to_string();
        config.pipeline.workers = 2;
        config.pipeline.collaborator_timeout_secs = 1;
        customize(&mut config);

        let transcriber = Arc::new(ScriptedTranscriber::default());
        let service = SubtitleService::new(
            &config,
            Arc::clone(&transcriber) as Arc<dyn Transcriber>,
            Arc::new(TaggingTranslator),
        )
        .expect("Failed to build service");

        Self {
            dir,
            transcriber,
            service: Arc::new(service),
        }
    }
}

pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);
