// Speech recognition collaborators
//
// The pipeline only talks to the `Transcriber` trait; concrete engines live in
// submodules and are picked by the factory:
// - WhisperCpp: ffmpeg audio extraction + the whisper.cpp command line tool

pub mod whisper_cpp;

use async_trait::async_trait;
use std::path::Path;

use crate::config::TranscriberConfig;
use crate::error::Result;
use crate::subtitle::Segment;

/// Speech recognition capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe a stored media file into time-aligned segments. Glossary
    /// hints bias recognition of domain terms; an empty slice means none.
    async fn transcribe(&self, media_path: &Path, glossary_hints: &[String]) -> Result<Vec<Segment>>;
}

/// Transcriber implementation type
#[derive(Debug, Clone)]
pub enum TranscriberImplementation {
    WhisperCpp,
}

/// Factory for creating transcriber instances
pub struct TranscriberFactory;

impl TranscriberFactory {
    pub fn create_transcriber(
        implementation: TranscriberImplementation,
        config: TranscriberConfig,
    ) -> Box<dyn Transcriber> {
        match implementation {
            TranscriberImplementation::WhisperCpp => {
                Box::new(whisper_cpp::WhisperCppTranscriber::new(config))
            }
        }
    }

    pub fn create_default(config: TranscriberConfig) -> Box<dyn Transcriber> {
        Self::create_transcriber(TranscriberImplementation::WhisperCpp, config)
    }
}
