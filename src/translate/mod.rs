// Machine translation collaborators
//
// The pipeline only talks to the `Translator` trait:
// - Ollama: segment-by-segment translation through a local LLM

pub mod ollama;

use async_trait::async_trait;

use crate::config::TranslateConfig;
use crate::error::Result;
use crate::subtitle::Segment;

pub use ollama::{OllamaTranslator, check_ollama_availability};

/// Translation capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate segment text into `target_language`. Implementations must
    /// return one segment per input with start and end unchanged.
    async fn translate(
        &self,
        segments: &[Segment],
        target_language: &str,
        glossary_hints: &[String],
    ) -> Result<Vec<Segment>>;
}

/// Factory for creating translator instances
pub struct TranslatorFactory;

impl TranslatorFactory {
    pub fn create_default(config: TranslateConfig) -> Result<Box<dyn Translator>> {
        Ok(Box::new(OllamaTranslator::new(config)?))
    }
}

/// Convert language code to full language name for clearer prompts
pub fn language_code_to_name(code: &str) -> String {
    let name = match code.to_lowercase().as_str() {
        "en" => "English",
        "ja" => "Japanese",
        "ko" => "Korean",
        "zh" => "Chinese",
        "fr" => "French",
        "de" => "German",
        "es" => "Spanish",
        "ru" => "Russian",
        "it" => "Italian",
        "pt" => "Portuguese",
        "pl" => "Polish",
        "nl" => "Dutch",
        "tr" => "Turkish",
        "ar" => "Arabic",
        "hi" => "Hindi",
        "th" => "Thai",
        "vi" => "Vietnamese",
        "sv" => "Swedish",
        "da" => "Danish",
        "no" => "Norwegian",
        "fi" => "Finnish",
        "he" => "Hebrew",
        "hu" => "Hungarian",
        "cs" => "Czech",
        "uk" => "Ukrainian",
        "id" => "Indonesian",
        "ms" => "Malay",
        "ta" => "Tamil",
        "bn" => "Bengali",
        _ => return code.to_string(),
    };
    name.to_string()
}
