use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::{Translator, language_code_to_name};
use crate::config::TranslateConfig;
use crate::error::{JimakuError, Result};
use crate::subtitle::Segment;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationResponse {
    pub response: String,
    pub done: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationResult {
    pub text: String,
}

/// Translates segments one at a time through Ollama's generate API
pub struct OllamaTranslator {
    client: Client,
    config: TranslateConfig,
}

impl OllamaTranslator {
    pub fn new(config: TranslateConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;

        Ok(Self { client, config })
    }

    /// Translate one piece of text, retrying up to `max_retries` times.
    pub async fn translate_text(
        &self,
        text: &str,
        target_language: &str,
        glossary_hints: &[String],
    ) -> Result<String> {
        let prompt = build_translation_prompt(text, target_language, glossary_hints);
        let attempts = self.config.max_retries + 1;
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.generate(&prompt).await {
                Ok(translation) => return Ok(translation),
                Err(e) => {
                    warn!("Translation attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| JimakuError::Translation("no attempts made".to_string())))
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = TranslationRequest {
            model: self.config.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            format: "json".to_string(),
        };

        let url = format!("{}/api/generate", self.config.endpoint.trim_end_matches('/'));
        debug!("Sending translation request to: {}", url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| JimakuError::Translation(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(JimakuError::Translation(format!(
                "Ollama API error {}: {}",
                status, error_text
            )));
        }

        let translation_response: TranslationResponse = response
            .json()
            .await
            .map_err(|e| JimakuError::Translation(format!("Failed to parse response: {}", e)))?;

        let raw_response = translation_response.response.trim();
        debug!("Raw Ollama response: {}", raw_response);

        if raw_response.is_empty() {
            return Err(JimakuError::Translation("Empty translation received".to_string()));
        }

        if let Ok(result) = serde_json::from_str::<TranslationResult>(raw_response) {
            return Ok(result.text.trim().to_string());
        }

        Ok(clean_translation_response(raw_response))
    }
}

#[async_trait]
impl Translator for OllamaTranslator {
    async fn translate(
        &self,
        segments: &[Segment],
        target_language: &str,
        glossary_hints: &[String],
    ) -> Result<Vec<Segment>> {
        info!(
            "Translating {} segment(s) to {}",
            segments.len(),
            target_language
        );

        let mut translated = Vec::with_capacity(segments.len());
        for (idx, segment) in segments.iter().enumerate() {
            let text = if segment.text.trim().is_empty() {
                String::new()
            } else {
                self.translate_text(&segment.text, target_language, glossary_hints)
                    .await
                    .map_err(|e| {
                        JimakuError::Translation(format!("segment {}: {}", idx + 1, e))
                    })?
            };
            debug!("Segment {}/{}: {} => {}", idx + 1, segments.len(), segment.text, text);

            translated.push(Segment {
                start: segment.start,
                end: segment.end,
                text,
            });
        }

        Ok(translated)
    }
}

/// Build translation prompt, asking for a JSON reply
pub fn build_translation_prompt(text: &str, target_language: &str, glossary_hints: &[String]) -> String {
    let language_name = language_code_to_name(target_language);

    let mut prompt = format!(
        "You are a professional subtitle translator.\n\
         \n\
         CRITICAL: You must translate the text to {} ONLY. Do not translate to any other language.\n\
         The target language is: {} (language code: {})\n\
         \n\
         Return ONLY the translation in JSON format as {{\"text\":\"your {} translation here\"}}.\n\
         Do not include any explanations, alternatives, or text in other languages.\n\
         \n",
        language_name, language_name, target_language, language_name
    );

    if !glossary_hints.is_empty() {
        prompt.push_str(&format!(
            "[Glossary - keep these names and terms consistent]\n{}\n\n",
            glossary_hints.join(", ")
        ));
    }

    prompt.push_str(&format!("[Text to translate]\n{}\n", text));
    prompt
}

/// Clean up translation response to extract just the translation
pub fn clean_translation_response(response: &str) -> String {
    let lines: Vec<&str> = response.lines().collect();

    for &line in &lines {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            continue;
        }

        if trimmed.starts_with("Here are")
            || trimmed.starts_with("Option")
            || trimmed.starts_with("**Option")
            || trimmed.starts_with("Translation:")
            || trimmed.starts_with("- ")
            || trimmed.starts_with("* ")
        {
            continue;
        }

        if trimmed.starts_with("**") && trimmed.ends_with("**") {
            continue;
        }

        if trimmed.chars().count() > 3 {
            return trimmed.to_string();
        }
    }

    lines
        .iter()
        .map(|line| line.trim())
        .find(|line| !line.is_empty())
        .unwrap_or(response)
        .to_string()
}

/// Check if Ollama is reachable and the model is available
pub async fn check_ollama_availability(endpoint: &str, model: &str) -> Result<()> {
    let client = Client::new();
    let url = format!("{}/api/show", endpoint.trim_end_matches('/'));

    let response = client
        .post(&url)
        .json(&json!({ "name": model }))
        .send()
        .await
        .map_err(|e| JimakuError::Translation(format!("Failed to connect to Ollama: {}", e)))?;

    if response.status().is_success() {
        info!("Ollama model '{}' is available", model);
        Ok(())
    } else {
        Err(JimakuError::Translation(format!(
            "Ollama model '{}' not found. Please pull the model first: ollama pull {}",
            model, model
        )))
    }
}
