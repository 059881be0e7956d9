use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{JimakuError, Result};

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "jimaku.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub pipeline: PipelineConfig,
    pub transcriber: TranscriberConfig,
    pub translate: TranslateConfig,
    pub notify: NotifyConfig,
    pub retraining: RetrainingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP API listens on
    pub bind: String,
    /// Maximum accepted upload body size in bytes
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for uploaded inputs and generated subtitles
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Language code subtitles are translated into
    pub target_language: String,
    /// Maximum number of files processed concurrently
    pub workers: usize,
    /// Upper bound for a single transcription or translation call
    pub collaborator_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriberConfig {
    /// Path to transcriber binary (e.g., whisper-cli)
    pub binary_path: String,
    /// Path to the ggml model file
    pub model_path: PathBuf,
    /// Path to ffmpeg, used to extract 16kHz mono audio
    pub ffmpeg_path: String,
    /// Source language, or "auto" for detection
    pub language: String,
    /// Temperature for transcription
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslateConfig {
    /// Ollama endpoint URL
    pub endpoint: String,
    /// LLM model to use for translation
    pub model: String,
    /// Maximum retries for failed translations
    pub max_retries: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Settled jobs are POSTed here when set
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrainingConfig {
    /// Where ingested, human-corrected subtitles are collected
    pub dataset_dir: PathBuf,
    /// Training command; the dataset directory is appended as last argument
    pub command: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            max_upload_bytes: 512 * 1024 * 1024,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".jimaku/storage"),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_language: "zh".to_string(),
            workers: 2,
            collaborator_timeout_secs: 600,
        }
    }
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            binary_path: "whisper-cli".to_string(),
            model_path: PathBuf::from(".jimaku/models/ggml-medium.bin"),
            ffmpeg_path: "ffmpeg".to_string(),
            language: "auto".to_string(),
            temperature: 0.0,
        }
    }
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            max_retries: 3,
        }
    }
}

impl Default for RetrainingConfig {
    fn default() -> Self {
        Self {
            dataset_dir: PathBuf::from(".jimaku/dataset"),
            command: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.collaborator_timeout_secs)
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| JimakuError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| JimakuError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| JimakuError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| JimakuError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.workers == 0 {
            return Err(JimakuError::Config(
                "pipeline.workers must be at least 1".to_string(),
            ));
        }
        if self.pipeline.collaborator_timeout_secs == 0 {
            return Err(JimakuError::Config(
                "pipeline.collaborator_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.pipeline.target_language.trim().is_empty() {
            return Err(JimakuError::Config(
                "pipeline.target_language must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let file = dir.child("jimaku.toml");
        file.write_str("[pipeline]\nworkers = 8\ntarget_language = \"ja\"\n")
            .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.pipeline.workers, 8);
        assert_eq!(config.pipeline.target_language, "ja");
        assert_eq!(config.pipeline.collaborator_timeout_secs, 600);
        assert_eq!(config.translate.endpoint, "http://localhost:11434");
        assert!(config.notify.webhook_url.is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.child("out.toml");

        let mut config = Config::default();
        config.notify.webhook_url = Some("http://example.invalid/hook".to_string());
        config.save_to_file(path.path()).unwrap();

        let reloaded = Config::from_file(path.path()).unwrap();
        assert_eq!(reloaded.notify.webhook_url, config.notify.webhook_url);
        assert_eq!(reloaded.server.bind, config.server.bind);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let dir = TempDir::new().unwrap();
        let file = dir.child("jimaku.toml");
        file.write_str("[pipeline]\nworkers = 0\n").unwrap();

        assert!(matches!(
            Config::from_file(file.path()),
            Err(JimakuError::Config(_))
        ));
    }
}
