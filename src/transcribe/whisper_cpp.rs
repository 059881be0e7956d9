use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

use super::Transcriber;
use crate::config::TranscriberConfig;
use crate::error::{JimakuError, Result};
use crate::media::MediaCommandBuilder;
use crate::subtitle::Segment;

// Structs for parsing whisper.cpp JSON output (`-oj`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppOutput {
    pub result: WhisperCppResult,
    pub transcription: Vec<WhisperCppSegment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppResult {
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppSegment {
    pub offsets: WhisperCppOffsets,
    pub text: String,
}

/// Segment bounds in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhisperCppOffsets {
    pub from: i64,
    pub to: i64,
}

impl WhisperCppOutput {
    /// Non-empty segments with times converted to seconds
    pub fn into_segments(self) -> Vec<Segment> {
        self.transcription
            .into_iter()
            .filter(|seg| !seg.text.trim().is_empty())
            .map(|seg| Segment {
                start: seg.offsets.from.max(0) as f64 / 1000.0,
                end: seg.offsets.to.max(0) as f64 / 1000.0,
                text: seg.text.trim().to_string(),
            })
            .collect()
    }
}

/// whisper.cpp command line transcriber
pub struct WhisperCppTranscriber {
    config: TranscriberConfig,
    media: MediaCommandBuilder,
}

impl WhisperCppTranscriber {
    pub fn new(config: TranscriberConfig) -> Self {
        let media = MediaCommandBuilder::new(&config.ffmpeg_path);
        Self { config, media }
    }

    fn build_command(&self, audio_path: &Path, output_base: &Path, glossary_hints: &[String]) -> Command {
        let mut cmd = Command::new(&self.config.binary_path);
        cmd.arg("-m")
            .arg(&self.config.model_path)
            .arg("-f")
            .arg(audio_path)
            .arg("-l")
            .arg(&self.config.language)
            .arg("-tp")
            .arg(self.config.temperature.to_string())
            .arg("-oj")
            .arg("-of")
            .arg(output_base)
            .kill_on_drop(true);

        if !glossary_hints.is_empty() {
            cmd.arg("--prompt").arg(glossary_hints.join(", "));
        }

        cmd
    }
}

#[async_trait]
impl Transcriber for WhisperCppTranscriber {
    async fn transcribe(&self, media_path: &Path, glossary_hints: &[String]) -> Result<Vec<Segment>> {
        info!("Transcribing {}", media_path.display());

        let work_dir = tempfile::tempdir()
            .map_err(|e| JimakuError::Transcription(format!("Failed to create temp directory: {}", e)))?;
        let audio_path = work_dir.path().join("audio.wav");
        let output_base = work_dir.path().join("transcript");

        self.media.extract_audio(media_path, &audio_path).execute().await?;

        let output = self
            .build_command(&audio_path, &output_base, glossary_hints)
            .output()
            .await
            .map_err(|e| JimakuError::Transcription(format!("Failed to execute {}: {}", self.config.binary_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(JimakuError::Transcription(format!(
                "whisper.cpp failed: {}",
                stderr.trim()
            )));
        }

        let json_file = output_base.with_extension("json");
        let json_content = tokio::fs::read_to_string(&json_file)
            .await
            .map_err(|e| JimakuError::Transcription(format!("Failed to read output: {}", e)))?;

        let whisper_output: WhisperCppOutput = serde_json::from_str(&json_content)
            .map_err(|e| JimakuError::Transcription(format!("Failed to parse whisper.cpp JSON: {}", e)))?;

        debug!("Detected language: {}", whisper_output.result.language);
        let segments = whisper_output.into_segments();
        info!("Transcribed {} segment(s) from {}", segments.len(), media_path.display());
        Ok(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_whisper_cpp_json() {
        let json = r#"{
            "result": {"language": "en"},
            "transcription": [
                {"timestamps": {"from": "00:00:00,000", "to": "00:00:02,500"},
                 "offsets": {"from": 0, "to": 2500}, "text": " Hello world"},
                {"timestamps": {"from": "00:00:02,500", "to": "00:00:03,000"},
                 "offsets": {"from": 2500, "to": 3000}, "text": "   "},
                {"timestamps": {"from": "00:00:03,000", "to": "00:00:04,250"},
                 "offsets": {"from": 3000, "to": 4250}, "text": "Second line "}
            ]
        }"#;

        let output: WhisperCppOutput = serde_json::from_str(json).unwrap();
        assert_eq!(output.result.language, "en");

        let segments = output.into_segments();
        assert_eq!(
            segments,
            vec![
                Segment::new(0.0, 2.5, "Hello world"),
                Segment::new(3.0, 4.25, "Second line"),
            ]
        );
    }

    #[test]
    fn test_command_passes_glossary_as_prompt() {
        let transcriber = WhisperCppTranscriber::new(TranscriberConfig::default());
        let hints = vec!["Acme".to_string(), "Shibuya".to_string()];

        let cmd = transcriber.build_command(Path::new("a.wav"), Path::new("out"), &hints);
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.windows(2).any(|w| w == ["--prompt", "Acme, Shibuya"]));

        let cmd = transcriber.build_command(Path::new("a.wav"), Path::new("out"), &[]);
        assert!(!cmd.as_std().get_args().any(|a| a == "--prompt"));
    }
}
