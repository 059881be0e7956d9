use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JimakuError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Translation error: {0}")]
    Translation(String),

    #[error("Media processing error: {0}")]
    Media(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Subtitle parse error at line {line}: {message}")]
    SubtitleParse { line: usize, message: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Client-facing classification of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    IoFailure,
    CollaboratorFailure,
    ValidationFailure,
    Cancelled,
}

impl JimakuError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorKind::NotFound,
                std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
                _ => ErrorKind::IoFailure,
            },
            Self::JobNotFound(_) | Self::NotFound(_) => ErrorKind::NotFound,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::Http(_)
            | Self::Transcription(_)
            | Self::Translation(_)
            | Self::Media(_)
            | Self::Training(_) => ErrorKind::CollaboratorFailure,
            Self::Validation(_) | Self::SubtitleParse { .. } => ErrorKind::ValidationFailure,
            Self::Json(_) | Self::Toml(_) | Self::Config(_) => ErrorKind::IoFailure,
        }
    }

    /// Wrap an I/O error with the path it happened on, keeping its classification.
    pub fn io_at(err: std::io::Error, path: &std::path::Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.display().to_string()),
            std::io::ErrorKind::PermissionDenied => {
                Self::PermissionDenied(path.display().to_string())
            }
            kind => Self::Io(std::io::Error::new(
                kind,
                format!("{}: {}", path.display(), err),
            )),
        }
    }
}

pub type Result<T> = std::result::Result<T, JimakuError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_io_errors_are_classified_by_kind() {
        let missing = JimakuError::io_at(
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
            Path::new("/tmp/x"),
        );
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        let denied = JimakuError::io_at(
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"),
            Path::new("/tmp/x"),
        );
        assert_eq!(denied.kind(), ErrorKind::PermissionDenied);

        let other = JimakuError::io_at(
            std::io::Error::new(std::io::ErrorKind::Other, "disk on fire"),
            Path::new("/tmp/x"),
        );
        assert_eq!(other.kind(), ErrorKind::IoFailure);
        assert!(other.to_string().contains("/tmp/x"));
    }

    #[test]
    fn test_collaborator_errors() {
        assert_eq!(
            JimakuError::Transcription("timeout".into()).kind(),
            ErrorKind::CollaboratorFailure
        );
        assert_eq!(
            JimakuError::JobNotFound("abc".into()).kind(),
            ErrorKind::NotFound
        );
    }
}
