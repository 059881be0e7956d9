//! On-disk storage for uploaded inputs and generated subtitles.
//!
//! Layout under the storage root:
//!
//! ```text
//! inputs/<job_id>/<filename>
//! outputs/<job_id>/<artifact>
//! ```

use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{JimakuError, Result};
use crate::registry::JobId;

pub struct Storage {
    inputs_dir: PathBuf,
    outputs_dir: PathBuf,
}

impl Storage {
    /// Open storage rooted at `root`, creating the directory layout.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        let inputs_dir = root.join("inputs");
        let outputs_dir = root.join("outputs");

        for dir in [&inputs_dir, &outputs_dir] {
            std::fs::create_dir_all(dir).map_err(|e| JimakuError::io_at(e, dir))?;
        }

        // Canonical so that prefix checks in read_output are meaningful.
        let outputs_dir = outputs_dir
            .canonicalize()
            .map_err(|e| JimakuError::io_at(e, &outputs_dir))?;

        Ok(Self {
            inputs_dir,
            outputs_dir,
        })
    }

    /// Reject names that could escape the job namespace.
    pub fn validate_filename(filename: &str) -> Result<()> {
        let invalid = |reason: &str| {
            Err(JimakuError::Validation(format!(
                "invalid filename '{}': {}",
                filename, reason
            )))
        };

        if filename.trim().is_empty() {
            return invalid("empty");
        }
        if filename.contains(['/', '\\', '\0']) {
            return invalid("path separators are not allowed");
        }
        if filename.chars().any(char::is_control) {
            return invalid("control characters are not allowed");
        }
        match Path::new(filename).components().next() {
            Some(Component::Normal(_)) => Ok(()),
            _ => invalid("not a plain file name"),
        }
    }

    pub async fn store_input(&self, job_id: &JobId, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        Self::validate_filename(filename)?;
        let path = self.inputs_dir.join(job_id.as_str()).join(filename);
        write_file(&path, bytes).await?;
        debug!("Stored input {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }

    pub async fn store_output(
        &self,
        job_id: &JobId,
        filename: &str,
        subtitle_text: &str,
    ) -> Result<PathBuf> {
        Self::validate_filename(filename)?;
        let path = self.outputs_dir.join(job_id.as_str()).join(filename);
        write_file(&path, subtitle_text.as_bytes()).await?;
        debug!("Stored output {}", path.display());
        Ok(path)
    }

    /// Read a previously stored artifact. Paths outside the outputs directory
    /// are reported as not found.
    pub async fn read_output(&self, path: &Path) -> Result<Vec<u8>> {
        let resolved = fs::canonicalize(path)
            .await
            .map_err(|e| JimakuError::io_at(e, path))?;

        if !resolved.starts_with(&self.outputs_dir) {
            return Err(JimakuError::NotFound(path.display().to_string()));
        }

        fs::read(&resolved)
            .await
            .map_err(|e| JimakuError::io_at(e, path))
    }

    /// Names of all stored artifacts as `<job_id>/<artifact>`, sorted.
    pub fn list_outputs(&self) -> Result<Vec<String>> {
        let mut outputs = Vec::new();

        for entry in WalkDir::new(&self.outputs_dir).min_depth(2).max_depth(2) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&self.outputs_dir).to_path_buf();
                match e.into_io_error() {
                    Some(io) => JimakuError::io_at(io, &path),
                    None => JimakuError::Io(std::io::Error::other(format!(
                        "filesystem loop at {}",
                        path.display()
                    ))),
                }
            })?;

            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&self.outputs_dir) {
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                outputs.push(name);
            }
        }

        outputs.sort();
        Ok(outputs)
    }

    pub fn outputs_dir(&self) -> &Path {
        &self.outputs_dir
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| JimakuError::io_at(e, parent))?;
    }
    fs::write(path, bytes)
        .await
        .map_err(|e| JimakuError::io_at(e, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use assert_fs::TempDir;

    #[tokio::test]
    async fn test_outputs_are_namespaced_per_job() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let first = JobId::new();
        let second = JobId::new();

        let a = storage.store_output(&first, "clip.mp4.srt", "one").await.unwrap();
        let b = storage.store_output(&second, "clip.mp4.srt", "two").await.unwrap();

        assert_ne!(a, b);
        assert_eq!(storage.read_output(&a).await.unwrap(), b"one");
        assert_eq!(storage.read_output(&b).await.unwrap(), b"two");

        let mut expected = vec![
            format!("{}/clip.mp4.srt", first),
            format!("{}/clip.mp4.srt", second),
        ];
        expected.sort();
        assert_eq!(storage.list_outputs().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_inputs_do_not_show_up_as_outputs() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let job = JobId::new();

        let path = storage.store_input(&job, "talk.wav", b"RIFF").await.unwrap();
        assert!(path.ends_with(format!("inputs/{}/talk.wav", job)));
        assert!(storage.list_outputs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_missing_output_is_not_found() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path()).unwrap();

        let missing = storage.outputs_dir().join("nope").join("x.srt");
        let err = storage.read_output(&missing).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_read_outside_outputs_is_not_found() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        let job = JobId::new();
        let input = storage.store_input(&job, "secret.txt", b"data").await.unwrap();

        let err = storage.read_output(&input).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_validate_filename() {
        assert!(Storage::validate_filename("movie.mp4").is_ok());
        assert!(Storage::validate_filename("with space.wav").is_ok());
        for bad in [
            "",
            "  ",
            "..",
            ".",
            "../etc/passwd",
            "a/b.wav",
            "a\\b.wav",
            "nul\0.wav",
            "split\r\nline.wav",
            "tab\t.wav",
            "bell\u{7}.wav",
        ] {
            let err = Storage::validate_filename(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ValidationFailure, "{:?}", bad);
        }
    }
}
