use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API and worker pool
    Serve {
        /// Address to listen on, overriding server.bind
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Generate subtitles for local files as one job
    Process {
        /// Input audio or video files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Directory the generated SRT files are copied to
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// Target language, overriding pipeline.target_language
        #[arg(short, long)]
        target_lang: Option<String>,

        /// Glossary terms to use as hints (comma-separated)
        #[arg(short, long)]
        glossary: Option<String>,
    },

    /// Score a subtitle file against a reference
    Evaluate {
        /// Human reference SRT
        #[arg(short, long)]
        reference: PathBuf,

        /// Generated SRT to score
        #[arg(long)]
        hypothesis: PathBuf,

        /// Write the report as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Ingest human-corrected subtitles and trigger retraining
    Ingest {
        /// Directory containing corrected SRT files
        #[arg(long)]
        corrections: PathBuf,

        /// Dataset directory, overriding retraining.dataset_dir
        #[arg(short, long)]
        dataset: Option<PathBuf>,

        /// Only copy files, do not trigger retraining
        #[arg(long)]
        no_retrain: bool,
    },

    /// Write the default configuration to a file
    InitConfig {
        /// Destination path
        #[arg(short, long, default_value = "jimaku.toml")]
        path: PathBuf,
    },
}

/// Split a comma-separated list, dropping blank items
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
