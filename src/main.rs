//! jimaku - job-oriented subtitle generation
//!
//! Entry point for the HTTP service and the local command-line tools built
//! on the same pipeline: whisper-cpp for transcription, ollama for
//! translation and ffmpeg for audio extraction.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{Level, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use jimaku::cli::{Args, Commands, split_list};
use jimaku::config::{Config, DEFAULT_CONFIG_FILE};
use jimaku::evaluate::evaluate_files;
use jimaku::http;
use jimaku::media::MediaCommandBuilder;
use jimaku::notify::WebhookNotifier;
use jimaku::registry::Status;
use jimaku::retrain::{CommandTrainer, RetrainRequest, RetrainingQueue, ingest_corrections};
use jimaku::service::{SubtitleService, UploadedFile};
use jimaku::transcribe::TranscriberFactory;
use jimaku::translate::{TranslatorFactory, check_ollama_availability};

/// Directory for logs, relative to the working directory
const DATA_DIR: &str = ".jimaku";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = setup_logging(args.verbose)?;

    let config = load_config(args.config.as_deref())?;

    match args.command {
        Commands::Serve { bind } => {
            let mut config = config;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            serve(config).await?;
        }
        Commands::Process {
            files,
            output_dir,
            target_lang,
            glossary,
        } => {
            let mut config = config;
            if let Some(lang) = target_lang {
                config.pipeline.target_language = lang;
            }
            let terms = glossary.as_deref().map(split_list).unwrap_or_default();
            process_files(config, &files, &output_dir, &terms).await?;
        }
        Commands::Evaluate {
            reference,
            hypothesis,
            output,
        } => {
            let report = evaluate_files(&reference, &hypothesis)?;
            println!("{}", report.summary());

            if let Some(output) = output {
                std::fs::write(&output, serde_json::to_string_pretty(&report)?)
                    .with_context(|| format!("Failed to write {}", output.display()))?;
                info!("Evaluation report written to {}", output.display());
            }
        }
        Commands::Ingest {
            corrections,
            dataset,
            no_retrain,
        } => {
            let dataset = dataset.unwrap_or_else(|| config.retraining.dataset_dir.clone());
            let ingested = ingest_corrections(&corrections, &dataset)?;
            println!("Ingested {} file(s) into {}", ingested.len(), dataset.display());

            if no_retrain {
                info!("Retraining skipped (--no-retrain)");
            } else if ingested.is_empty() {
                info!("Nothing new to train on");
            } else if config.retraining.command.is_empty() {
                warn!("retraining.command is not configured, skipping retraining");
            } else {
                let trainer = CommandTrainer::new(config.retraining.command.clone())?;
                let queue = RetrainingQueue::start(Arc::new(trainer));
                queue.submit(RetrainRequest::new(dataset, ingested))?;
                queue.finish().await;
            }
        }
        Commands::InitConfig { path } => {
            if path.exists() {
                bail!("{} already exists", path.display());
            }
            Config::default().save_to_file(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }
    }

    Ok(())
}

/// Explicit path, else `jimaku.toml` in the working directory, else defaults.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            info!("Found {} in current directory, loading...", DEFAULT_CONFIG_FILE);
            Config::from_file(DEFAULT_CONFIG_FILE)?
        }
        None => Config::default(),
    };
    Ok(config)
}

fn build_service(config: &Config) -> Result<Arc<SubtitleService>> {
    let transcriber = Arc::from(TranscriberFactory::create_default(config.transcriber.clone()));
    let translator = Arc::from(TranslatorFactory::create_default(config.translate.clone())?);
    Ok(Arc::new(SubtitleService::new(config, transcriber, translator)?))
}

/// Warn early about missing collaborators instead of failing every job.
async fn preflight(config: &Config) {
    let ffmpeg = MediaCommandBuilder::new(&config.transcriber.ffmpeg_path).version_check();
    if let Err(e) = ffmpeg.execute().await {
        warn!("ffmpeg is not usable, transcription will fail: {}", e);
    }
    if !config.transcriber.model_path.exists() {
        warn!(
            "Whisper model not found at {}",
            config.transcriber.model_path.display()
        );
    }
    if let Err(e) = check_ollama_availability(&config.translate.endpoint, &config.translate.model).await
    {
        warn!("{}", e);
    }
}

async fn serve(config: Config) -> Result<()> {
    preflight(&config).await;
    let service = build_service(&config)?;

    let notifier = match &config.notify.webhook_url {
        Some(url) => Some(WebhookNotifier::new(url.clone())?.spawn(Arc::clone(&service))),
        None => None,
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received");
    };
    http::serve(Arc::clone(&service), &config.server, shutdown).await?;

    service.shutdown().await;
    if let Some(notifier) = notifier {
        notifier.abort();
    }
    info!("jimaku stopped");
    Ok(())
}

async fn process_files(config: Config, files: &[PathBuf], output_dir: &Path, glossary: &[String]) -> Result<()> {
    preflight(&config).await;
    let service = build_service(&config)?;
    if !glossary.is_empty() {
        service.add_glossary_terms(glossary, None);
    }

    let mut uploads = Vec::with_capacity(files.len());
    for path in files {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", path.display()))?;
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        uploads.push(UploadedFile::new(name, bytes));
    }

    let receipt = service.upload(uploads).await?;
    info!("Processing {} file(s) as job {}", files.len(), receipt.job_id);

    // Two collaborator calls per file, plus slack for storage
    let budget = config.pipeline.collaborator_timeout() * 2 * files.len() as u32 + Duration::from_secs(60);
    let job = service.wait_until_settled(&receipt.job_id, budget).await?;

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let mut failed = 0;
    for task in &job.tasks {
        match (task.status, task.artifact_name()) {
            (Status::Completed, Some(artifact)) => {
                let bytes = service.download(&job.id, &artifact).await?;
                let destination = output_dir.join(&artifact);
                std::fs::write(&destination, bytes)
                    .with_context(|| format!("Failed to write {}", destination.display()))?;
                println!("{} -> {}", task.filename, destination.display());
            }
            _ => {
                failed += 1;
                match &task.error {
                    Some(error) => println!("{} failed: {}", task.filename, error),
                    None => println!("{} did not finish ({:?})", task.filename, task.status),
                }
            }
        }
    }

    service.shutdown().await;

    if failed > 0 {
        bail!("{} of {} file(s) failed", failed, job.tasks.len());
    }
    Ok(())
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<WorkerGuard> {
    let log_dir = std::env::current_dir()?.join(DATA_DIR).join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Daily rotation
    let file_appender = rolling::daily(&log_dir, "jimaku.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("jimaku.log").display()
    );

    Ok(guard)
}
