use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use orchestration::hybrid::{
    ProcessingObserver, ProcessingOutcome, ProcessingRequest, ProgressEvent, RequestOptions,
};
use orchestration::payload::FileAttachment;
use orchestration::strategy::{PreferredMethod, Strategy};
use orchestration::ProcessingError;
use tracing::{info, warn};
use transcript_analyzer::config::AnalyzerConfig;
use transcript_analyzer::wiring;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze transcripts and print the records as JSON
    Analyze {
        /// Transcript files (PDF or images)
        files: Vec<PathBuf>,

        /// Prompt text
        #[arg(long, conflicts_with = "prompt_file")]
        prompt: Option<String>,

        /// Read the prompt from a file
        #[arg(long)]
        prompt_file: Option<PathBuf>,

        /// auto, direct, chunked or fallback
        #[arg(long, default_value = "auto")]
        method: PreferredMethod,

        /// Subjects to fetch historical patterns for (repeatable)
        #[arg(long = "subject")]
        subjects: Vec<String>,

        /// Programme the results are recorded against
        #[arg(long)]
        programme: Option<String>,

        /// Files per server-side chunk (overrides the configured size)
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Return after the first chunk; `status` runs the remaining chunks
        #[arg(long, default_value_t = false)]
        detach: bool,

        /// Client-side key for the fallback path (overrides GEMINI_FALLBACK_API_KEY)
        #[arg(long)]
        fallback_key: Option<String>,
    },

    /// Print the status of a chunked job
    Status {
        job_id: String,
    },

    /// Show which strategy would be used for these files
    Recommend {
        files: Vec<PathBuf>,

        #[arg(long, default_value = "")]
        prompt: String,
    },

    /// Remove expired jobs from the job store
    Purge,
}

/// Logs orchestration events as they happen
struct LogObserver;

impl ProcessingObserver for LogObserver {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::StrategySelected { strategy, rationale } => {
                info!(strategy = %strategy, %rationale, "Strategy selected")
            }
            ProgressEvent::JobSubmitted { job_id, progress } => info!(
                %job_id,
                completed = progress.completed,
                total = progress.total,
                "Job submitted"
            ),
            ProgressEvent::JobProgress {
                job_id, progress, ..
            } => info!(%job_id, percentage = progress.percentage, "Job progress"),
            ProgressEvent::JobFinished(snapshot) => {
                info!(job_id = %snapshot.job_id, results = snapshot.results.len(), "Job finished")
            }
            ProgressEvent::JobFailed { job_id, error } => warn!(%job_id, %error, "Job polling failed"),
            ProgressEvent::FallbackChunk { index, total } => {
                info!(chunk = index + 1, total, "Client-side chunk done")
            }
            ProgressEvent::CoolingDown { delay } => {
                info!(delay_ms = delay.as_millis() as u64, "Rate limited, cooling down")
            }
            ProgressEvent::Escalating { from, to, reason } => {
                warn!(from = %from, to = %to, %reason, "Escalating")
            }
        }
    }

    fn on_fallback(&self, error: &ProcessingError, target: Strategy) {
        warn!(error = %error, target = %target, "Switching strategy");
    }
}

fn mime_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

fn read_files(paths: &[PathBuf]) -> Result<Vec<FileAttachment>> {
    paths
        .iter()
        .map(|path| {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            Ok(FileAttachment::from_bytes(name, mime_type(path), bytes))
        })
        .collect()
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = AnalyzerConfig::default();
    if let Command::Analyze {
        fallback_key: Some(key),
        ..
    } = &args.command
    {
        config = config.with_fallback_key(key.clone());
    }
    if let Command::Analyze { detach: true, .. } = &args.command {
        if config.job_store.is_none() {
            bail!("--detach needs a shared job store (JOB_STORE_URL) so `status` can finish the job later");
        }
    }
    let settings = config.orchestration()?;
    let orchestrator = wiring::build(&config, &settings).await?;

    match args.command {
        Command::Analyze {
            files,
            prompt,
            prompt_file,
            method,
            subjects,
            programme,
            chunk_size,
            detach,
            ..
        } => {
            let prompt = match (prompt, prompt_file) {
                (Some(prompt), _) => prompt,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read prompt from {}", path.display()))?,
                (None, None) => bail!("either --prompt or --prompt-file is required"),
            };
            let request = ProcessingRequest::new(prompt, read_files(&files)?).with_options(
                RequestOptions {
                    preferred: Some(method),
                    chunk_size,
                    await_completion: !detach,
                    subjects,
                    programme_context: programme,
                    observer: Some(Arc::new(LogObserver)),
                    ..RequestOptions::default()
                },
            );

            let outcome: ProcessingOutcome = orchestrator
                .processor
                .process(request)
                .await
                .context("Analysis failed")?;
            info!(
                strategy = %outcome.strategy,
                processing_type = %outcome.processing_type,
                results = outcome.results.len(),
                elapsed_ms = outcome.processing_time.as_millis() as u64,
                "Analysis complete"
            );
            print_json(&outcome)?;
        }
        Command::Status { job_id } => {
            let Some(executor) = &orchestrator.executor else {
                bail!("job status needs GEMINI_API_KEY and a shared job store (JOB_STORE_URL)");
            };
            let snapshot = executor
                .resume(&job_id)
                .await
                .with_context(|| format!("Failed to get status for {job_id}"))?;
            print_json(&snapshot)?;
        }
        Command::Recommend { files, prompt } => {
            let recommendation = orchestrator
                .processor
                .recommend(&read_files(&files)?, &prompt)
                .await?;
            print_json(&recommendation)?;
        }
        Command::Purge => {
            let Some(executor) = &orchestrator.executor else {
                bail!("purge needs GEMINI_API_KEY and a shared job store (JOB_STORE_URL)");
            };
            let purged = executor.purge_expired().await?;
            info!(purged, "Expired jobs purged");
        }
    }

    if let Some(polling) = &orchestrator.polling {
        polling.stop_all();
    }
    log_statistics(&orchestrator.processor).await;
    Ok(())
}

async fn log_statistics(processor: &orchestration::HybridProcessor) {
    let status = processor.status().await;
    info!(
        total = status.statistics.total_processed,
        escalations = status.statistics.escalations,
        fallback_ready = status.available.fallback,
        "Processor statistics"
    );
}
