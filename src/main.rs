//! CLI entry point for the mediafetch tool.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mediafetch_core::{
    ConfigError, FileConfig, FlatNamer, HttpChunkSource, JsonMessageSource, Pipeline,
    PipelineError, RunSummary, SourceError, load_default_file_config, load_file_config,
};
use tracing::{debug, error, info, warn};

mod cli;

use cli::Args;

/// Exit code when the run stopped on a failed transfer.
const EXIT_HALTED: u8 = 1;

/// Exit code for configuration and input errors.
const EXIT_CONFIG: u8 = 2;

/// Marks errors raised while setting up the run.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct SetupError(String);

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    // Not the whole struct: it holds the bearer token.
    debug!(
        messages = %args.messages.display(),
        remote = %args.remote,
        config = ?args.config,
        "CLI arguments parsed"
    );

    match run(args).await {
        Ok(summary) if summary.halted => {
            for failure in &summary.failures {
                error!(
                    job_id = failure.job_id,
                    attempts = failure.attempts,
                    error = %failure.error,
                    "transfer failed"
                );
            }
            warn!(cursor = summary.cursor, "run halted; re-run to resume");
            ExitCode::from(EXIT_HALTED)
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

async fn run(args: Args) -> Result<RunSummary> {
    let file_config = load_config(&args)?;
    let (connect_timeout, request_timeout) = Args::timeouts(file_config.as_ref());
    let config = args.run_config(file_config.as_ref());

    let mut remote = HttpChunkSource::with_timeouts(&args.remote, connect_timeout, request_timeout)
        .map_err(|e| SetupError(e.to_string()))?;
    if let Some(token) = &args.token {
        remote = remote.with_token(token.clone());
    }

    let messages = JsonMessageSource::open(&args.messages).await?;
    info!(
        export = %args.messages.display(),
        messages = messages.len(),
        scope = %config.scope,
        "mediafetch starting"
    );

    let namer = FlatNamer::new(config.output_dir.clone());
    let pipeline = Pipeline::new(
        config,
        Arc::new(messages),
        Arc::new(namer),
        Arc::new(remote),
    )?;

    let summary = pipeline.run().await.context("run aborted")?;
    debug!(
        messages = summary.messages,
        retried = summary.retried,
        ignored = summary.ignored,
        "run totals"
    );
    Ok(summary)
}

fn load_config(args: &Args) -> Result<Option<FileConfig>, ConfigError> {
    match &args.config {
        Some(path) => load_file_config(path).map(Some),
        None => load_default_file_config(),
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    let is_setup = err.chain().any(|cause| {
        cause.is::<SetupError>()
            || cause.is::<ConfigError>()
            || cause.is::<SourceError>()
            || matches!(
                cause.downcast_ref::<PipelineError>(),
                Some(PipelineError::Config(_) | PipelineError::Scheduler(_))
            )
    });
    if is_setup { EXIT_CONFIG } else { EXIT_HALTED }
}
