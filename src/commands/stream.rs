//! Convert one source directly to stdout or a file.

use std::path::PathBuf;

use clap::Args;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use audiodrop_converter::StreamStart;
use audiodrop_core::config::AppConfig;
use audiodrop_core::error::AppError;

use super::RequestArgs;
use crate::engine::Engine;
use crate::output;

/// Arguments for the stream command
#[derive(Debug, Args)]
pub struct StreamArgs {
    /// Source URL or video ID
    pub url: String,

    #[command(flatten)]
    pub request: RequestArgs,

    /// Write to this file instead of stdout; a directory gets the
    /// title-based filename
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Execute the stream command
pub async fn execute(args: &StreamArgs, config: AppConfig) -> Result<(), AppError> {
    let engine = Engine::start(&config, false).await?;
    let result = stream(&engine, args).await;
    engine.shutdown().await;
    result
}

async fn stream(engine: &Engine, args: &StreamArgs) -> Result<(), AppError> {
    let start = engine
        .orchestrator
        .prepare_stream(args.request.request(&args.url))
        .await
        .map_err(|e| {
            tracing::debug!("Stream refused: {}", e);
            AppError::from(e)
        })?;

    let session = match start {
        StreamStart::Ready(session) => session,
        StreamStart::InFlight { job_id } => {
            return Err(AppError::conflict(format!(
                "This source is already being converted (job {job_id})"
            )));
        }
    };
    if let Some(notice) = session.quality_notice() {
        output::print_warning(notice);
    }

    let mut sink: Box<dyn AsyncWrite + Unpin + Send> = match &args.output {
        Some(path) => {
            let path = if path.is_dir() {
                path.join(session.filename())
            } else {
                path.clone()
            };
            eprintln!("Writing '{}' to {}", session.title(), path.display());
            Box::new(tokio::fs::File::create(&path).await?)
        }
        None => Box::new(tokio::io::stdout()),
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let result = session.run(sink.as_mut(), cancel).await;
    interrupt.abort();

    match result {
        Ok(bytes) => {
            eprintln!("✓ {} written", output::format_bytes(bytes));
            Ok(())
        }
        Err(e) => {
            tracing::debug!("Stream failed: {}", e);
            Err(AppError::external_service(e.user_message()))
        }
    }
}
