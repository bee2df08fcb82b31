//! Resolve a source without converting it.

use clap::Args;

use audiodrop_core::config::AppConfig;
use audiodrop_core::error::AppError;

use crate::engine::Engine;
use crate::output::{self, OutputFormat};

/// Arguments for the probe command
#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Source URL or video ID
    pub url: String,

    /// Quality to evaluate
    #[arg(short, long)]
    pub quality: Option<String>,
}

/// Execute the probe command
pub async fn execute(
    args: &ProbeArgs,
    config: AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let engine = Engine::start(&config, false).await?;
    let result = engine
        .orchestrator
        .probe(&args.url, args.quality.as_deref())
        .await;
    engine.shutdown().await;

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            tracing::debug!("Probe failed: {}", e);
            return Err(AppError::validation(e.user_message()));
        }
    };

    match format {
        OutputFormat::Json => output::print_json(&report),
        OutputFormat::Table => {
            println!("{}", report.metadata.title);
            output::print_kv("Source", &report.source_id);
            output::print_kv("Duration", &report.metadata.duration_formatted);
            if let Some(uploader) = &report.metadata.uploader {
                output::print_kv("Uploader", uploader);
            }
            if let Some(views) = report.metadata.view_count {
                output::print_kv("Views", &views.to_string());
            }
            output::print_kv("Quality", report.decision.effective.as_str());
            output::print_kv(
                "Estimated size",
                &output::format_bytes(report.estimated_size_bytes),
            );
            if let Some(notice) = &report.decision.message {
                output::print_warning(notice);
            }
        }
    }
    Ok(())
}
