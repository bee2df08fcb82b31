//! Queue conversions and wait for them to settle.

use std::time::Duration;

use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use audiodrop_core::config::AppConfig;
use audiodrop_core::error::AppError;
use audiodrop_core::events::JobEvent;
use audiodrop_core::job::{Job, JobStatus};

use super::RequestArgs;
use crate::engine::Engine;
use crate::output::{self, OutputFormat};

/// Arguments for the convert command
#[derive(Debug, Args)]
pub struct ConvertArgs {
    /// Source URLs or video IDs
    #[arg(required = true)]
    pub urls: Vec<String>,

    #[command(flatten)]
    pub request: RequestArgs,

    /// Lower values are converted first
    #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
    pub priority: i64,

    /// Print service statistics after the run
    #[arg(long)]
    pub stats: bool,
}

/// Job display row
#[derive(Debug, Serialize, Tabled)]
struct JobRow {
    /// Job ID
    id: String,
    /// Status
    status: String,
    /// Title
    title: String,
    /// Quality
    quality: String,
    /// Artifact size
    size: String,
    /// Artifact path or failure message
    detail: String,
}

impl From<&Job> for JobRow {
    fn from(job: &Job) -> Self {
        let (quality, size, detail) = match &job.result {
            Some(result) => (
                result.quality.to_string(),
                output::format_bytes(result.size_bytes),
                result.path.clone(),
            ),
            None => (
                job.payload.quality.to_string(),
                "-".to_string(),
                job.error_message.clone().unwrap_or_default(),
            ),
        };
        Self {
            id: job.id.clone(),
            status: job.status.to_string(),
            title: job.title.clone().unwrap_or_else(|| job.payload.source_url.clone()),
            quality,
            size,
            detail,
        }
    }
}

/// Execute the convert command
pub async fn execute(
    args: &ConvertArgs,
    config: AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let engine = Engine::start(&config, true).await?;
    let subscription = engine.queue.subscribe(|event| match event {
        JobEvent::Progress { job_id, progress } => {
            tracing::info!(job_id = %job_id, progress, "Conversion progress")
        }
        JobEvent::Retrying {
            job_id, attempts, ..
        } => tracing::info!(job_id = %job_id, attempts, "Conversion will be retried"),
        _ => {}
    });

    let mut job_ids = Vec::new();
    let mut rejected = 0;
    for url in &args.urls {
        let mut request = args.request.request(url);
        request.priority = args.priority;
        match engine.orchestrator.create_job(request) {
            Ok(submission) => {
                if submission.existing {
                    output::print_warning(&format!(
                        "{} is already being converted as job {}",
                        url, submission.job_id
                    ));
                }
                if !job_ids.contains(&submission.job_id) {
                    job_ids.push(submission.job_id);
                }
            }
            Err(e) => {
                tracing::debug!("Rejected '{}': {}", url, e);
                output::print_error(&format!("{}: {}", url, e.user_message()));
                rejected += 1;
            }
        }
    }

    let outcome = tokio::select! {
        jobs = wait_for(&engine, &job_ids) => jobs,
        _ = tokio::signal::ctrl_c() => {
            output::print_warning("Interrupted, stopping");
            collect(&engine, &job_ids)
        }
    };

    let jobs = match outcome {
        Ok(jobs) => jobs,
        Err(e) => {
            engine.queue.unsubscribe(subscription);
            engine.shutdown().await;
            return Err(e);
        }
    };
    let rows: Vec<JobRow> = jobs.iter().map(JobRow::from).collect();
    output::print_list(&rows, format);

    if args.stats {
        let stats = engine.orchestrator.get_stats().await?;
        output::print_json(&stats);
    }

    engine.queue.unsubscribe(subscription);
    engine.shutdown().await;

    let failed = jobs.iter().filter(|j| j.status != JobStatus::Done).count() + rejected;
    if failed > 0 {
        return Err(AppError::external_service(format!(
            "{} of {} conversions did not complete",
            failed,
            args.urls.len()
        )));
    }
    Ok(())
}

async fn wait_for(engine: &Engine, job_ids: &[String]) -> Result<Vec<Job>, AppError> {
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        ticker.tick().await;
        let jobs = collect(engine, job_ids)?;
        if jobs.iter().all(Job::is_terminal) {
            return Ok(jobs);
        }
    }
}

fn collect(engine: &Engine, job_ids: &[String]) -> Result<Vec<Job>, AppError> {
    let mut jobs = Vec::with_capacity(job_ids.len());
    for id in job_ids {
        if let Some(job) = engine.queue.get_job(id)? {
            jobs.push(job);
        }
    }
    Ok(jobs)
}
