//! Wires the store, queue, orchestrator and background tasks together.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use audiodrop_converter::{FfmpegTranscoder, Orchestrator, YtDlpResolver};
use audiodrop_core::config::AppConfig;
use audiodrop_core::error::AppError;
use audiodrop_core::types::SystemClock;
use audiodrop_store::{EphemeralStore, spawn_sweeper};
use audiodrop_worker::{CleanupScheduler, JobExecutor, QueueEngine, WorkerRunner};

/// A running engine.
pub struct Engine {
    /// Job queue shared by every component.
    pub queue: Arc<QueueEngine>,
    /// Conversion entry point for commands.
    pub orchestrator: Orchestrator,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    scheduler: Option<CleanupScheduler>,
}

impl Engine {
    /// Build every component from `config`.
    ///
    /// With `run_worker` the dequeue loop and maintenance schedules are
    /// started; without it only direct operations (probe, stream) work.
    pub async fn start(config: &AppConfig, run_worker: bool) -> Result<Self, AppError> {
        tracing::info!("Starting Audiodrop v{}", env!("CARGO_PKG_VERSION"));

        let store = EphemeralStore::shared(&config.store);
        let queue = Arc::new(QueueEngine::new(
            store.clone(),
            config.queue.clone(),
            Arc::new(SystemClock),
        ));
        let orchestrator = Orchestrator::new(
            queue.clone(),
            Arc::new(YtDlpResolver::from_config(&config.conversion)),
            Arc::new(FfmpegTranscoder::from_config(&config.conversion)),
            config.conversion.clone(),
        );

        tokio::fs::create_dir_all(&config.conversion.downloads_dir)
            .await
            .map_err(|e| {
                AppError::storage(format!(
                    "Failed to create '{}': {}",
                    config.conversion.downloads_dir, e
                ))
            })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = vec![spawn_sweeper(
            store,
            Duration::from_secs(config.store.sweep_interval_seconds),
            shutdown_rx.clone(),
        )];

        let mut scheduler = None;
        if run_worker {
            let executor = Arc::new(JobExecutor::new(
                queue.clone(),
                Arc::new(orchestrator.clone()),
            ));
            let runner = WorkerRunner::new(
                queue.clone(),
                executor,
                config.queue.clone(),
                format!("audiodrop-{}", std::process::id()),
            );
            let rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move { runner.run(rx).await }));

            if config.scheduler.enabled {
                let cron =
                    CleanupScheduler::new(Arc::new(orchestrator.clone()), config.scheduler.clone())
                        .await?;
                cron.register_default_tasks().await?;
                cron.start().await?;
                scheduler = Some(cron);
            }
        }

        Ok(Self {
            queue,
            orchestrator,
            shutdown_tx,
            tasks,
            scheduler,
        })
    }

    /// Stop background tasks and wait for them.
    pub async fn shutdown(self) {
        tracing::info!("Shutting down");
        let _ = self.shutdown_tx.send(true);

        if let Some(scheduler) = &self.scheduler
            && let Err(e) = scheduler.shutdown().await
        {
            tracing::warn!("Scheduler shutdown failed: {}", e);
        }
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!("Background task ended abnormally: {}", e);
            }
        }
        tracing::info!("Shutdown complete");
    }
}
