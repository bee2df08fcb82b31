//! Cron scheduler for periodic job reclamation.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};

use audiodrop_core::config::scheduler::SchedulerConfig;
use audiodrop_core::error::AppError;
use audiodrop_core::result::AppResult;

use crate::queue::QueueEngine;

/// Periodic reclamation work.
///
/// The queue engine implements this by dropping records only; higher layers
/// that own artifacts implement it to delete files as well.
#[async_trait]
pub trait Maintenance: Send + Sync {
    /// Remove jobs past their expiry. Returns how many were removed.
    async fn purge_expired(&self) -> AppResult<usize>;

    /// Remove terminal jobs older than `max_age_hours`.
    async fn cleanup_old(&self, max_age_hours: u64) -> AppResult<usize>;
}

#[async_trait]
impl Maintenance for QueueEngine {
    async fn purge_expired(&self) -> AppResult<usize> {
        Ok(self.purge_expired_jobs()?.len())
    }

    async fn cleanup_old(&self, max_age_hours: u64) -> AppResult<usize> {
        self.cleanup_old_jobs(max_age_hours)
    }
}

/// Cron-based scheduler for purge and cleanup
pub struct CleanupScheduler {
    /// The underlying job scheduler
    scheduler: JobScheduler,
    /// Target of the periodic work
    target: Arc<dyn Maintenance>,
    /// Schedules
    config: SchedulerConfig,
}

impl std::fmt::Debug for CleanupScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupScheduler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CleanupScheduler {
    /// Create a new cron scheduler
    pub async fn new(target: Arc<dyn Maintenance>, config: SchedulerConfig) -> AppResult<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::internal(format!("Failed to create scheduler: {}", e)))?;

        Ok(Self {
            scheduler,
            target,
            config,
        })
    }

    /// Register the purge and cleanup tasks
    pub async fn register_default_tasks(&self) -> AppResult<()> {
        self.register_purge().await?;
        self.register_cleanup().await?;

        tracing::info!("All scheduled tasks registered");
        Ok(())
    }

    /// Start the scheduler
    pub async fn start(&self) -> AppResult<()> {
        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::internal(format!("Failed to start scheduler: {}", e)))?;

        tracing::info!("Cron scheduler started");
        Ok(())
    }

    /// Shutdown the scheduler
    pub async fn shutdown(&self) -> AppResult<()> {
        let mut scheduler = self.scheduler.clone();
        scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::internal(format!("Failed to shutdown scheduler: {}", e)))?;

        tracing::info!("Cron scheduler shut down");
        Ok(())
    }

    /// Expired job purge
    async fn register_purge(&self) -> AppResult<()> {
        let target = Arc::clone(&self.target);
        let job = CronJob::new_async(self.config.purge_cron.as_str(), move |_uuid, _lock| {
            let target = Arc::clone(&target);
            Box::pin(async move {
                match target.purge_expired().await {
                    Ok(0) => tracing::trace!("Purge found nothing to remove"),
                    Ok(n) => tracing::debug!("Purged {} expired jobs", n),
                    Err(e) => tracing::error!("Expired job purge failed: {}", e),
                }
            })
        })
        .map_err(|e| AppError::configuration(format!("Invalid purge schedule: {}", e)))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| AppError::internal(format!("Failed to add purge schedule: {}", e)))?;

        tracing::info!("Registered: purge_expired ({})", self.config.purge_cron);
        Ok(())
    }

    /// Age-based cleanup of terminal jobs
    async fn register_cleanup(&self) -> AppResult<()> {
        let target = Arc::clone(&self.target);
        let max_age_hours = self.config.cleanup_max_age_hours;
        let job = CronJob::new_async(self.config.cleanup_cron.as_str(), move |_uuid, _lock| {
            let target = Arc::clone(&target);
            Box::pin(async move {
                match target.cleanup_old(max_age_hours).await {
                    Ok(n) => tracing::debug!("Cleanup removed {} jobs", n),
                    Err(e) => tracing::error!("Job cleanup failed: {}", e),
                }
            })
        })
        .map_err(|e| AppError::configuration(format!("Invalid cleanup schedule: {}", e)))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| AppError::internal(format!("Failed to add cleanup schedule: {}", e)))?;

        tracing::info!(
            "Registered: cleanup_old_jobs ({}, older than {}h)",
            self.config.cleanup_cron,
            max_age_hours
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiodrop_core::config::queue::QueueConfig;
    use audiodrop_core::config::store::StoreConfig;
    use audiodrop_core::types::SystemClock;
    use audiodrop_store::EphemeralStore;

    fn make_target() -> Arc<dyn Maintenance> {
        Arc::new(QueueEngine::new(
            EphemeralStore::shared(&StoreConfig::default()),
            QueueConfig::default(),
            Arc::new(SystemClock),
        ))
    }

    #[tokio::test]
    async fn test_rejects_invalid_cron() {
        let config = SchedulerConfig {
            purge_cron: "not a schedule".to_string(),
            ..SchedulerConfig::default()
        };
        let scheduler = CleanupScheduler::new(make_target(), config).await.unwrap();
        assert!(scheduler.register_default_tasks().await.is_err());
    }

    #[tokio::test]
    async fn test_registers_default_schedules() {
        let scheduler = CleanupScheduler::new(make_target(), SchedulerConfig::default())
            .await
            .unwrap();
        scheduler.register_default_tasks().await.unwrap();
    }
}
