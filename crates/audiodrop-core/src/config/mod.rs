//! Application configuration schemas.
//!
//! All configuration structs are deserialized via the `config` crate from
//! `config/default.toml`, an optional explicit file, and `AUDIODROP__`
//! environment variables. Each sub-module represents a logical section.

pub mod conversion;
pub mod logging;
pub mod queue;
pub mod scheduler;
pub mod store;

use serde::{Deserialize, Serialize};
use validator::Validate;

use self::conversion::ConversionConfig;
use self::logging::LoggingConfig;
use self::queue::QueueConfig;
use self::scheduler::SchedulerConfig;
use self::store::StoreConfig;

use crate::error::AppError;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "AUDIODROP";

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Ephemeral store settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Queue engine and dequeue loop settings.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Conversion pipeline settings.
    #[serde(default)]
    pub conversion: ConversionConfig,
    /// Periodic maintenance settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration.
    ///
    /// Merges `config/default.toml` (optional), the explicit file if one is
    /// given (required), and environment variables such as
    /// `AUDIODROP__QUEUE__MAX_CONCURRENT_JOBS=8`.
    pub fn load(path: Option<&str>) -> Result<Self, AppError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false));

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let app: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;

        app.validate_all()?;
        Ok(app)
    }

    /// Run range checks on every section.
    pub fn validate_all(&self) -> Result<(), AppError> {
        self.store.validate()?;
        self.queue.validate()?;
        self.conversion.validate()?;
        self.scheduler.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::Quality;

    #[test]
    fn test_defaults_match_documented_constants() {
        let config = AppConfig::default();
        assert_eq!(config.queue.max_concurrent_jobs, 5);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.queue.retry_priority_penalty, 1000);
        assert_eq!(config.queue.result_ttl_seconds, 1800);
        assert_eq!(config.conversion.long_source_threshold_seconds, 10_800);
        assert_eq!(config.conversion.long_source_quality, Quality::K128);
        assert_eq!(config.conversion.default_quality, Quality::K192);
        assert_eq!(config.conversion.lock_ttl_seconds, 300);
        assert!(config.validate_all().is_ok());
    }

    #[test]
    fn test_load_from_file_with_partial_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[queue]\nmax_concurrent_jobs = 2\n\n[logging]\nformat = \"pretty\"\n",
        )
        .unwrap();

        let config = AppConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.queue.max_concurrent_jobs, 2);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = AppConfig::default();
        config.queue.max_concurrent_jobs = 0;
        let err = config.validate_all().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }
}
