//! Ephemeral store configuration.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// In-process key/value store configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StoreConfig {
    /// Maximum number of elements kept in a list; the oldest are trimmed.
    #[serde(default = "default_max_list_length")]
    #[validate(range(min = 1))]
    pub max_list_length: usize,
    /// Interval in seconds between background expiry sweeps.
    #[serde(default = "default_sweep_interval")]
    #[validate(range(min = 1, max = 86400))]
    pub sweep_interval_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_list_length: default_max_list_length(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

fn default_max_list_length() -> usize {
    1000
}

fn default_sweep_interval() -> u64 {
    300
}
